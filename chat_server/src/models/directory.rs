//! Read-only lookups into data owned by other marketplace services.

use super::{Image, ImageOwner, Product};
use crate::AppError;
use async_trait::async_trait;
use chat_core::{Principal, Role};
use sqlx::{FromRow, PgPool};

#[async_trait]
pub trait UserLookup: Send + Sync + 'static {
    async fn find_user(&self, id: &str) -> Result<Option<Principal>, AppError>;
}

#[async_trait]
pub trait ProductLookup: Send + Sync + 'static {
    async fn find_product(&self, id: &str) -> Result<Option<Product>, AppError>;
}

#[async_trait]
pub trait ImageLookup: Send + Sync + 'static {
    /// The latest image uploaded for the owner.
    async fn find_image(&self, owner: ImageOwner, owner_id: &str)
        -> Result<Option<Image>, AppError>;
}

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    nickname: String,
    role: String,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<UserRow> for Principal {
    fn from(row: UserRow) -> Self {
        let role = match row.role.as_str() {
            "admin" => Role::Admin,
            _ => Role::User,
        };
        Self {
            id: row.id,
            nickname: row.nickname,
            role,
        }
    }
}

#[async_trait]
impl UserLookup for PgDirectory {
    async fn find_user(&self, id: &str) -> Result<Option<Principal>, AppError> {
        let user: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, nickname, role
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user.map(Into::into))
    }
}

#[async_trait]
impl ProductLookup for PgDirectory {
    async fn find_product(&self, id: &str) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as(
            r#"
            SELECT id, title, seller_id
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }
}

#[async_trait]
impl ImageLookup for PgDirectory {
    async fn find_image(
        &self,
        owner: ImageOwner,
        owner_id: &str,
    ) -> Result<Option<Image>, AppError> {
        let image = sqlx::query_as(
            r#"
            SELECT image_path, thumbnail_path
            FROM images
            WHERE owner_kind = $1 AND owner_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(image)
    }
}

#[cfg(feature = "test-util")]
mod memory {
    use super::*;
    use dashmap::DashMap;

    /// In-memory directory for tests.
    #[derive(Default)]
    pub struct MemoryDirectory {
        users: DashMap<String, Principal>,
        products: DashMap<String, Product>,
        images: DashMap<(ImageOwner, String), Image>,
    }

    impl MemoryDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_user(&self, id: &str, nickname: &str) {
            self.users
                .insert(id.to_string(), Principal::new(id, nickname));
        }

        pub fn add_product(&self, id: &str, title: &str, seller_id: &str) {
            let product = Product {
                id: id.to_string(),
                title: title.to_string(),
                seller_id: seller_id.to_string(),
            };
            self.products.insert(id.to_string(), product);
        }

        pub fn add_image(&self, owner: ImageOwner, owner_id: &str, image: Image) {
            self.images.insert((owner, owner_id.to_string()), image);
        }
    }

    #[async_trait]
    impl UserLookup for MemoryDirectory {
        async fn find_user(&self, id: &str) -> Result<Option<Principal>, AppError> {
            Ok(self.users.get(id).map(|v| v.value().clone()))
        }
    }

    #[async_trait]
    impl ProductLookup for MemoryDirectory {
        async fn find_product(&self, id: &str) -> Result<Option<Product>, AppError> {
            Ok(self.products.get(id).map(|v| v.value().clone()))
        }
    }

    #[async_trait]
    impl ImageLookup for MemoryDirectory {
        async fn find_image(
            &self,
            owner: ImageOwner,
            owner_id: &str,
        ) -> Result<Option<Image>, AppError> {
            let key = (owner, owner_id.to_string());
            Ok(self.images.get(&key).map(|v| v.value().clone()))
        }
    }
}

#[cfg(feature = "test-util")]
pub use memory::MemoryDirectory;
