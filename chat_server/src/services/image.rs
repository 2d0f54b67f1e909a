use crate::{
    models::{Image, ImageLookup, ImageOwner},
    AppError,
};
use chat_core::CacheAside;
use std::sync::Arc;
use std::time::Duration;

/// Cache-accelerated image lookups.
#[derive(Clone)]
pub struct ImageService {
    images: Arc<dyn ImageLookup>,
    cache: CacheAside,
    ttl: Duration,
}

impl ImageService {
    pub fn new(images: Arc<dyn ImageLookup>, cache: CacheAside, ttl: Duration) -> Self {
        Self { images, cache, ttl }
    }

    /// Falls back to the default profile image.
    pub async fn profile_image(&self, user_id: &str) -> Result<Image, AppError> {
        let key = format!("userImage:{user_id}");
        self.cache
            .get_or_fetch(&key, self.ttl, || async {
                let image = self.images.find_image(ImageOwner::User, user_id).await?;
                Ok::<_, AppError>(image.unwrap_or_else(Image::default_profile))
            })
            .await
    }

    pub async fn product_image(&self, product_id: &str) -> Result<Image, AppError> {
        let key = format!("productImage:{product_id}");
        self.cache
            .get_or_fetch(&key, self.ttl, || async {
                self.images
                    .find_image(ImageOwner::Product, product_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("image of product {product_id}")))
            })
            .await
    }
}
