use crate::handlers::*;
use crate::models::{ChatRoomListItem, ChatRoomLists, ChatRoomView, ClickPage, OpenChat, SendMessage};
use crate::{AppState, ErrorOutput};
use axum::Router;
use chat_core::{ChatMessage, Principal, Role};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_rapidoc::RapiDoc;
use utoipa_redoc::{Redoc, Servable};
use utoipa_swagger_ui::SwaggerUi;

pub(crate) trait OpenApiRouter {
    fn openapi(self) -> Self;
}

#[derive(OpenApi)]
#[openapi(
    paths(
        send_message_handler,
        room_messages_handler,
        recent_message_handler,
        open_chat_handler,
        list_chat_rooms_handler,
    ),
    components(
        schemas(
            ChatMessage,
            Principal,
            Role,
            SendMessage,
            OpenChat,
            ClickPage,
            ChatRoomView,
            ChatRoomListItem,
            ChatRoomLists,
            ErrorOutput,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "chat", description = "Chat message operations"),
        (name = "chat-room", description = "Chat room operations"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "token",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            )
        }
    }
}

impl OpenApiRouter for Router<AppState> {
    fn openapi(self) -> Self {
        self.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .merge(Redoc::with_url("/redoc", ApiDoc::openapi()))
            .merge(RapiDoc::new("/api-docs/openapi.json").path("/rapidoc"))
    }
}
