use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use herald_core::{
    ids::{GroupId, MessageId},
    service::messages::NewMessage,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::{
    auth::{Admin, AuthUser},
    error::ApiError,
    result::{CountResponse, IdResponse, PageQuery, PageResponse},
    AppState,
};

// unread_count and read_all go before /messages/{id}
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_messages)
        .service(unread_count)
        .service(read_all)
        .service(open_message)
        .service(append_message)
        .service(list_message_types)
        .service(create_message_type);
}

#[derive(Debug, Default, Deserialize)]
struct TypeQuery {
    message_type: Option<String>,
}

impl TypeQuery {
    fn type_code(&self) -> Option<&str> {
        self.message_type
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

#[derive(Debug, Deserialize, Validate)]
struct AppendMessageDto {
    group_id: GroupId,
    #[validate(length(min = 1, max = 255, message = "title must be 1 to 255 characters"))]
    title: String,
    #[serde(default)]
    content: String,
    #[validate(length(min = 1, max = 32, message = "message_type is required"))]
    message_type: String,
    send_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
struct MessageTypeDto {
    #[validate(length(min = 1, max = 32))]
    type_code: String,
    #[validate(length(min = 1, max = 64))]
    type_name: String,
}

/// Messages visible to the caller, newest first.
#[get("/messages")]
async fn list_messages(
    state: web::Data<AppState>,
    user: AuthUser,
    page: web::Query<PageQuery>,
    filter: web::Query<TypeQuery>,
) -> Result<impl Responder, ApiError> {
    let request = page.request();
    let listed = state
        .core
        .messages
        .list_messages_for_user(user.user_id, request, filter.type_code())
        .await?;
    Ok(web::Json(PageResponse::new(listed, request)))
}

#[get("/messages/unread_count")]
async fn unread_count(
    state: web::Data<AppState>,
    user: AuthUser,
    filter: web::Query<TypeQuery>,
) -> Result<impl Responder, ApiError> {
    let count = state
        .core
        .reads
        .unread_count(user.user_id, filter.type_code())
        .await?;
    Ok(web::Json(CountResponse { count }))
}

#[post("/messages/read_all")]
async fn read_all(state: web::Data<AppState>, user: AuthUser) -> Result<impl Responder, ApiError> {
    let updated = state.core.reads.mark_all_read(user.user_id).await?;
    Ok(web::Json(json!({ "updated": updated })))
}

/// Message content; reading it moves the caller's watermark.
#[get("/messages/{id}")]
async fn open_message(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<MessageId>,
) -> Result<impl Responder, ApiError> {
    let view = state
        .core
        .reads
        .open_message(user.user_id, path.into_inner())
        .await?;
    Ok(web::Json(view))
}

#[post("/messages")]
async fn append_message(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    dto: web::Json<AppendMessageDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let dto = dto.into_inner();

    let message = state
        .core
        .messages
        .append_message(
            dto.group_id,
            NewMessage {
                title: dto.title,
                content: dto.content,
                type_code: dto.message_type,
                send_time: dto.send_time,
            },
            admin.user_id,
        )
        .await?;
    Ok(HttpResponse::Created().json(IdResponse { id: message.id }))
}

#[get("/message_types")]
async fn list_message_types(
    state: web::Data<AppState>,
    _user: AuthUser,
) -> Result<impl Responder, ApiError> {
    let types = state.core.messages.list_message_types().await?;
    Ok(web::Json(types))
}

#[post("/message_types")]
async fn create_message_type(
    state: web::Data<AppState>,
    _admin: Admin,
    dto: web::Json<MessageTypeDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let created = state
        .core
        .messages
        .create_message_type(&dto.type_code, &dto.type_name)
        .await?;
    Ok(HttpResponse::Created().json(created))
}
