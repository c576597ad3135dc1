use actix_web::{get, patch, post, web, HttpResponse, Responder};
use herald_core::{
    entity::prelude::UserStatus,
    error::codes,
    ids::UserId,
    service::users::NewUser,
};
use serde::Deserialize;
use validator::Validate;

use crate::{auth::Admin, error::ApiError, AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register_user)
        .service(get_user)
        .service(set_status);
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterUserDto {
    user_id: UserId,
    #[validate(length(min = 1, max = 64))]
    nickname: String,
    #[validate(length(max = 512))]
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusDto {
    status: UserStatus,
}

/// Mirrors an account from the external identity service.
#[post("/users")]
async fn register_user(
    state: web::Data<AppState>,
    _admin: Admin,
    dto: web::Json<RegisterUserDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let dto = dto.into_inner();

    let user = state
        .core
        .users
        .register_user(NewUser {
            id: dto.user_id,
            nickname: dto.nickname,
            avatar: dto.avatar,
        })
        .await?;
    Ok(HttpResponse::Created().json(user))
}

#[get("/users/{id}")]
async fn get_user(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<UserId>,
) -> Result<impl Responder, ApiError> {
    let user = state
        .core
        .users
        .get_user(path.into_inner())
        .await?
        .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND, "user not found"))?;
    Ok(web::Json(user))
}

#[patch("/users/{id}/status")]
async fn set_status(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<UserId>,
    dto: web::Json<StatusDto>,
) -> Result<impl Responder, ApiError> {
    let user = state
        .core
        .users
        .set_status(path.into_inner(), dto.status)
        .await?;
    Ok(web::Json(user))
}
