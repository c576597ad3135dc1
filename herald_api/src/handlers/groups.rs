use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use herald_core::{
    entity::{prelude::UserModel, YesNo},
    error::codes,
    ids::{EventId, GroupId, UserId},
    service::groups::{GroupChanges, GroupFilter, GroupScope, NewGroup},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::{
    auth::Admin,
    error::ApiError,
    result::{PageQuery, PageResponse},
    AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_groups)
        .service(create_group)
        .service(get_group)
        .service(update_group)
        .service(delete_group)
        .service(add_users)
        .service(remove_users)
        .service(list_members)
        .service(list_non_members)
        .service(materialize);
}

#[derive(Debug, Default, Deserialize)]
struct GroupListQuery {
    group_name: Option<String>,
    event_id: Option<EventId>,
    #[serde(default)]
    query_scope: GroupScope,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateGroupDto {
    #[validate(length(min = 1, max = 128, message = "group_name must be 1 to 128 characters"))]
    group_name: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    desc: String,
    #[serde(default)]
    include_all_user: YesNo,
    #[serde(default)]
    user_ids: Vec<UserId>,
    event_id: Option<EventId>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateGroupDto {
    #[validate(length(min = 1, max = 128))]
    group_name: Option<String>,
    #[validate(length(max = 255))]
    desc: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct UserIdsDto {
    #[validate(length(min = 1, message = "user_ids must not be empty"))]
    user_ids: Vec<UserId>,
}

#[derive(Debug, Default, Deserialize)]
struct NicknameQuery {
    nickname: Option<String>,
}

#[derive(Debug, Serialize)]
struct MemberView {
    user_id: UserId,
    nickname: String,
    avatar: Option<String>,
}

impl From<UserModel> for MemberView {
    fn from(user: UserModel) -> Self {
        Self {
            user_id: user.id,
            nickname: user.nickname,
            avatar: user.avatar,
        }
    }
}

#[get("/msg_groups")]
async fn list_groups(
    state: web::Data<AppState>,
    _admin: Admin,
    page: web::Query<PageQuery>,
    query: web::Query<GroupListQuery>,
) -> Result<impl Responder, ApiError> {
    let request = page.request();
    let query = query.into_inner();
    let filter = GroupFilter {
        name: query.group_name.filter(|name| !name.trim().is_empty()),
        event_id: query.event_id,
        scope: query.query_scope,
    };

    let groups = state.core.groups.list_groups(request, filter).await?;
    Ok(web::Json(PageResponse::new(groups, request)))
}

#[post("/msg_groups")]
async fn create_group(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    dto: web::Json<CreateGroupDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let dto = dto.into_inner();

    let created = state
        .core
        .groups
        .create_group(
            NewGroup {
                name: dto.group_name,
                description: dto.desc,
                event_id: dto.event_id,
                include_all_users: dto.include_all_user == YesNo::Y,
                user_ids: dto.user_ids,
            },
            admin.user_id,
        )
        .await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/msg_groups/{id}")]
async fn get_group(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<GroupId>,
) -> Result<impl Responder, ApiError> {
    let group_id = path.into_inner();
    let group = state
        .core
        .groups
        .get_group(group_id)
        .await?
        .ok_or_else(|| ApiError::not_found(codes::GROUP_NOT_FOUND, "group not found"))?;
    Ok(web::Json(group))
}

#[patch("/msg_groups/{id}")]
async fn update_group(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<GroupId>,
    dto: web::Json<UpdateGroupDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let dto = dto.into_inner();

    let group = state
        .core
        .groups
        .update_group(
            path.into_inner(),
            GroupChanges {
                name: dto.group_name,
                description: dto.desc,
            },
            admin.user_id,
        )
        .await?;
    Ok(web::Json(group))
}

#[delete("/msg_groups/{id}")]
async fn delete_group(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<GroupId>,
) -> Result<impl Responder, ApiError> {
    state
        .core
        .groups
        .delete_group(path.into_inner(), admin.user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/msg_groups/{id}/users")]
async fn add_users(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<GroupId>,
    dto: web::Json<UserIdsDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let outcome = state
        .core
        .members
        .add_users(path.into_inner(), &dto.user_ids, admin.user_id)
        .await?;
    Ok(web::Json(outcome))
}

#[delete("/msg_groups/{id}/users")]
async fn remove_users(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<GroupId>,
    dto: web::Json<UserIdsDto>,
) -> Result<impl Responder, ApiError> {
    dto.validate()?;
    let removed = state
        .core
        .members
        .remove_users(path.into_inner(), &dto.user_ids, admin.user_id)
        .await?;
    Ok(web::Json(json!({ "removed": removed })))
}

#[get("/msg_groups/{id}/users")]
async fn list_members(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<GroupId>,
    page: web::Query<PageQuery>,
) -> Result<impl Responder, ApiError> {
    let request = page.request();
    let members = state
        .core
        .members
        .list_members(path.into_inner(), request)
        .await?;
    Ok(web::Json(
        PageResponse::new(members, request).map(MemberView::from),
    ))
}

#[get("/msg_groups/{id}/non_users")]
async fn list_non_members(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<GroupId>,
    page: web::Query<PageQuery>,
    query: web::Query<NicknameQuery>,
) -> Result<impl Responder, ApiError> {
    let request = page.request();
    let nickname = query
        .nickname
        .as_deref()
        .map(str::trim)
        .filter(|nickname| !nickname.is_empty());
    let users = state
        .core
        .members
        .list_non_members(path.into_inner(), request, nickname)
        .await?;
    Ok(web::Json(
        PageResponse::new(users, request).map(MemberView::from),
    ))
}

/// Writes shadow memberships for every active user of an all-users group.
#[post("/msg_groups/{id}/materialize")]
async fn materialize(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<GroupId>,
) -> Result<impl Responder, ApiError> {
    let created = state
        .core
        .reads
        .materialize_all_users_group(path.into_inner())
        .await?;
    Ok(web::Json(json!({ "created": created })))
}
