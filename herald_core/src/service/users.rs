use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::{codes, is_unique_violation, Classified, ErrorClass},
    ids::UserId,
    service::groups::all_users_group_ids,
};

const MAX_NICKNAME_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum UsersServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("user not found")]
    UserNotFound,

    #[error("user {0} is already registered")]
    UserExists(UserId),

    #[error("nickname must be 1 to 64 characters")]
    InvalidNickname,
}

impl Classified for UsersServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            UsersServiceError::DbError(error) => error.class(),
            UsersServiceError::UserNotFound => ErrorClass::Resource,
            UsersServiceError::UserExists(_) => ErrorClass::Resource,
            UsersServiceError::InvalidNickname => ErrorClass::Parameter,
        }
    }

    fn code(&self) -> u32 {
        match self {
            UsersServiceError::DbError(error) => error.code(),
            UsersServiceError::UserNotFound => codes::USER_NOT_FOUND,
            UsersServiceError::UserExists(_) => codes::ALREADY_EXISTS,
            UsersServiceError::InvalidNickname => codes::INVALID_PARAMETER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub nickname: String,
    pub avatar: Option<String>,
}

/// Local directory of externally authenticated users.
#[derive(Clone)]
pub struct UsersService {
    db: DatabaseConnection,
}

impl UsersService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Registers an active user. All-users groups pick the user up at read
    /// time, so nothing is written for them here.
    pub async fn register_user(&self, user: NewUser) -> Result<UserModel, UsersServiceError> {
        let nickname = user.nickname.trim();
        if nickname.is_empty() || nickname.chars().count() > MAX_NICKNAME_LEN {
            return Err(UsersServiceError::InvalidNickname);
        }
        if User::find_by_id(user.id).one(&self.db).await?.is_some() {
            return Err(UsersServiceError::UserExists(user.id));
        }

        let created = UserActiveModel {
            id: Set(user.id),
            nickname: Set(nickname.to_string()),
            avatar: Set(user.avatar.filter(|a| !a.trim().is_empty())),
            status: Set(UserStatus::Active),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                UsersServiceError::UserExists(user.id)
            } else {
                UsersServiceError::DbError(err)
            }
        })?;

        let implicit = all_users_group_ids(&self.db).await?;
        info!(
            "user {} registered, implicit member of {} all-users groups",
            created.id,
            implicit.len()
        );
        Ok(created)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserModel>, UsersServiceError> {
        Ok(User::find_by_id(user_id).one(&self.db).await?)
    }

    /// Disabling a user hides every all-users group from them; explicit
    /// memberships are untouched.
    pub async fn set_status(
        &self,
        user_id: UserId,
        status: UserStatus,
    ) -> Result<UserModel, UsersServiceError> {
        let user = User::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or(UsersServiceError::UserNotFound)?;
        if user.status == status {
            return Ok(user);
        }

        let mut active: UserActiveModel = user.into();
        active.status = Set(status);
        let updated = active.update(&self.db).await?;

        info!("user {user_id} is now {:?}", updated.status);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    fn new_user(raw: i64) -> NewUser {
        NewUser {
            id: UserId::new(raw),
            nickname: format!("reader {raw}"),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_get_user() {
        let service = UsersService::new(setup_test_db().await);

        let created = service.register_user(new_user(30)).await.unwrap();
        assert_eq!(created.id, UserId::new(30));
        assert!(created.is_active());

        let fetched = service.get_user(UserId::new(30)).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(service.get_user(UserId::new(31)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_twice_is_a_conflict() {
        let service = UsersService::new(setup_test_db().await);
        service.register_user(new_user(30)).await.unwrap();

        let result = service.register_user(new_user(30)).await;
        assert!(matches!(result, Err(UsersServiceError::UserExists(id)) if id == UserId::new(30)));
    }

    #[tokio::test]
    async fn test_register_rejects_blank_nickname() {
        let service = UsersService::new(setup_test_db().await);
        let mut user = new_user(30);
        user.nickname = "   ".into();
        assert!(matches!(
            service.register_user(user).await,
            Err(UsersServiceError::InvalidNickname)
        ));
    }

    #[tokio::test]
    async fn test_set_status() {
        let service = UsersService::new(setup_test_db().await);
        service.register_user(new_user(30)).await.unwrap();

        let disabled = service
            .set_status(UserId::new(30), UserStatus::Disabled)
            .await
            .unwrap();
        assert!(!disabled.is_active());

        let result = service.set_status(UserId::new(99), UserStatus::Active).await;
        assert!(matches!(result, Err(UsersServiceError::UserNotFound)));
    }
}
