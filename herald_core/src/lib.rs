pub mod entity;
pub mod ids;
pub mod models;

use log::info;
use sea_orm::{DatabaseConnection, DbErr};

use crate::service::{
    groups::GroupsService, members::MembersService, messages::MessagesService,
    read_state::ReadStateService, users::UsersService,
};

pub mod service;

pub mod error;

pub mod config;

#[cfg(test)]
pub(crate) mod test_utils;

/// Main runtime handle for the message core. Owns the storage pool, which is
/// the only shared resource; services are cheap clones around it.
#[derive(Clone)]
pub struct HeraldCore {
    pub db: DatabaseConnection,

    pub groups: GroupsService,
    pub members: MembersService,
    pub messages: MessagesService,
    pub reads: ReadStateService,
    pub users: UsersService,
}

impl HeraldCore {
    /// Connects the pool and brings the schema up to date.
    pub async fn start(settings: &config::DatabaseSettings) -> Result<Self, DbErr> {
        let db = models::connect(settings).await?;
        models::migrate_up(&db).await?;
        info!("storage ready ({} driver)", settings.driver);
        Ok(Self::with_connection(db))
    }

    /// Wraps an already connected, migrated pool.
    pub fn with_connection(db: DatabaseConnection) -> Self {
        Self {
            groups: GroupsService::new(db.clone()),
            members: MembersService::new(db.clone()),
            messages: MessagesService::new(db.clone()),
            reads: ReadStateService::new(db.clone()),
            users: UsersService::new(db.clone()),
            db,
        }
    }

    pub async fn shutdown(self) -> Result<(), DbErr> {
        self.db.close().await?;
        info!("storage pool closed");
        Ok(())
    }
}

pub mod prelude {
    pub use super::ids;
    pub use super::entity;
    pub use super::models;

    pub use super::service;

    pub use super::error;

    pub use super::config;

    pub use super::HeraldCore;
}
