use crate::ids::{EventId, GroupId, MessageId, UserId};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::YesNo;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "msg_group")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: GroupId,
    pub group_name: String,
    /// `group_name` while live, NULL once deleted; unique.
    #[serde(skip)]
    pub live_name: Option<String>,
    pub description: String,
    pub event_id: Option<EventId>,
    pub include_all_user: YesNo,
    /// Highest message id appended to this group; 0 when empty. Never decreases.
    pub latest_message_id: MessageId,
    pub is_deleted: YesNo,
    pub create_user: UserId,
    pub update_user: UserId,
    pub create_time: DateTimeUtc,
    pub update_time: DateTimeUtc,
}

impl Model {
    pub fn includes_all_users(&self) -> bool {
        self.include_all_user.is_yes()
    }

    pub fn is_live(&self) -> bool {
        !self.is_deleted.is_yes()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::group_user::Entity")]
    GroupUser,
    #[sea_orm(has_many = "super::message::Entity")]
    Message,
}

impl Related<super::group_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GroupUser.def()
    }
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        super::stamp_audit(&mut self.create_time, &mut self.update_time, insert);
        Ok(self)
    }
}
