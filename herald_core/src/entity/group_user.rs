use crate::ids::{GroupId, MembershipId, MessageId, UserId};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::YesNo;

/// Membership of a user in a group. Rows survive soft deletion so a later
/// add recovers them instead of inserting a duplicate.
///
/// For all-users groups the row is a shadow: it only carries the read
/// watermark and never grants visibility by itself.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "msg_group_user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: MembershipId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub join_message_id: MessageId,
    pub last_read_message_id: MessageId,
    pub is_deleted: YesNo,
    pub create_user: UserId,
    pub update_user: UserId,
    pub create_time: DateTimeUtc,
    pub update_time: DateTimeUtc,
}

impl Model {
    pub fn is_live(&self) -> bool {
        !self.is_deleted.is_yes()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::msg_group::Entity",
        from = "Column::GroupId",
        to = "super::msg_group::Column::Id"
    )]
    Group,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::msg_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
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
