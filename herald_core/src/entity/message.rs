use crate::ids::{GroupId, MessageId, UserId};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::YesNo;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "msg_message")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: MessageId,
    pub group_id: GroupId,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub type_code: String,
    pub send_time: DateTimeUtc,
    pub is_deleted: YesNo,
    pub create_user: UserId,
    pub update_user: UserId,
    pub create_time: DateTimeUtc,
    pub update_time: DateTimeUtc,
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
        belongs_to = "super::message_type::Entity",
        from = "Column::TypeCode",
        to = "super::message_type::Column::TypeCode"
    )]
    MessageType,
}

impl Related<super::msg_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl Related<super::message_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MessageType.def()
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
