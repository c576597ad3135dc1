use sea_orm_migration::prelude::*;

use super::{m20260301_000002_create_msg_groups_table::MsgGroup, time_column};

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20260301_000003_create_msg_group_users_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        manager
            .create_table(
                Table::create()
                    .table(MsgGroupUser::Table)
                    .col(
                        ColumnDef::new(MsgGroupUser::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MsgGroupUser::GroupId).big_integer().not_null())
                    .col(ColumnDef::new(MsgGroupUser::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(MsgGroupUser::JoinMessageId)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MsgGroupUser::LastReadMessageId)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MsgGroupUser::IsDeleted)
                            .string_len(1)
                            .not_null()
                            .default("N"),
                    )
                    .col(ColumnDef::new(MsgGroupUser::CreateUser).big_integer().not_null())
                    .col(ColumnDef::new(MsgGroupUser::UpdateUser).big_integer().not_null())
                    .col(time_column(backend, MsgGroupUser::CreateTime))
                    .col(time_column(backend, MsgGroupUser::UpdateTime))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_msg_group_user_group_id")
                            .from(MsgGroupUser::Table, MsgGroupUser::GroupId)
                            .to(MsgGroup::Table, MsgGroup::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One row per (group, user) ever: leaving soft-deletes, re-adding recovers the row.
        manager
            .create_index(
                Index::create()
                    .name("idx_msg_group_user_group_user_unique")
                    .table(MsgGroupUser::Table)
                    .col(MsgGroupUser::GroupId)
                    .col(MsgGroupUser::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_msg_group_user_user_id")
                    .table(MsgGroupUser::Table)
                    .col(MsgGroupUser::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MsgGroupUser::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum MsgGroupUser {
    Table,
    Id,
    GroupId,
    UserId,
    JoinMessageId,
    LastReadMessageId,
    IsDeleted,
    CreateUser,
    UpdateUser,
    CreateTime,
    UpdateTime,
}
