use sea_orm_migration::{prelude::*, schema::*};

use super::time_column;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        manager
            .create_table(
                Table::create()
                    .table(MsgGroup::Table)
                    .col(
                        ColumnDef::new(MsgGroup::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string_len(MsgGroup::GroupName, 128))
                    .col(string_len_null(MsgGroup::LiveName, 128))
                    .col(string_len(MsgGroup::Description, 512).default(""))
                    .col(big_integer_null(MsgGroup::EventId))
                    .col(string_len(MsgGroup::IncludeAllUser, 1).default("N"))
                    .col(big_integer(MsgGroup::LatestMessageId).default(0))
                    .col(string_len(MsgGroup::IsDeleted, 1).default("N"))
                    .col(big_integer(MsgGroup::CreateUser))
                    .col(big_integer(MsgGroup::UpdateUser))
                    .col(time_column(backend, MsgGroup::CreateTime))
                    .col(time_column(backend, MsgGroup::UpdateTime))
                    .to_owned(),
            )
            .await?;

        // live_name is the name while the group is live and NULL once deleted.
        manager
            .create_index(
                Index::create()
                    .name("uk_msg_group_live_name")
                    .table(MsgGroup::Table)
                    .col(MsgGroup::LiveName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_msg_group_name_deleted")
                    .table(MsgGroup::Table)
                    .col(MsgGroup::GroupName)
                    .col(MsgGroup::IsDeleted)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_msg_group_event_id")
                    .table(MsgGroup::Table)
                    .col(MsgGroup::EventId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MsgGroup::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MsgGroup {
    Table,
    Id,
    GroupName,
    LiveName,
    Description,
    EventId,
    IncludeAllUser,
    LatestMessageId,
    IsDeleted,
    CreateUser,
    UpdateUser,
    CreateTime,
    UpdateTime,
}
