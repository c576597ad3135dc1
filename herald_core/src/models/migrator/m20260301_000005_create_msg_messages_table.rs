use sea_orm_migration::{prelude::*, schema::*};

use super::time_column;

use super::m20260301_000002_create_msg_groups_table::MsgGroup;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        manager
            .create_table(
                Table::create()
                    .table(MsgMessage::Table)
                    .col(
                        ColumnDef::new(MsgMessage::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(big_integer(MsgMessage::GroupId))
                    .col(string_len(MsgMessage::Title, 256))
                    .col(text(MsgMessage::Content))
                    .col(string_len(MsgMessage::TypeCode, 32))
                    .col(time_column(backend, MsgMessage::SendTime))
                    .col(string_len(MsgMessage::IsDeleted, 1).default("N"))
                    .col(big_integer(MsgMessage::CreateUser))
                    .col(big_integer(MsgMessage::UpdateUser))
                    .col(time_column(backend, MsgMessage::CreateTime))
                    .col(time_column(backend, MsgMessage::UpdateTime))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_msg_message_group_id")
                            .from(MsgMessage::Table, MsgMessage::GroupId)
                            .to(MsgGroup::Table, MsgGroup::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Watermark scans: messages of a group above a given id.
        manager
            .create_index(
                Index::create()
                    .name("idx_msg_message_group_id_id")
                    .table(MsgMessage::Table)
                    .col(MsgMessage::GroupId)
                    .col(MsgMessage::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_msg_message_send_time")
                    .table(MsgMessage::Table)
                    .col(MsgMessage::SendTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MsgMessage::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MsgMessage {
    Table,
    Id,
    GroupId,
    Title,
    Content,
    TypeCode,
    SendTime,
    IsDeleted,
    CreateUser,
    UpdateUser,
    CreateTime,
    UpdateTime,
}
