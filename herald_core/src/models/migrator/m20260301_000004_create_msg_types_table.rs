use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MsgType::Table)
                    .col(
                        ColumnDef::new(MsgType::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string_len_uniq(MsgType::TypeCode, 32))
                    .col(string_len(MsgType::TypeName, 64))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MsgType::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MsgType {
    Table,
    Id,
    TypeCode,
    TypeName,
}
