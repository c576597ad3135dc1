use sea_orm::DatabaseBackend;
use sea_orm_migration::prelude::*;

mod m20260301_000001_create_users_table;
mod m20260301_000002_create_msg_groups_table;
mod m20260301_000003_create_msg_group_users_table;
mod m20260301_000004_create_msg_types_table;
mod m20260301_000005_create_msg_messages_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_users_table::Migration),
            Box::new(m20260301_000002_create_msg_groups_table::Migration),
            Box::new(m20260301_000003_create_msg_group_users_table::Migration),
            Box::new(m20260301_000004_create_msg_types_table::Migration),
            Box::new(m20260301_000005_create_msg_messages_table::Migration),
        ]
    }
}

/// Non-null timestamp with microsecond precision. MySQL's plain `timestamp`
/// rounds to whole seconds, which would tie a message with an account
/// registered in the same second.
pub(crate) fn time_column<T: IntoIden>(backend: DatabaseBackend, name: T) -> ColumnDef {
    let mut column = ColumnDef::new(name);
    match backend {
        DatabaseBackend::MySql => column.custom(Alias::new("datetime(6)")),
        _ => column.timestamp_with_time_zone(),
    };
    column.not_null().take()
}

#[cfg(test)]
use sea_orm::{Database, DbErr};

#[tokio::test]
async fn test_migrations_okay() -> Result<(), DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    let schema_manager = SchemaManager::new(&db);

    Migrator::refresh(&db).await?;

    assert!(schema_manager.has_table("users").await?);
    assert!(schema_manager.has_table("msg_group").await?);
    assert!(schema_manager.has_table("msg_group_user").await?);
    assert!(schema_manager.has_table("msg_type").await?);
    assert!(schema_manager.has_table("msg_message").await?);

    Ok(())
}

#[test]
fn test_time_columns_keep_fractional_seconds() {
    use m20260301_000001_create_users_table::Users;

    let table = |backend| {
        Table::create()
            .table(Users::Table)
            .col(time_column(backend, Users::CreateTime))
            .to_owned()
    };

    let mysql = table(DatabaseBackend::MySql).to_string(MysqlQueryBuilder);
    assert!(mysql.contains("datetime(6)"), "{mysql}");
    let postgres = table(DatabaseBackend::Postgres).to_string(PostgresQueryBuilder);
    assert!(postgres.contains("timestamp with time zone"), "{postgres}");
}
