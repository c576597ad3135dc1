use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tempfile::TempDir;

use crate::{
    entity::prelude::*,
    ids::UserId,
    models::migrator::Migrator,
};

/// Actor recorded in audit columns by tests.
pub const ADMIN: UserId = UserId::new(1_000_000);

/// Create a fresh in-memory SQLite database with every migration applied.
/// Each call gets its own isolated database.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

/// File-backed SQLite with a real pool, for tests that race connections.
/// The database lives as long as the returned directory.
pub async fn setup_pooled_test_db(max_connections: u32) -> (TempDir, DatabaseConnection) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("herald.db").display());

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .expect("Failed to open file database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    (dir, db)
}

/// Fixed clock for tests: `secs` seconds after 2026-01-01T00:00:00Z.
pub fn at(secs: i64) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base time");
    base + Duration::seconds(secs)
}

/// Active user `user-<raw>` created at the test epoch.
pub async fn create_test_user(db: &DatabaseConnection, raw: i64) -> UserId {
    create_test_user_at(db, raw, at(0)).await
}

pub async fn create_test_user_at(
    db: &DatabaseConnection,
    raw: i64,
    created: DateTime<Utc>,
) -> UserId {
    let user = UserActiveModel {
        id: Set(UserId::new(raw)),
        nickname: Set(format!("user-{raw}")),
        avatar: Set(None),
        status: Set(UserStatus::Active),
        create_time: Set(created),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert test user");

    user.id
}

/// Message type whose display name is the capitalized code.
pub async fn create_message_type(db: &DatabaseConnection, code: &str) {
    let mut chars = code.chars();
    let name = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };

    MessageTypeActiveModel {
        type_code: Set(code.to_string()),
        type_name: Set(name),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert message type");
}
