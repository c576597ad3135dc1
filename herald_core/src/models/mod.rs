use std::{future::Future, time::Duration};

use log::warn;
use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use serde::{Deserialize, Serialize};

use crate::{config::DatabaseSettings, error::is_transient};

pub mod migrator;

const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF: Duration = Duration::from_millis(50);

pub async fn connect(settings: &DatabaseSettings) -> Result<DatabaseConnection, DbErr> {
    Database::connect(settings.connect_options()).await
}

pub async fn migrate_up(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}

/// Runs a read query, retrying a couple of times when the failure is a
/// transient connection problem. Never use this for writes.
pub async fn with_read_retry<T, F, Fut>(mut op: F) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if is_transient(&err) && attempt < READ_ATTEMPTS => {
                warn!("transient storage error on read (attempt {attempt}): {err}");
                tokio::time::sleep(READ_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// 1-based page request, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u64 = 100;
    /// Keeps `offset()` inside a signed 64-bit SQL offset for any page size.
    pub const MAX_PAGE: u64 = i64::MAX as u64 / Self::MAX_PAGE_SIZE;

    pub fn new(page: u64, page_size: u64) -> Self {
        Self {
            page: page.clamp(1, Self::MAX_PAGE),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// Zero-based page index as SeaORM paginators expect it.
    pub fn index(&self) -> u64 {
        self.page - 1
    }

    pub fn offset(&self) -> u64 {
        self.index() * self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_page_request_clamps() {
        let page = PageRequest::new(0, 1000);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, PageRequest::MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn test_huge_page_number_stays_in_range() {
        let page = PageRequest::new(u64::MAX, u64::MAX);
        assert_eq!(page.page, PageRequest::MAX_PAGE);
        assert!(page.offset() <= i64::MAX as u64);
        assert!(page.index().checked_mul(page.page_size).is_some());
    }

    #[tokio::test]
    async fn test_read_retry_recovers_from_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_read_retry(|| async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DbErr::Conn(sea_orm::RuntimeErr::Internal("reset".into())))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_retry_does_not_retry_query_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), DbErr> = with_read_retry(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbErr::Custom("bad query".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
