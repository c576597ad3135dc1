use herald_core::models::{Page, PageRequest};
use serde::{Deserialize, Serialize};

/// `?page&page_size` as sent by clients; missing values fall back to page 1
/// of 10.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl PageQuery {
    pub fn request(&self) -> PageRequest {
        let fallback = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(fallback.page),
            self.page_size.unwrap_or(fallback.page_size),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub rows: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> PageResponse<T> {
    pub fn new(page: Page<T>, request: PageRequest) -> Self {
        Self {
            rows: page.rows,
            total: page.total,
            page: request.page,
            page_size: request.page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageResponse<U> {
        PageResponse {
            rows: self.rows.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IdResponse<T> {
    pub id: T,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}
