// src/services/mod.rs

//! Workflows. Each service owns the rules of one area and talks to storage
//! only through the traits in `crate::store`.

pub mod accounts;
pub mod admin;
pub mod cart;
pub mod catalog;
pub mod clock;
pub mod notifier;
pub mod orders;
pub mod password;
pub mod registration;
pub mod saga;
pub mod tokens;

use serde::Serialize;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// One page of results plus the totals a client needs to render paging.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// Normalized paging window: 1-based page, clamped limit, row offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub limit: u32,
}

impl PageWindow {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn skip(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    pub fn limit(&self) -> i64 {
        self.limit as i64
    }

    pub fn wrap<T>(&self, items: Vec<T>, total: i64) -> Page<T> {
        let limit = self.limit as i64;
        Page {
            items,
            page: self.page,
            limit: self.limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_clamps() {
        let window = PageWindow::new(Some(0), Some(1000));
        assert_eq!(window.page, 1);
        assert_eq!(window.limit, MAX_PAGE_SIZE);
        assert_eq!(window.skip(), 0);

        let window = PageWindow::new(Some(3), Some(10));
        assert_eq!(window.skip(), 20);
        let page = window.wrap(vec![1, 2], 21);
        assert_eq!(page.total_pages, 3);
    }
}
