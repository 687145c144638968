//! Page arithmetic shared by paginated listings.

use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    /// Lenient parse: garbage or out-of-range input falls back to defaults
    /// and the size is capped.
    pub fn parse(page: Option<&str>, page_size: Option<&str>, default_size: i64) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let page_size = page_size
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|s| *s >= 1)
            .unwrap_or(default_size)
            .min(MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit_offset(&self) -> (i64, i64) {
        (self.page_size, self.offset())
    }

    pub fn has_next(&self, total: i64) -> bool {
        self.page.saturating_mul(self.page_size) < total
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Paginated<T> {
    pub fn new(results: Vec<T>, total: i64, page: Page) -> Self {
        Self {
            results,
            total,
            page: page.page,
            page_size: page.page_size,
            has_next: page.has_next(total),
            has_previous: page.page > 1,
        }
    }
}

/// Link-style envelope: `count`, `next`, `previous`, `results`.
#[derive(Debug, Serialize)]
pub struct LinkPage<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> LinkPage<T> {
    pub fn new(results: Vec<T>, count: i64, page: Page, base_path: &str) -> Self {
        let link = |n: i64| format!("{}?page={}", base_path, n);
        Self {
            count,
            next: page.has_next(count).then(|| link(page.page.saturating_add(1))),
            previous: (page.page > 1).then(|| link(page.page - 1)),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_and_caps() {
        assert_eq!(
            Page::parse(None, None, DEFAULT_PAGE_SIZE),
            Page { page: 1, page_size: 20 }
        );
        assert_eq!(
            Page::parse(Some("abc"), Some("500"), DEFAULT_PAGE_SIZE),
            Page { page: 1, page_size: 100 }
        );
        assert_eq!(
            Page::parse(Some("0"), Some("-3"), DEFAULT_PAGE_SIZE),
            Page { page: 1, page_size: 20 }
        );
        assert_eq!(Page::parse(Some("3"), Some("10"), 20).offset(), 20);
    }

    #[test]
    fn test_huge_page_saturates() {
        let page = Page::parse(Some("9223372036854775807"), None, DEFAULT_PAGE_SIZE);
        assert_eq!(page.page, i64::MAX);
        assert_eq!(page.offset(), i64::MAX);
        assert!(!page.has_next(10));
        let links = LinkPage::<()>::new(vec![], 10, page, "/x");
        assert!(links.next.is_none());
    }

    #[test]
    fn test_paginated_flags() {
        let page = Page { page: 2, page_size: 10 };
        let p = Paginated::new(vec![1, 2, 3], 23, page);
        assert!(p.has_next && p.has_previous);

        let last = Paginated::new(vec![1], 21, Page { page: 3, page_size: 10 });
        assert!(!last.has_next);
    }

    #[test]
    fn test_link_page() {
        let page = LinkPage::new(vec!["a"], 120, Page { page: 2, page_size: 50 }, "/api/teams/t/projects");
        assert_eq!(page.next.as_deref(), Some("/api/teams/t/projects?page=3"));
        assert_eq!(page.previous.as_deref(), Some("/api/teams/t/projects?page=1"));

        let only = LinkPage::new(vec!["a"], 1, Page { page: 1, page_size: 50 }, "/x");
        assert!(only.next.is_none() && only.previous.is_none());
    }
}
