//! Pagination results.
//!
//! This module provides the [`Page`] returned by
//! [`DocumentQuery::paginate`](crate::finder::DocumentQuery::paginate) and the
//! [`PaginationParams`] it is computed from. Pages are 1-indexed.

use serde::{Deserialize, Serialize};

/// A single page of results plus the metadata needed to navigate the rest.
///
/// # Example
///
/// ```ignore
/// use docmapper::page::Page;
///
/// let page: Page<u32> = Page::builder(vec![1, 2, 3])
///     .with_total_entries(10)
///     .with_current_page(1)
///     .with_per_page(3)
///     .build();
///
/// assert_eq!(page.total_pages, 4);
/// assert_eq!(page.next_page, Some(2));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total count of items across all pages.
    pub total_entries: usize,
    /// `ceil(total_entries / per_page)`.
    pub total_pages: usize,
    pub current_page: usize,
    pub per_page: usize,
    /// The next page number (if more pages exist).
    pub next_page: Option<usize>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `current_page` lies past the last page.
    pub fn is_out_of_bounds(&self) -> bool {
        self.current_page > self.total_pages
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_entries: 0,
            total_pages: 0,
            current_page: 1,
            per_page: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for [`Page`]. The page count and navigation links are derived on build.
pub struct PageBuilder<T> {
    items: Vec<T>,
    total_entries: usize,
    current_page: usize,
    per_page: usize,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_entries: 0,
            current_page: 1,
            per_page: 0,
        }
    }

    /// Sets the total count of items across all pages.
    pub fn with_total_entries(mut self, total_entries: usize) -> Self {
        self.total_entries = total_entries;
        self
    }

    pub fn with_current_page(mut self, current_page: usize) -> Self {
        self.current_page = current_page.max(1);
        self
    }

    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn build(self) -> Page<T> {
        let total_pages = match self.per_page {
            0 => 0,
            per_page => self.total_entries.div_ceil(per_page),
        };

        Page {
            items: self.items,
            total_entries: self.total_entries,
            total_pages,
            current_page: self.current_page,
            per_page: self.per_page,
            next_page: (self.current_page < total_pages).then(|| self.current_page + 1),
            previous_page: (self.current_page > 1).then(|| self.current_page - 1),
        }
    }
}

/// Which page to fetch and how many items it holds.
///
/// # Example
///
/// ```ignore
/// use docmapper::page::PaginationParams;
///
/// let params = PaginationParams::new(3, 20);
/// assert_eq!(params.offset(), 40);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PaginationParams {
    /// The page number (1-indexed). Zero is treated as one.
    pub page: usize,
    /// Number of items per page.
    pub per_page: usize,
}

impl PaginationParams {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page: page.max(1), per_page }
    }

    /// Number of items to skip to reach this page.
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_items_in_pages_of_three() {
        let page = Page::builder(vec![1, 2, 3])
            .with_total_entries(10)
            .with_current_page(1)
            .with_per_page(3)
            .build();

        assert_eq!(page.total_pages, 4);
        assert_eq!(page.next_page, Some(2));
        assert_eq!(page.previous_page, None);
    }

    #[test]
    fn last_page_has_no_next() {
        let page = Page::builder(vec![10])
            .with_total_entries(10)
            .with_current_page(4)
            .with_per_page(3)
            .build();

        assert_eq!(page.next_page, None);
        assert_eq!(page.previous_page, Some(3));
        assert!(!page.is_out_of_bounds());
    }

    #[test]
    fn offsets_are_one_indexed() {
        assert_eq!(PaginationParams::new(1, 25).offset(), 0);
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
        assert_eq!(PaginationParams::new(0, 20).offset(), 0);
    }
}
