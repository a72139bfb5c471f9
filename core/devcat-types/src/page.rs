//! Page windows over ordered collections.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Upper bound on `per_page` unless configured otherwise.
pub const DEFAULT_MAX_PER_PAGE: usize = 100;

/// A validated `(page, per_page)` pair. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    /// Clamps raw paging parameters.
    ///
    /// `page < 1` becomes 1. A `per_page` that is missing (0), negative or
    /// above `max` becomes `max`.
    pub fn clamp(page: i64, per_page: i64, max: usize) -> Self {
        let max = max.max(1);
        let page = usize::try_from(page).ok().filter(|p| *p >= 1).unwrap_or(1);
        let per_page = usize::try_from(per_page)
            .ok()
            .filter(|pp| (1..=max).contains(pp))
            .unwrap_or(max);
        Self { page, per_page }
    }

    /// Index range of this page within a collection of `len` items.
    ///
    /// A page past the end yields an empty range at `len`.
    pub fn window(&self, len: usize) -> Range<usize> {
        let start = (self.page - 1).saturating_mul(self.per_page);
        if start >= len {
            return len..len;
        }
        let end = start.saturating_add(self.per_page).min(len);
        start..end
    }
}

/// Clamps the paging parameters and returns that page of `items`.
pub fn page_of_slice<T>(items: &[T], page: i64, per_page: i64, max: usize) -> &[T] {
    let request = PageRequest::clamp(page, per_page, max);
    &items[request.window(items.len())]
}
