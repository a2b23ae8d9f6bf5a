//! Paged list results. Callers see a complete set only after walking every page.
use super::error::ValidationError;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32, // 1 based
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub count: usize, // total matches across all pages
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<T>,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }
    pub fn first(page_size: u32) -> Self {
        Self::new(1, page_size)
    }
    pub fn next(self) -> Self {
        Self::new(self.page + 1, self.page_size)
    }
    pub fn validate(&self, max_page_size: u32) -> Result<(), ValidationError> {
        if self.page == 0 || self.page_size == 0 || self.page_size > max_page_size {
            return Err(ValidationError::Page { max: max_page_size });
        }
        Ok(())
    }
    fn offset(&self) -> usize {
        (self.page as usize).saturating_sub(1) * self.page_size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

impl<T> Page<T> {
    /// Slice a fully filtered and ordered result set down to the requested page.
    pub fn from_matches(matches: Vec<T>, request: PageRequest) -> Self {
        let count = matches.len();
        let items = matches
            .into_iter()
            .skip(request.offset())
            .take(request.page_size as usize)
            .collect();

        Self {
            count,
            page: request.page,
            page_size: request.page_size,
            items,
        }
    }
    pub fn has_next(&self) -> bool {
        (self.page as usize) * (self.page_size as usize) < self.count
    }
}
