use thiserror::Error;

use crate::model::PaginationInfo;
use crate::utils::clamp_u32;

pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PageJumpError {
    #[error("page must be a whole number: {0:?}")]
    NotANumber(String),
}

/// Keeps the 1-based page the API speaks and the 0-based index the table
/// control speaks in step.
#[derive(Debug, Clone, PartialEq)]
pub struct Pager {
    page: u32,
    page_size: u32,
    info: Option<PaginationInfo>,
}

impl Pager {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            info: None,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Zero-based index for display controls.
    pub fn display_index(&self) -> u32 {
        self.page.saturating_sub(1)
    }

    pub fn total_pages(&self) -> u32 {
        self.info.map(|i| i.total_pages).unwrap_or(1).max(1)
    }

    /// Records what the API reported for the page it served.
    pub fn observe(&mut self, info: PaginationInfo) {
        self.page = info.page.max(1);
        self.info = Some(info);
    }

    /// Page navigation from a zero-based control. Returns the 1-based page to fetch.
    pub fn go_to_index(&mut self, zero_based: u32) -> u32 {
        self.page = clamp_u32(zero_based.saturating_add(1), 1, self.total_pages());
        self.page
    }

    /// Changing the page size always lands on page 1.
    pub fn set_page_size(&mut self, page_size: u32) -> u32 {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self.page = 1;
        self.page_size
    }

    /// A filter change lands on page 1; the page size is kept.
    pub fn reset(&mut self) {
        self.page = 1;
    }

    /// Direct "jump to page N" input, validated on submit. Out-of-range
    /// values clamp into `[1, total_pages]`. `Ok(None)` means no fetch is
    /// needed because the clamped page is already current.
    pub fn jump(&mut self, raw: &str) -> Result<Option<u32>, PageJumpError> {
        let t = raw.trim();
        let n = t.parse::<i64>().map_err(|_| PageJumpError::NotANumber(t.to_string()))?;
        let target = n.clamp(1, self.total_pages() as i64) as u32;
        if target == self.page {
            return Ok(None);
        }
        self.page = target;
        Ok(Some(target))
    }
}
