use serde::{Deserialize, Serialize};

use crate::errors::ApprovalError;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page selection, validated before it reaches a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: DEFAULT_PAGE_SIZE }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Result<Self, ApprovalError> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(ApprovalError::InvalidInput("page must be >= 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ApprovalError::InvalidInput(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// Slices an already-ordered collection; used by the in-memory store.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Page<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX).min(items.len());
        let end = start.saturating_add(self.page_size as usize).min(items.len());
        Page { data: items[start..end].to_vec(), total: items.len() as u64 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self { data: Vec::new(), total: 0 }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::page::{PageRequest, DEFAULT_PAGE_SIZE};
    use crate::errors::ApprovalError;

    #[test]
    fn defaults_apply_when_query_is_silent() {
        let page = PageRequest::new(None, None).expect("defaults");
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn out_of_range_values_are_invalid_input() {
        assert!(matches!(PageRequest::new(Some(0), None), Err(ApprovalError::InvalidInput(_))));
        assert!(matches!(
            PageRequest::new(Some(1), Some(101)),
            Err(ApprovalError::InvalidInput(_))
        ));
        assert!(matches!(PageRequest::new(Some(1), Some(0)), Err(ApprovalError::InvalidInput(_))));
    }

    #[test]
    fn slicing_past_the_end_yields_empty_data_with_total() {
        let items: Vec<u32> = (1..=12).collect();
        let second = PageRequest::new(Some(2), Some(10)).expect("page").slice(&items);
        assert_eq!(second.data, vec![11, 12]);
        assert_eq!(second.total, 12);

        let beyond = PageRequest::new(Some(5), Some(10)).expect("page").slice(&items);
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total, 12);

        let none = PageRequest::default().slice::<u32>(&[]);
        assert_eq!(none.total, 0);
        assert!(none.data.is_empty());
    }
}
