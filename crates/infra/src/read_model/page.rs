//! Offset pagination for list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

/// `?limit=&offset=` as sent by clients; missing values take the defaults
/// and the limit is clamped to `1..=MAX_LIMIT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageRequest {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Slices an already filtered and sorted list.
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let (limit, offset) = (request.limit(), request.offset());
        let total = all.len();
        let items: Vec<T> = all.into_iter().skip(offset).take(limit).collect();
        Self {
            has_more: offset + items.len() < total,
            items,
            total,
            limit,
            offset,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            has_more: self.has_more,
        }
    }
}

/// Case-insensitive containment used by `?search=` filters.
pub fn matches_search(needle: Option<&str>, haystacks: &[&str]) -> bool {
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return true;
    };
    let needle = needle.to_lowercase();
    haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_and_reports_more() {
        let page = Page::slice((0..10).collect(), PageRequest { limit: Some(3), offset: Some(6) });
        assert_eq!(page.items, vec![6, 7, 8]);
        assert!(page.has_more);
        assert_eq!(page.total, 10);

        let capped = PageRequest { limit: Some(10_000), offset: None };
        assert_eq!(capped.limit(), MAX_LIMIT);
        assert_eq!(PageRequest::default().limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn last_page_has_no_more() {
        let page = Page::slice((0..4).collect::<Vec<u8>>(), PageRequest { limit: Some(2), offset: Some(2) });
        assert!(!page.has_more);
        let past_end = Page::slice((0..4).collect::<Vec<u8>>(), PageRequest { limit: None, offset: Some(9) });
        assert!(past_end.items.is_empty());
        assert!(!past_end.has_more);
    }

    #[test]
    fn search_is_case_insensitive() {
        assert!(matches_search(Some("kop"), &["INV-000001", "Kopitiam Sdn Bhd"]));
        assert!(!matches_search(Some("xyz"), &["INV-000001"]));
        assert!(matches_search(Some("  "), &[]));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Walking pages by `offset += limit` visits every item once, in order.
            #[test]
            fn pages_cover_the_list_exactly(len in 0usize..500, limit in 1usize..300) {
                let all: Vec<usize> = (0..len).collect();
                let mut seen = Vec::new();
                let mut offset = 0;
                loop {
                    let page = Page::slice(all.clone(), PageRequest { limit: Some(limit), offset: Some(offset) });
                    prop_assert!(page.items.len() <= MAX_LIMIT);
                    prop_assert_eq!(page.total, len);
                    offset += page.items.len();
                    seen.extend(page.items);
                    if !page.has_more {
                        break;
                    }
                }
                prop_assert_eq!(seen, all);
            }
        }
    }
}
