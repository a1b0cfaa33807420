//! Sort and pagination policy for image listings.
//!
//! The full set of a user's images is sorted first and only then sliced
//! into a page window, so ordering is consistent across pages.

use std::cmp::Ordering;
use std::ops::Range;
use std::time::SystemTime;

use icu_collator::{Collator, CollatorOptions};

/// Key a listing is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Filename, Unicode root collation.
    #[default]
    Name,
    /// Byte length.
    Size,
    /// Last-modified time.
    Date,
}

impl SortKey {
    /// Parse the `sortBy` query value.  Missing or unknown values fall back
    /// to [`SortKey::Name`].
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value {
            Some("name") => SortKey::Name,
            Some("size") => SortKey::Size,
            Some("date") => SortKey::Date,
            _ => SortKey::default(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Date => "date",
        }
    }
}

/// Parameters of a single listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    /// 1-indexed page number.
    pub page: usize,
    /// Number of images per page.
    pub page_size: usize,
    pub ascending: bool,
    pub sort: SortKey,
}

/// Name and stat data of one image, gathered before sorting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

thread_local! {
    static COLLATOR: Option<Collator> =
        Collator::try_new(&Default::default(), CollatorOptions::new()).ok();
}

/// Order filenames by the Unicode root collation (accents and punctuation
/// placed as a locale-aware comparison would).  Names the collator finds
/// equal fall back to byte order so the result is total.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    COLLATOR
        .with(|collator| match collator {
            Some(collator) => collator.compare(a, b),
            None => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| b.cmp(a)),
        })
        .then_with(|| a.cmp(b))
}

/// Sort `entries` in place.  The sort is stable, so equal sizes or
/// timestamps keep their enumeration order.
pub fn sort_entries(entries: &mut [ImageEntry], key: SortKey, ascending: bool) {
    entries.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Name => compare_names(&a.name, &b.name),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Date => a.modified.cmp(&b.modified),
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

/// Index range `[(page-1)*page_size, page*page_size)` clamped to `total`.
///
/// `page` and `page_size` must be at least 1.
pub fn page_window(total: usize, page: usize, page_size: usize) -> Range<usize> {
    let start = (page - 1).saturating_mul(page_size).min(total);
    let end = page.saturating_mul(page_size).min(total);
    start..end
}

/// `ceil(total / page_size)`; `page_size` must be at least 1.
pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size)
}
