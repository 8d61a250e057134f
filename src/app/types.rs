use serde::Serialize;

/// Written in place of any field that could not be extracted.
pub const MISSING: &str = "N/A";

pub const LISTING_HEADERS: [&str; 4] = ["Name", "Rating", "Reviews", "URL"];
pub const DETAIL_HEADERS: [&str; 4] = ["Name", "Phone", "Website", "Yelp URL"];

/// A row that can live in a [`RecordStore`](super::store::RecordStore).
pub trait Record: Serialize {
    const HEADERS: &'static [&'static str];
    /// Header of the column holding the uniqueness key.
    const KEY_COLUMN: &'static str;

    fn key(&self) -> &str;
}

/// One search-result card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Rating")]
    pub rating: String,
    #[serde(rename = "Reviews")]
    pub review_count: String,
    #[serde(rename = "URL")]
    pub url: String,
}

impl Record for SummaryRecord {
    const HEADERS: &'static [&'static str] = &LISTING_HEADERS;
    const KEY_COLUMN: &'static str = "URL";

    fn key(&self) -> &str {
        &self.url
    }
}

/// Contact details read from a business page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Website")]
    pub website: String,
    #[serde(rename = "Yelp URL")]
    pub source_url: String,
}

impl Record for DetailRecord {
    const HEADERS: &'static [&'static str] = &DETAIL_HEADERS;
    const KEY_COLUMN: &'static str = "Yelp URL";

    fn key(&self) -> &str {
        &self.source_url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub name: String,
    pub url: String,
}

/// Per-page outcome counts for the listing crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTally {
    pub found: usize,
    /// Cards that yielded a record, whether new or already stored.
    pub considered: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingReport {
    pub pages: Vec<PageTally>,
}

impl ListingReport {
    pub fn pages_processed(&self) -> usize {
        self.pages.len()
    }

    pub fn total(&self) -> PageTally {
        self.pages.iter().fold(PageTally::default(), |acc, page| PageTally {
            found: acc.found + page.found,
            considered: acc.considered + page.considered,
            saved: acc.saved + page.saved,
            duplicates: acc.duplicates + page.duplicates,
            skipped: acc.skipped + page.skipped,
            failed: acc.failed + page.failed,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailReport {
    pub queued: usize,
    pub visited: usize,
    pub saved: usize,
    pub duplicates: usize,
    /// Entries skipped because the detail store already holds their URL.
    pub already_enriched: usize,
    pub failed: usize,
}
