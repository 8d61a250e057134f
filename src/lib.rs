//! Resumable browser-driven crawler for business listings.
//!
//! The listing crawl walks search result pages and writes one summary row per
//! business; the detail crawl revisits each row's page and writes its contact
//! details. Both append to CSV files that double as resume checkpoints.

pub mod app;
