pub mod canonical;
pub mod challenge;
pub mod config;
pub mod detail;
pub mod driver;
pub mod error;
pub mod launcher;
pub mod listing;
pub mod pacing;
mod runtime;
pub mod store;
pub mod types;
pub mod webdriver;

#[cfg(test)]
mod testing;

pub use runtime::run;

/// Shared collaborators for one crawl run.
pub struct CrawlContext {
    pub pacer: pacing::Pacer,
    pub canon: canonical::Canonicalizer,
    pub interrupts: challenge::InterruptionHandler,
}
