use tracing::{debug, error, info, warn};

use super::CrawlContext;
use super::canonical::RedirectMode;
use super::driver::{Locator, PageDriver};
use super::error::{CrawlError, ExtractionError};
use super::listing::{FieldResult, or_missing};
use super::pacing;
use super::store::RecordStore;
use super::types::{DetailRecord, DetailReport, QueueEntry};

#[derive(Debug, Clone)]
pub struct DetailSelectors {
    pub hours_anchor: Locator,
    pub phone_label: Locator,
    pub website_label: Locator,
    pub website_link: Locator,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            hours_anchor: Locator::css(r##"a[href="#location-and-hours"]"##),
            phone_label: Locator::text("Phone number"),
            website_label: Locator::text("Business website"),
            website_link: Locator::css("a"),
        }
    }
}

/// Visits every queued business page once and records its contact details.
pub struct DetailCrawler<'a> {
    ctx: &'a CrawlContext,
    selectors: DetailSelectors,
}

impl<'a> DetailCrawler<'a> {
    pub fn new(ctx: &'a CrawlContext) -> Self {
        Self {
            ctx,
            selectors: DetailSelectors::default(),
        }
    }

    pub fn with_selectors(mut self, selectors: DetailSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub async fn run<D: PageDriver>(
        &self,
        driver: &mut D,
        queue: &[QueueEntry],
        store: &mut RecordStore<DetailRecord>,
    ) -> Result<DetailReport, CrawlError> {
        let mut report = DetailReport {
            queued: queue.len(),
            ..DetailReport::default()
        };
        info!(
            queued = queue.len(),
            enriched = store.len(),
            "starting detail crawl"
        );

        for (idx, entry) in queue.iter().enumerate() {
            if store.contains(&entry.url) {
                report.already_enriched += 1;
                debug!(name = %entry.name, url = %entry.url, "already enriched, skipping");
                continue;
            }

            info!(
                position = idx + 1,
                of = queue.len(),
                name = %entry.name,
                "visiting business page"
            );
            report.visited += 1;
            match self.enrich(driver, entry).await {
                Ok(record) => match store.append(&record) {
                    Ok(true) => {
                        report.saved += 1;
                        info!(
                            name = %record.name,
                            phone = %record.phone,
                            website = %record.website,
                            "saved details"
                        );
                    }
                    Ok(false) => {
                        report.duplicates += 1;
                        debug!(url = %entry.url, "details already stored");
                    }
                    Err(err) => {
                        report.failed += 1;
                        error!(url = %entry.url, error = %err, "failed to persist details");
                    }
                },
                Err(err) if err.is_fatal() => {
                    error!(url = %entry.url, error = %err, "aborting detail crawl");
                    return Err(err);
                }
                Err(err) => {
                    report.failed += 1;
                    error!(url = %entry.url, error = %err, "failed to process business page");
                }
            }

            self.ctx.pacer.pause(pacing::BETWEEN_DETAILS).await;
        }

        info!(
            queued = report.queued,
            visited = report.visited,
            saved = report.saved,
            duplicates = report.duplicates,
            already_enriched = report.already_enriched,
            failed = report.failed,
            "detail crawl finished"
        );
        Ok(report)
    }

    async fn enrich<D: PageDriver>(
        &self,
        driver: &mut D,
        entry: &QueueEntry,
    ) -> Result<DetailRecord, CrawlError> {
        driver.navigate(&entry.url).await?;
        self.ctx.pacer.pause(pacing::DETAIL_SETTLE).await;
        self.ctx.interrupts.guard(driver, "business page").await?;

        self.reveal_contact_block(driver).await?;

        let phone = escalate(self.phone(driver).await)?;
        let website = escalate(self.website(driver).await)?;
        Ok(DetailRecord {
            name: entry.name.clone(),
            phone: or_missing(phone, "phone", &entry.name),
            website: or_missing(website, "website", &entry.name),
            source_url: entry.url.clone(),
        })
    }

    /// Brings the contact sidebar into view the way a reader would.
    async fn reveal_contact_block<D: PageDriver>(&self, driver: &mut D) -> Result<(), CrawlError> {
        let outcome = match driver.find(None, &self.selectors.hours_anchor).await {
            Ok(Some(anchor)) => {
                let scrolled = driver.scroll_into_view(&anchor).await;
                self.ctx.pacer.pause(pacing::ANCHOR_DWELL).await;
                match scrolled {
                    Ok(()) => driver.hover(&anchor).await,
                    Err(err) => Err(err),
                }
            }
            Ok(None) => driver.scroll_by(300).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if err.is_connectivity() => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "could not scroll to contact block");
                Ok(())
            }
        }
    }

    async fn phone<D: PageDriver>(&self, driver: &mut D) -> FieldResult {
        let label = driver
            .find(None, &self.selectors.phone_label)
            .await?
            .ok_or(ExtractionError::Missing("phone label"))?;
        let value = driver
            .next_sibling(&label)
            .await?
            .ok_or(ExtractionError::Missing("phone value"))?;
        Ok(driver.text(&value).await?)
    }

    async fn website<D: PageDriver>(&self, driver: &mut D) -> FieldResult {
        let label = driver
            .find(None, &self.selectors.website_label)
            .await?
            .ok_or(ExtractionError::Missing("website label"))?;
        let value = driver
            .next_sibling(&label)
            .await?
            .ok_or(ExtractionError::Missing("website value"))?;
        let link = driver
            .find(Some(&value), &self.selectors.website_link)
            .await?
            .ok_or(ExtractionError::Missing("website link"))?;
        let href = driver.attribute(&link, "href").await?;
        Ok(self
            .ctx
            .canon
            .normalize(href.as_deref(), RedirectMode::Business))
    }
}

/// Lets a field fall back to the sentinel unless the session itself is gone.
fn escalate(field: FieldResult) -> Result<FieldResult, ExtractionError> {
    match field {
        Err(err) if err.is_connectivity() => Err(err),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::app::canonical::Canonicalizer;
    use crate::app::challenge::{ChallengeDetector, ChannelResume, InterruptionHandler};
    use crate::app::error::ResumeError;
    use crate::app::pacing::Pacer;
    use crate::app::testing::FixtureDriver;

    const LUNA: &str = "https://www.yelp.com/biz/luna-trattoria-hoboken";
    const HARBOR: &str = "https://www.yelp.com/biz/harbor-grill-newark";
    const CORNER: &str = "https://www.yelp.com/biz/corner-cafe-trenton";

    fn business_page(phone: Option<&str>, website: Option<&str>) -> String {
        let phone = phone
            .map(|phone| format!("<div><p>Phone number</p><p>{phone}</p></div>"))
            .unwrap_or_default();
        let website = website
            .map(|href| {
                format!(r#"<div><p>Business website</p><p><a href="{href}">visit</a></p></div>"#)
            })
            .unwrap_or_default();
        format!(
            r##"<html><body>
                 <a href="#location-and-hours">Location &amp; Hours</a>
                 <aside>{website}{phone}</aside>
               </body></html>"##
        )
    }

    fn queue() -> Vec<QueueEntry> {
        [("Luna Trattoria", LUNA), ("Harbor Grill", HARBOR), ("Corner Cafe", CORNER)]
            .into_iter()
            .map(|(name, url)| QueueEntry {
                name: name.to_string(),
                url: url.to_string(),
            })
            .collect()
    }

    fn site() -> FixtureDriver {
        FixtureDriver::new()
            .page(
                LUNA,
                &business_page(
                    Some("(201) 555-0100"),
                    Some("/biz_redir?url=https%3A%2F%2Flunatrattoria.example%2Fmenu&cachebuster=17"),
                ),
            )
            .page(HARBOR, &business_page(Some("(973) 555-0199"), None))
            .page(
                CORNER,
                "<html><body><p>Corner Cafe has no contact info</p></body></html>",
            )
    }

    fn context() -> (tokio::sync::mpsc::UnboundedSender<()>, CrawlContext) {
        let (tx, resume) = ChannelResume::new();
        let ctx = CrawlContext {
            pacer: Pacer::instant(),
            canon: Canonicalizer::default(),
            interrupts: InterruptionHandler::new(ChallengeDetector::default(), Box::new(resume)),
        };
        (tx, ctx)
    }

    #[tokio::test]
    async fn drains_queue_visiting_each_entry_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("details.csv");
        let (_tx, ctx) = context();
        let mut driver = site();
        let mut store = RecordStore::open(&path).unwrap();

        let report = DetailCrawler::new(&ctx)
            .run(&mut driver, &queue(), &mut store)
            .await
            .unwrap();

        assert_eq!(report.queued, 3);
        assert_eq!(report.visited, 3);
        assert_eq!(report.saved, 3);
        assert_eq!(driver.visits, vec![LUNA, HARBOR, CORNER]);

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written.lines().collect::<Vec<_>>(),
            vec![
                "Name,Phone,Website,Yelp URL",
                "Luna Trattoria,(201) 555-0100,https://lunatrattoria.example/menu,https://www.yelp.com/biz/luna-trattoria-hoboken",
                "Harbor Grill,(973) 555-0199,N/A,https://www.yelp.com/biz/harbor-grill-newark",
                "Corner Cafe,N/A,N/A,https://www.yelp.com/biz/corner-cafe-trenton",
            ]
        );
    }

    #[tokio::test]
    async fn failing_url_is_counted_and_the_queue_moves_on() {
        let dir = tempdir().unwrap();
        let (_tx, ctx) = context();
        let mut driver = site().unreachable(HARBOR);
        let mut store = RecordStore::open(dir.path().join("details.csv")).unwrap();

        let report = DetailCrawler::new(&ctx)
            .run(&mut driver, &queue(), &mut store)
            .await
            .unwrap();

        assert_eq!(report.visited, 3);
        assert_eq!(report.saved, 2);
        assert_eq!(report.failed, 1);
        assert!(!store.contains(HARBOR));
        assert!(store.contains(CORNER));
    }

    #[tokio::test]
    async fn unwritable_store_counts_failures_and_drains_the_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("details.csv");
        let mut holder = RecordStore::<DetailRecord>::open(&path).unwrap();
        holder.claim().unwrap();
        let (_tx, ctx) = context();
        let mut driver = site();
        let mut store = RecordStore::open(&path).unwrap();

        let report = DetailCrawler::new(&ctx)
            .run(&mut driver, &queue(), &mut store)
            .await
            .unwrap();

        assert_eq!(report.visited, 3);
        assert_eq!(report.saved, 0);
        assert_eq!(report.failed, 3);
        assert_eq!(driver.visits, vec![LUNA, HARBOR, CORNER]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rerun_skips_enriched_entries_without_navigating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("details.csv");
        let (_tx, ctx) = context();
        {
            let mut store = RecordStore::open(&path).unwrap();
            DetailCrawler::new(&ctx)
                .run(&mut site().unreachable(CORNER), &queue(), &mut store)
                .await
                .unwrap();
        }

        let mut driver = site();
        let mut store = RecordStore::open(&path).unwrap();
        let report = DetailCrawler::new(&ctx)
            .run(&mut driver, &queue(), &mut store)
            .await
            .unwrap();

        assert_eq!(report.already_enriched, 2);
        assert_eq!(report.visited, 1);
        assert_eq!(report.saved, 1);
        assert_eq!(driver.visits, vec![CORNER]);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 4);
    }

    #[tokio::test]
    async fn lost_session_aborts_the_run() {
        let dir = tempdir().unwrap();
        let (_tx, ctx) = context();
        let mut driver = site().crash_on(HARBOR);
        let mut store = RecordStore::open(dir.path().join("details.csv")).unwrap();

        let err = DetailCrawler::new(&ctx)
            .run(&mut driver, &queue(), &mut store)
            .await
            .unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(driver.visits, vec![LUNA, HARBOR]);
        assert!(store.contains(LUNA));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn closed_resume_channel_aborts_on_challenge() {
        let dir = tempdir().unwrap();
        let (tx, ctx) = context();
        drop(tx);
        let mut driver = site().page(LUNA, "<p>You have been blocked</p>");
        let mut store = RecordStore::open(dir.path().join("details.csv")).unwrap();

        let err = DetailCrawler::new(&ctx)
            .run(&mut driver, &queue(), &mut store)
            .await
            .unwrap_err();

        assert!(matches!(err, CrawlError::Resume(ResumeError::Closed)));
        assert_eq!(driver.visits, vec![LUNA]);
        assert!(store.is_empty());
    }
}
