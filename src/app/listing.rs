use tracing::{debug, error, info, warn};

use super::CrawlContext;
use super::canonical::RedirectMode;
use super::driver::{ElementHandle, Locator, PageDriver};
use super::error::{CrawlError, DriverError, ExtractionError};
use super::pacing;
use super::store::RecordStore;
use super::types::{ListingReport, MISSING, PageTally, SummaryRecord};

/// Where the crawl begins.
#[derive(Debug, Clone)]
pub enum SearchEntry {
    /// Open the home page and submit the search form like a visitor would.
    Form {
        home_url: String,
        query: String,
        location: String,
    },
    /// Go straight to an already built results URL.
    Direct { url: String },
}

/// Locators for the search results layout.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    pub query_input: Locator,
    pub location_input: Locator,
    pub submit: Locator,
    pub card: Locator,
    pub card_fallback: Locator,
    pub name_link: Locator,
    pub rating_box: Locator,
    pub rating_part: Locator,
    pub next_page: Locator,
    pub next_page_fallback: Locator,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            query_input: Locator::css("#search_description"),
            location_input: Locator::css("#search_location"),
            submit: Locator::css(r#"button[type="submit"]"#),
            card: Locator::css(r#"div[data-testid="serp-ia-card"]"#),
            card_fallback: Locator::css(r#"ul[class*="list__"] > li"#),
            name_link: Locator::css("h3 a"),
            rating_box: Locator::css(r#"div[data-traffic-crawl-id="SearchResultBizRating"]"#),
            rating_part: Locator::css("span"),
            next_page: Locator::css(r#"button[class*="pagination-button"][value="submit"]"#),
            next_page_fallback: Locator::text("Next Page"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListingState {
    Start,
    LoadHome,
    Warmup,
    IssueSearch,
    ExtractPage { page: usize },
    AdvancePage { page: usize },
    End,
}

/// Walks search result pages until no "next page" control is left.
pub struct ListingCrawler<'a> {
    ctx: &'a CrawlContext,
    entry: SearchEntry,
    selectors: ListingSelectors,
}

impl<'a> ListingCrawler<'a> {
    pub fn new(ctx: &'a CrawlContext, entry: SearchEntry) -> Self {
        Self {
            ctx,
            entry,
            selectors: ListingSelectors::default(),
        }
    }

    pub fn with_selectors(mut self, selectors: ListingSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub async fn run<D: PageDriver>(
        &self,
        driver: &mut D,
        store: &mut RecordStore<SummaryRecord>,
    ) -> Result<ListingReport, CrawlError> {
        let mut report = ListingReport::default();
        let mut state = ListingState::Start;

        loop {
            debug!(?state, "listing state");
            state = match state {
                ListingState::Start => match &self.entry {
                    SearchEntry::Form { .. } => ListingState::LoadHome,
                    SearchEntry::Direct { url } => {
                        info!(%url, "opening search results");
                        driver.navigate(url).await?;
                        self.ctx.pacer.pause(pacing::RESULTS_SETTLE).await;
                        ListingState::ExtractPage { page: 1 }
                    }
                },
                ListingState::LoadHome => {
                    let home_url = match &self.entry {
                        SearchEntry::Form { home_url, .. } => home_url.as_str(),
                        SearchEntry::Direct { url } => url.as_str(),
                    };
                    info!(%home_url, "loading home page");
                    driver.navigate(home_url).await?;
                    self.ctx.pacer.pause(pacing::HOME_SETTLE).await;
                    self.ctx.interrupts.guard(driver, "home page").await?;
                    ListingState::Warmup
                }
                ListingState::Warmup => {
                    debug!("warming up");
                    driver.scroll_by(400).await?;
                    self.ctx.pacer.pause(pacing::WARMUP_STEP).await;
                    driver.scroll_by(-200).await?;
                    ListingState::IssueSearch
                }
                ListingState::IssueSearch => {
                    self.issue_search(driver).await?;
                    ListingState::ExtractPage { page: 1 }
                }
                ListingState::ExtractPage { page } => {
                    let tally = self.extract_page(driver, store, page).await?;
                    report.pages.push(tally);
                    ListingState::AdvancePage { page }
                }
                ListingState::AdvancePage { page } => {
                    if self.advance_page(driver).await? {
                        self.ctx.pacer.pause(pacing::BETWEEN_PAGES).await;
                        ListingState::ExtractPage { page: page + 1 }
                    } else {
                        info!(page, "no next page control, end of results");
                        ListingState::End
                    }
                }
                ListingState::End => break,
            };
        }

        let total = report.total();
        info!(
            pages = report.pages_processed(),
            found = total.found,
            saved = total.saved,
            duplicates = total.duplicates,
            skipped = total.skipped,
            failed = total.failed,
            "listing crawl finished"
        );
        Ok(report)
    }

    async fn issue_search<D: PageDriver>(&self, driver: &mut D) -> Result<(), CrawlError> {
        let SearchEntry::Form {
            query, location, ..
        } = &self.entry
        else {
            return Ok(());
        };

        self.fill_field(driver, &self.selectors.query_input, query)
            .await?;
        self.fill_field(driver, &self.selectors.location_input, location)
            .await?;

        let submit = driver
            .find(None, &self.selectors.submit)
            .await?
            .ok_or(CrawlError::MissingControl("search submit button"))?;
        info!(%query, %location, "submitting search");
        driver.hover(&submit).await?;
        self.jitter(driver).await?;
        driver.click(&submit).await?;
        self.ctx.pacer.pause(pacing::RESULTS_SETTLE).await;
        Ok(())
    }

    async fn fill_field<D: PageDriver>(
        &self,
        driver: &mut D,
        locator: &Locator,
        text: &str,
    ) -> Result<(), CrawlError> {
        let Some(field) = driver.find(None, locator).await? else {
            warn!(%locator, "search field not found, leaving it as is");
            return Ok(());
        };

        driver.clear(&field).await?;
        self.ctx.pacer.pause(pacing::FIELD_CLEARED).await;

        driver.hover(&field).await?;
        self.jitter(driver).await?;
        driver.click(&field).await?;
        debug!(%locator, text, "typing");
        for ch in text.chars() {
            let mut buf = [0u8; 4];
            driver.type_text(ch.encode_utf8(&mut buf)).await?;
            self.ctx.pacer.pause(pacing::KEYSTROKE).await;
        }
        self.ctx.pacer.pause(pacing::FIELD_TYPED).await;
        Ok(())
    }

    async fn extract_page<D: PageDriver>(
        &self,
        driver: &mut D,
        store: &mut RecordStore<SummaryRecord>,
        page: usize,
    ) -> Result<PageTally, CrawlError> {
        info!(page, "processing results page");
        self.ctx.interrupts.guard(driver, "results page").await?;

        driver.scroll_by(500).await?;
        self.ctx.pacer.pause(pacing::PAGE_SCROLL).await;

        let mut cards = driver.find_all(None, &self.selectors.card).await?;
        if cards.is_empty() {
            debug!(page, "primary card locator found nothing, trying fallback");
            cards = driver.find_all(None, &self.selectors.card_fallback).await?;
        }

        let mut tally = PageTally {
            found: cards.len(),
            ..PageTally::default()
        };
        for card in &cards {
            let record = match self.extract_card(driver, card).await {
                Ok(record) => record,
                Err(err) if err.is_connectivity() => return Err(err.into()),
                Err(ExtractionError::Missing(what)) => {
                    warn!(page, what, "card without listing data skipped");
                    tally.skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(page, error = %err, "card extraction failed, skipping");
                    tally.skipped += 1;
                    continue;
                }
            };

            tally.considered += 1;
            match store.append(&record) {
                Ok(true) => {
                    tally.saved += 1;
                    info!(
                        name = %record.name,
                        rating = %record.rating,
                        reviews = %record.review_count,
                        "saved listing"
                    );
                }
                Ok(false) => {
                    tally.duplicates += 1;
                    debug!(name = %record.name, url = %record.url, "duplicate listing skipped");
                }
                Err(err) => {
                    tally.failed += 1;
                    error!(name = %record.name, url = %record.url, error = %err, "failed to persist listing");
                }
            }
        }

        info!(
            page,
            found = tally.found,
            considered = tally.considered,
            saved = tally.saved,
            "page processed"
        );
        Ok(tally)
    }

    async fn extract_card<D: PageDriver>(
        &self,
        driver: &mut D,
        card: &ElementHandle,
    ) -> Result<SummaryRecord, ExtractionError> {
        let link = driver
            .find(Some(card), &self.selectors.name_link)
            .await?
            .ok_or(ExtractionError::Missing("name link"))?;

        let name = driver.text(&link).await?.trim().to_string();
        if name.is_empty() {
            return Err(ExtractionError::Empty("name"));
        }

        let href = driver.attribute(&link, "href").await?;
        let url = self.ctx.canon.normalize(href.as_deref(), RedirectMode::Ad);
        if url == MISSING {
            return Err(ExtractionError::Missing("listing href"));
        }

        let (rating, reviews) = self.rating_parts(driver, card).await?;
        Ok(SummaryRecord {
            rating: or_missing(rating, "rating", &name),
            review_count: or_missing(reviews, "reviews", &name),
            name,
            url,
        })
    }

    /// Rating and review count are the first two spans of the rating box.
    async fn rating_parts<D: PageDriver>(
        &self,
        driver: &mut D,
        card: &ElementHandle,
    ) -> Result<(FieldResult, FieldResult), ExtractionError> {
        let rating_box = match driver.find(Some(card), &self.selectors.rating_box).await {
            Ok(Some(rating_box)) => rating_box,
            Ok(None) => {
                return Ok((
                    Err(ExtractionError::Missing("rating box")),
                    Err(ExtractionError::Missing("rating box")),
                ));
            }
            Err(err) => return broken_rating_box(err),
        };
        let parts = match driver
            .find_all(Some(&rating_box), &self.selectors.rating_part)
            .await
        {
            Ok(parts) => parts,
            Err(err) => return broken_rating_box(err),
        };

        let rating = read_part(driver, parts.first(), "rating").await?;
        let reviews = read_part(driver, parts.get(1), "review count").await?;
        Ok((rating, reviews))
    }

    async fn advance_page<D: PageDriver>(&self, driver: &mut D) -> Result<bool, CrawlError> {
        debug!("looking for next page control");
        driver.scroll_to_bottom().await?;
        self.ctx.pacer.pause(pacing::BEFORE_PAGINATION).await;

        let mut next = driver.find(None, &self.selectors.next_page).await?;
        if next.is_none() {
            next = driver.find(None, &self.selectors.next_page_fallback).await?;
        }
        let Some(next) = next else {
            return Ok(false);
        };

        driver.scroll_into_view(&next).await?;
        self.ctx.pacer.pause(pacing::SCROLL_SETTLE).await;
        driver.hover(&next).await?;
        self.ctx.pacer.pause(pacing::HOVER_DWELL).await;
        self.jitter(driver).await?;

        info!("clicking next page");
        driver.click(&next).await?;
        self.ctx.pacer.pause(pacing::PAGE_LOAD).await;
        Ok(true)
    }

    /// Wiggles the pointer. Failures only matter if the session is gone.
    async fn jitter<D: PageDriver>(&self, driver: &mut D) -> Result<(), CrawlError> {
        let (dx, dy, duration) = self.ctx.pacer.jitter();
        match driver.move_pointer_by(dx, dy, duration).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_connectivity() => Err(err.into()),
            Err(err) => {
                debug!(error = %err, "pointer jitter ignored");
                Ok(())
            }
        }
    }
}

pub(crate) type FieldResult = Result<String, ExtractionError>;

fn broken_rating_box(err: DriverError) -> Result<(FieldResult, FieldResult), ExtractionError> {
    if err.is_connectivity() {
        return Err(err.into());
    }
    Ok((Err(err.into()), Err(ExtractionError::Missing("review count"))))
}

/// Reads one rating span. Only a lost session escapes as an error.
async fn read_part<D: PageDriver>(
    driver: &mut D,
    span: Option<&ElementHandle>,
    what: &'static str,
) -> Result<FieldResult, ExtractionError> {
    let Some(span) = span else {
        return Ok(Err(ExtractionError::Missing(what)));
    };
    match driver.text(span).await {
        Ok(text) => Ok(Ok(text)),
        Err(err) if err.is_connectivity() => Err(err.into()),
        Err(err) => Ok(Err(err.into())),
    }
}

/// Substitutes the sentinel for a field that could not be read. Absent
/// fields are expected; anything else is worth a warning.
pub(crate) fn or_missing(field: FieldResult, label: &'static str, name: &str) -> String {
    match field {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        Ok(_) => MISSING.to_string(),
        Err(ExtractionError::Missing(_)) | Err(ExtractionError::Empty(_)) => {
            debug!(field = label, %name, "field absent");
            MISSING.to_string()
        }
        Err(err) => {
            warn!(field = label, %name, error = %err, "field extraction failed");
            MISSING.to_string()
        }
    }
}
