//! In-memory page driver for crawler tests. Pages are plain HTML strings
//! keyed by URL; clicking an element with `data-goto` navigates to that URL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::challenge::ResumeSignal;
use super::driver::{ElementHandle, Locator, PageDriver};
use super::error::{DriverError, ResumeError};

/// Resumes immediately and counts how often it was asked to.
#[derive(Clone, Default)]
pub struct CountingResume(pub Arc<AtomicUsize>);

impl CountingResume {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResumeSignal for CountingResume {
    async fn wait_for_resume(&self, _notice: &str) -> Result<(), ResumeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FixtureDriver {
    pages: HashMap<String, String>,
    unreachable: HashSet<String>,
    crashing: HashSet<String>,
    session_lost: bool,
    current: Option<String>,
    /// Every URL passed to `navigate`, in order.
    pub visits: Vec<String>,
    /// Text typed into each field, split by `clear` calls.
    pub typed: Vec<String>,
    pub clicks: Vec<String>,
    pub pointer_moves: usize,
    pub scrolls: usize,
}

impl FixtureDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Navigating to `url` fails like a dropped network connection.
    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    /// Navigating to `url` kills the browser session.
    pub fn crash_on(mut self, url: &str) -> Self {
        self.crashing.insert(url.to_string());
        self
    }

    /// Every call after this one fails as if the browser session died.
    pub fn lose_session(&mut self) {
        self.session_lost = true;
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn check_session(&self) -> Result<(), DriverError> {
        if self.session_lost {
            return Err(DriverError::protocol(
                "invalid session id",
                "session deleted because of page crash",
            ));
        }
        Ok(())
    }

    fn with_page<T>(
        &self,
        f: impl FnOnce(&[ElementRef<'_>]) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        self.check_session()?;
        let html = self
            .current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .ok_or_else(|| DriverError::protocol("no such window", "nothing loaded"))?;
        let doc = Html::parse_document(html);
        let any = parse_selector("*")?;
        let all = doc.select(&any).collect::<Vec<_>>();
        f(&all)
    }

    fn load(&mut self, url: &str) -> Result<(), DriverError> {
        self.check_session()?;
        self.visits.push(url.to_string());
        if self.crashing.contains(url) {
            self.session_lost = true;
            return self.check_session();
        }
        if self.unreachable.contains(url) {
            return Err(DriverError::protocol(
                "unknown error",
                "net::ERR_CONNECTION_RESET",
            ));
        }
        if !self.pages.contains_key(url) {
            return Err(DriverError::protocol("unknown error", format!("no page at {url}")));
        }
        self.current = Some(url.to_string());
        Ok(())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, DriverError> {
    Selector::parse(selector)
        .map_err(|err| DriverError::protocol("invalid selector", format!("{selector}: {err:?}")))
}

fn resolve<'a>(
    all: &[ElementRef<'a>],
    handle: &ElementHandle,
) -> Result<ElementRef<'a>, DriverError> {
    handle
        .id()
        .parse::<usize>()
        .ok()
        .and_then(|idx| all.get(idx).copied())
        .ok_or_else(|| DriverError::protocol("stale element reference", handle.id()))
}

fn handle_of(all: &[ElementRef<'_>], element: &ElementRef<'_>) -> Option<ElementHandle> {
    all.iter()
        .position(|candidate| candidate == element)
        .map(|idx| ElementHandle(idx.to_string()))
}

fn own_text_contains(element: &ElementRef<'_>, needle: &str) -> bool {
    element
        .children()
        .filter_map(|child| child.value().as_text())
        .any(|text| text.contains(needle))
}

#[async_trait]
impl PageDriver for FixtureDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.load(url)
    }

    async fn page_source(&mut self) -> Result<String, DriverError> {
        self.check_session()?;
        Ok(self
            .current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .cloned()
            .unwrap_or_default())
    }

    async fn find_all(
        &mut self,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        self.with_page(|all| {
            let root = scope.map(|handle| resolve(all, handle)).transpose()?;
            let found = match locator {
                Locator::Css(selector) => {
                    let selector = parse_selector(selector)?;
                    match root {
                        Some(root) => root.select(&selector).collect::<Vec<_>>(),
                        None => all
                            .iter()
                            .copied()
                            .filter(|el| selector.matches(el))
                            .collect::<Vec<_>>(),
                    }
                }
                Locator::Text(needle) => match root {
                    Some(root) => root
                        .descendants()
                        .skip(1)
                        .filter_map(ElementRef::wrap)
                        .filter(|el| own_text_contains(el, needle))
                        .collect::<Vec<_>>(),
                    None => all
                        .iter()
                        .copied()
                        .filter(|el| own_text_contains(el, needle))
                        .collect::<Vec<_>>(),
                },
            };
            Ok(found.iter().filter_map(|el| handle_of(all, el)).collect())
        })
    }

    async fn next_sibling(
        &mut self,
        element: &ElementHandle,
    ) -> Result<Option<ElementHandle>, DriverError> {
        self.with_page(|all| {
            let el = resolve(all, element)?;
            Ok(el
                .next_siblings()
                .find_map(ElementRef::wrap)
                .and_then(|sibling| handle_of(all, &sibling)))
        })
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String, DriverError> {
        self.with_page(|all| {
            let el = resolve(all, element)?;
            if el.value().attr("data-fail").is_some() {
                return Err(DriverError::protocol(
                    "stale element reference",
                    "element is not attached to the page document",
                ));
            }
            Ok(el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" "))
        })
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        self.with_page(|all| {
            let el = resolve(all, element)?;
            Ok(el.value().attr(name).map(str::to_string))
        })
    }

    async fn clear(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.with_page(|all| resolve(all, element).map(|_| ()))?;
        self.typed.push(String::new());
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        let target = self.with_page(|all| {
            let el = resolve(all, element)?;
            Ok(el.value().attr("data-goto").map(str::to_string))
        })?;
        self.clicks.push(target.clone().unwrap_or_default());
        match target {
            Some(url) => self.load(&url),
            None => Ok(()),
        }
    }

    async fn hover(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.with_page(|all| resolve(all, element).map(|_| ()))?;
        self.pointer_moves += 1;
        Ok(())
    }

    async fn move_pointer_by(
        &mut self,
        _dx: i64,
        _dy: i64,
        _duration: Duration,
    ) -> Result<(), DriverError> {
        self.check_session()?;
        self.pointer_moves += 1;
        Ok(())
    }

    async fn type_text(&mut self, text: &str) -> Result<(), DriverError> {
        self.check_session()?;
        match self.typed.last_mut() {
            Some(field) => field.push_str(text),
            None => self.typed.push(text.to_string()),
        }
        Ok(())
    }

    async fn scroll_by(&mut self, _dy: i64) -> Result<(), DriverError> {
        self.check_session()?;
        self.scrolls += 1;
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        self.check_session()?;
        self.scrolls += 1;
        Ok(())
    }

    async fn scroll_into_view(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.with_page(|all| resolve(all, element).map(|_| ()))?;
        self.scrolls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <section id="info">
            <p>Phone number</p><p>(201) 555-0100</p>
            <p>Business website</p><p><a href="/biz_redir?url=https%3A%2F%2Fluna.example">luna.example</a></p>
          </section>
          <button data-goto="https://fixture.test/2">Next Page</button>
        </body></html>
    "#;

    #[tokio::test]
    async fn answers_css_and_text_lookups() {
        let mut driver = FixtureDriver::new()
            .page("https://fixture.test/1", PAGE)
            .page("https://fixture.test/2", "<p>second</p>");
        driver.navigate("https://fixture.test/1").await.unwrap();

        let label = driver
            .find(None, &Locator::text("Phone number"))
            .await
            .unwrap()
            .unwrap();
        let value = driver.next_sibling(&label).await.unwrap().unwrap();
        assert_eq!(driver.text(&value).await.unwrap(), "(201) 555-0100");

        let section = driver.find(None, &Locator::css("#info")).await.unwrap().unwrap();
        let links = driver
            .find_all(Some(&section), &Locator::css("a"))
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(
            driver.attribute(&links[0], "href").await.unwrap().as_deref(),
            Some("/biz_redir?url=https%3A%2F%2Fluna.example")
        );

        let next = driver.find(None, &Locator::text("Next Page")).await.unwrap().unwrap();
        driver.click(&next).await.unwrap();
        assert_eq!(driver.current_url(), Some("https://fixture.test/2"));
    }

    #[tokio::test]
    async fn lost_session_fails_every_call() {
        let mut driver = FixtureDriver::new().page("https://fixture.test/1", PAGE);
        driver.navigate("https://fixture.test/1").await.unwrap();
        driver.lose_session();
        let err = driver.page_source().await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
