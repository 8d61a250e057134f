use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::error::DriverError;

/// How to find an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    /// Innermost element whose own text contains the needle.
    Text(String),
}

impl Locator {
    pub fn css(selector: &str) -> Self {
        Locator::Css(selector.to_string())
    }

    pub fn text(needle: &str) -> Self {
        Locator::Text(needle.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css:{selector}"),
            Locator::Text(needle) => write!(f, "text:{needle}"),
        }
    }
}

/// Opaque reference to an element of the page the driver is showing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub(crate) String);

impl ElementHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// The primitive browser surface the crawlers drive.
///
/// Implementations own a single browser tab; every call acts on whatever page
/// that tab currently shows.
#[async_trait]
pub trait PageDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Rendered HTML of the current page.
    async fn page_source(&mut self) -> Result<String, DriverError>;

    async fn find_all(
        &mut self,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    async fn find(
        &mut self,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Option<ElementHandle>, DriverError> {
        Ok(self.find_all(scope, locator).await?.into_iter().next())
    }

    async fn next_sibling(
        &mut self,
        element: &ElementHandle,
    ) -> Result<Option<ElementHandle>, DriverError>;

    async fn text(&mut self, element: &ElementHandle) -> Result<String, DriverError>;

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Empties an input and fires an `input` event so the page notices.
    async fn clear(&mut self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn click(&mut self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn hover(&mut self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn move_pointer_by(
        &mut self,
        dx: i64,
        dy: i64,
        duration: Duration,
    ) -> Result<(), DriverError>;

    /// Sends keystrokes to whichever element has focus.
    async fn type_text(&mut self, text: &str) -> Result<(), DriverError>;

    async fn scroll_by(&mut self, dy: i64) -> Result<(), DriverError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError>;

    async fn scroll_into_view(&mut self, element: &ElementHandle) -> Result<(), DriverError>;
}
