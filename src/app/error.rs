use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the browser session.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("webdriver unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("webdriver request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{error}: {message}")]
    Protocol { error: String, message: String },

    #[error("unexpected webdriver response: {0}")]
    Malformed(String),
}

impl DriverError {
    pub fn protocol(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            error: error.into(),
            message: message.into(),
        }
    }

    /// True when the session itself is gone, as opposed to a single command
    /// failing against the current page.
    pub fn is_connectivity(&self) -> bool {
        match self {
            DriverError::Unreachable { .. } => true,
            DriverError::Transport(err) => err.is_connect(),
            DriverError::Protocol { error, .. } => {
                matches!(error.as_str(), "invalid session id" | "session not created")
            }
            DriverError::Malformed(_) => false,
        }
    }
}

/// Why a single field or item could not be read from the page.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{0} not found")]
    Missing(&'static str),

    #[error("{0} is empty")]
    Empty(&'static str),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ExtractionError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ExtractionError::Driver(err) if err.is_connectivity())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{0} is locked by another bizcrawl process")]
    Locked(PathBuf),

    #[error("input file {0} not found")]
    MissingInput(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("operator cancelled the run while it was suspended")]
    Cancelled,

    #[error("resume channel closed while waiting for the operator")]
    Closed,

    #[error("failed reading operator input: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no chrome binary found; pass --chrome or set BIZCRAWL_CHROME")]
    BrowserNotFound,

    #[error("no chromedriver binary found; pass --chromedriver")]
    DriverNotFound,

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("{binary} did not become ready: {reason}")]
    NotReady { binary: String, reason: String },

    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error("page control missing: {0}")]
    MissingControl(&'static str),
}

impl CrawlError {
    /// Errors after which no further browser work can succeed.
    pub fn is_connectivity(&self) -> bool {
        match self {
            CrawlError::Driver(err) => err.is_connectivity(),
            CrawlError::Extraction(err) => err.is_connectivity(),
            _ => false,
        }
    }

    /// Errors that must end the run instead of skipping the current item.
    pub fn is_fatal(&self) -> bool {
        self.is_connectivity() || matches!(self, CrawlError::Resume(_))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("invalid option: {0}")]
    Config(String),
}
