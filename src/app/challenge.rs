use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use super::driver::PageDriver;
use super::error::{CrawlError, ResumeError};

pub const DEFAULT_SIGNATURES: [&str; 2] = ["You have been blocked", "captcha"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Clear,
    Blocked { signature: String },
}

/// Recognises anti-automation interstitials by substring. Case-sensitive.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    signatures: Vec<String>,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURES.iter().map(|s| s.to_string()).collect())
    }
}

impl ChallengeDetector {
    pub fn new(signatures: Vec<String>) -> Self {
        Self {
            signatures: signatures.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn check(&self, content: &str) -> Challenge {
        self.signatures
            .iter()
            .find(|signature| content.contains(signature.as_str()))
            .map(|signature| Challenge::Blocked {
                signature: signature.clone(),
            })
            .unwrap_or(Challenge::Clear)
    }
}

/// Something an operator can use to let a suspended crawl continue.
#[async_trait]
pub trait ResumeSignal: Send + Sync {
    /// Blocks until the operator says the page is usable again.
    async fn wait_for_resume(&self, notice: &str) -> Result<(), ResumeError>;
}

/// Waits for Enter on stdin. Ctrl-C cancels the wait.
///
/// One buffered reader lives as long as the crawl, so input typed ahead of a
/// later challenge is not lost between waits.
pub struct ConsoleResume<R = Stdin> {
    lines: Mutex<Lines<BufReader<R>>>,
}

impl ConsoleResume {
    pub fn new() -> Self {
        Self::from_reader(tokio::io::stdin())
    }
}

impl Default for ConsoleResume {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncRead + Unpin> ConsoleResume<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(reader).lines()),
        }
    }
}

#[async_trait]
impl<R> ResumeSignal for ConsoleResume<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn wait_for_resume(&self, notice: &str) -> Result<(), ResumeError> {
        eprintln!("{notice}");
        eprintln!("Solve it in the browser window, then press ENTER here to continue...");

        let mut lines = self.lines.lock().await;
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(_) => Ok(()),
                None => Err(ResumeError::Closed),
            },
            _ = tokio::signal::ctrl_c() => Err(ResumeError::Cancelled),
        }
    }
}

/// Resumes whenever a message arrives on the paired sender.
pub struct ChannelResume {
    rx: Mutex<mpsc::UnboundedReceiver<()>>,
}

impl ChannelResume {
    pub fn new() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl ResumeSignal for ChannelResume {
    async fn wait_for_resume(&self, notice: &str) -> Result<(), ResumeError> {
        info!(notice, "waiting for resume signal");
        self.rx.lock().await.recv().await.ok_or(ResumeError::Closed)
    }
}

/// Checks the page after navigation and parks the crawl while a challenge is
/// showing.
pub struct InterruptionHandler {
    detector: ChallengeDetector,
    resume: Box<dyn ResumeSignal>,
}

impl InterruptionHandler {
    pub fn new(detector: ChallengeDetector, resume: Box<dyn ResumeSignal>) -> Self {
        Self { detector, resume }
    }

    pub fn console() -> Self {
        Self::new(ChallengeDetector::default(), Box::new(ConsoleResume::new()))
    }

    pub fn check(&self, content: &str) -> Challenge {
        self.detector.check(content)
    }

    /// Returns what was seen; a `Blocked` result means the operator has
    /// already resumed.
    pub async fn guard<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        stage: &str,
    ) -> Result<Challenge, CrawlError> {
        let content = driver.page_source().await?;
        let seen = self.detector.check(&content);
        if let Challenge::Blocked { signature } = &seen {
            warn!(stage, signature = %signature, "challenge page detected, suspending");
            self.resume
                .wait_for_resume(&format!("Block/captcha detected during {stage} ({signature:?})."))
                .await?;
            info!(stage, "resumed by operator");
        }
        Ok(seen)
    }
}
