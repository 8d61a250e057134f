//! Local processes the crawl depends on: the operator's Chrome with remote
//! debugging enabled, and a chromedriver that bridges WebDriver to it.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::error::LaunchError;
use super::webdriver::webdriver_reachable;

pub const DEFAULT_DEBUGGING_PORT: u16 = 9222;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How to start a Chrome that the crawl commands can attach to later.
#[derive(Debug, Clone)]
pub struct ChromeLaunch {
    pub binary: Option<PathBuf>,
    pub profile_dir: PathBuf,
    pub debugging_port: u16,
    pub home_url: String,
}

impl ChromeLaunch {
    pub fn args(&self) -> Vec<String> {
        vec![
            format!("--remote-debugging-port={}", self.debugging_port),
            format!("--user-data-dir={}", self.profile_dir.display()),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
            self.home_url.clone(),
        ]
    }

    /// Creates the profile directory and starts Chrome detached from this
    /// process. The browser keeps running after bizcrawl exits.
    pub fn spawn(&self) -> Result<Child, LaunchError> {
        let binary = self
            .binary
            .clone()
            .or_else(detect_chrome_binary)
            .ok_or(LaunchError::BrowserNotFound)?;

        fs::create_dir_all(&self.profile_dir)?;
        info!(
            binary = %binary.display(),
            profile = %self.profile_dir.display(),
            port = self.debugging_port,
            "launching chrome"
        );
        Command::new(&binary)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                binary: binary.display().to_string(),
                source,
            })
    }
}

pub fn detect_chrome_binary() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("CHROME_BIN") {
        let p = PathBuf::from(v);
        if p.exists() {
            return Some(p);
        }
    }
    #[cfg(target_os = "macos")]
    {
        let p = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if p.exists() {
            return Some(p);
        }
    }
    #[cfg(target_os = "windows")]
    {
        for base in ["ProgramFiles", "ProgramFiles(x86)", "LocalAppData"] {
            if let Ok(dir) = std::env::var(base) {
                let p = Path::new(&dir).join(r"Google\Chrome\Application\chrome.exe");
                if p.exists() {
                    return Some(p);
                }
            }
        }
    }
    [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
        "chrome",
    ]
    .into_iter()
    .find_map(which_binary_path)
}

fn which_binary_path(name: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(finder).arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8(output.stdout).ok()?;
    let p = PathBuf::from(path.lines().next()?.trim());
    if p.exists() { Some(p) } else { None }
}

pub fn cache_dir() -> Result<PathBuf, LaunchError> {
    for var in ["XDG_CACHE_HOME", "HOME", "USERPROFILE"] {
        if let Ok(dir) = std::env::var(var)
            && !dir.is_empty()
        {
            let base = Path::new(&dir);
            return Ok(if var == "XDG_CACHE_HOME" {
                base.join("bizcrawl")
            } else {
                base.join(".cache/bizcrawl")
            });
        }
    }
    Err(LaunchError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "cannot determine home directory for the bizcrawl cache",
    )))
}

/// Persistent Chrome profile so cookies and solved challenges survive runs.
pub fn default_profile_dir() -> PathBuf {
    cache_dir()
        .map(|dir| dir.join("chrome-profile"))
        .unwrap_or_else(|_| PathBuf::from("ChromeBotProfile"))
}

/// Settings for starting chromedriver when nothing answers on the endpoint.
#[derive(Debug, Clone)]
pub struct DriverAutostart {
    pub enabled: bool,
    pub binary: Option<String>,
    pub start_timeout: Duration,
}

/// A chromedriver started by this process. Killed when dropped.
#[derive(Debug)]
pub struct DriverProcess {
    child: Child,
    port: u16,
    log_path: PathBuf,
}

impl DriverProcess {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        debug!(port = self.port, "stopping chromedriver");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Makes sure a WebDriver server answers on `endpoint`, starting a local
/// chromedriver if allowed. `None` means someone else owns the server, or
/// autostart did not apply and connecting will report the problem.
pub async fn ensure_webdriver(
    endpoint: &str,
    autostart: &DriverAutostart,
) -> Result<Option<DriverProcess>, LaunchError> {
    if webdriver_reachable(endpoint) {
        debug!(endpoint, "webdriver already running");
        return Ok(None);
    }
    if !autostart.enabled {
        return Ok(None);
    }
    let Some(port) = local_port(endpoint) else {
        warn!(endpoint, "autostart only supports localhost endpoints");
        return Ok(None);
    };

    let binary = autostart
        .binary
        .clone()
        .unwrap_or_else(|| "chromedriver".to_string());
    if !binary_available(&binary) {
        return Err(LaunchError::DriverNotFound);
    }

    let log_path = driver_log_path(port)?;
    let log_file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)?;
    let log_file_err = log_file.try_clone()?;

    info!(%binary, port, log = %log_path.display(), "starting chromedriver");
    let child = Command::new(&binary)
        .arg(format!("--port={port}"))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            binary: binary.clone(),
            source,
        })?;
    let mut process = DriverProcess {
        child,
        port,
        log_path,
    };

    let steps = (autostart.start_timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1);
    for _ in 0..steps {
        if webdriver_reachable(endpoint) {
            info!(port, "chromedriver ready");
            return Ok(Some(process));
        }
        if let Ok(Some(status)) = process.child.try_wait() {
            let tail = read_log_tail(&process.log_path, 5).unwrap_or_default();
            return Err(LaunchError::NotReady {
                binary,
                reason: format!("exited with {status}: {tail}"),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let tail = read_log_tail(&process.log_path, 5).unwrap_or_default();
    Err(LaunchError::NotReady {
        binary,
        reason: format!(
            "not reachable after {}ms: {tail}",
            autostart.start_timeout.as_millis()
        ),
    })
}

fn local_port(endpoint: &str) -> Option<u16> {
    let parsed = Url::parse(endpoint).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if host != "localhost" && host != "127.0.0.1" {
        return None;
    }
    parsed.port_or_known_default()
}

fn binary_available(bin: &str) -> bool {
    let p = Path::new(bin);
    if p.components().count() > 1 || p.is_absolute() {
        return p.exists();
    }
    Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn driver_log_path(port: u16) -> Result<PathBuf, LaunchError> {
    let dir = cache_dir()?;
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("chromedriver-{port}.log")))
}

fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let mut tail = text.lines().rev().take(lines.max(1)).collect::<Vec<_>>();
    tail.reverse();
    let tail = tail.join(" | ");
    if tail.is_empty() { None } else { Some(tail) }
}
