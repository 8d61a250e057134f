use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::canonical::DEFAULT_ORIGIN;
use super::error::AppError;
use super::launcher::{DEFAULT_DEBUGGING_PORT, DriverAutostart};
use super::listing::SearchEntry;
use super::pacing::MAX_SCALE;

pub const DEFAULT_LISTING_FILE: &str = "yelp_restaurants_nj2.csv";
pub const DEFAULT_DETAIL_FILE: &str = "yelp_final_data.csv";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "bizcrawl",
    version,
    about = "Resumable browser-driven crawler for business listings with CSV output"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start Chrome with remote debugging on a persistent profile.
    Launch(LaunchArgs),
    /// Walk search result pages and collect listing summaries.
    Listings(ListingArgs),
    /// Visit every collected listing and record its contact details.
    Details(DetailArgs),
}

#[derive(Debug, Args, Clone)]
pub struct LaunchArgs {
    #[arg(long, value_name = "PATH", env = "BIZCRAWL_CHROME")]
    pub chrome: Option<PathBuf>,

    /// Defaults to a profile under the bizcrawl cache directory.
    #[arg(long, value_name = "DIR", env = "BIZCRAWL_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,

    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_DEBUGGING_PORT)]
    pub debugging_port: u16,

    #[arg(long, value_name = "URL", default_value = DEFAULT_ORIGIN)]
    pub home_url: String,
}

/// Options shared by every command that drives the browser.
#[derive(Debug, Args, Clone)]
pub struct BrowserArgs {
    #[arg(
        long,
        value_name = "URL",
        env = "BIZCRAWL_WEBDRIVER_URL",
        default_value = "http://localhost:9515"
    )]
    pub webdriver_url: String,

    /// Host:port of the Chrome started by `bizcrawl launch`.
    #[arg(
        long,
        value_name = "ADDR",
        env = "BIZCRAWL_DEBUGGER_ADDRESS",
        default_value = "127.0.0.1:9222"
    )]
    pub debugger_address: String,

    #[arg(long, value_name = "PATH", env = "BIZCRAWL_CHROMEDRIVER")]
    pub chromedriver: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_driver_autostart: bool,

    #[arg(long, value_name = "MS", default_value_t = 12000)]
    pub driver_start_timeout_ms: u64,

    /// Multiplier for every human-like pause; 0 disables pacing.
    #[arg(long, value_name = "FACTOR", env = "BIZCRAWL_PACE", default_value_t = 1.0)]
    pub pace: f64,

    /// Site origin used to absolutize relative listing links.
    #[arg(long, value_name = "URL", default_value = DEFAULT_ORIGIN)]
    pub origin: String,
}

impl BrowserArgs {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.pace.is_finite() || !(0.0..=MAX_SCALE).contains(&self.pace) {
            return Err(AppError::Config(format!(
                "--pace must be between 0 and {MAX_SCALE}, got {}",
                self.pace
            )));
        }
        url::Url::parse(&self.webdriver_url)
            .map_err(|e| AppError::Config(format!("--webdriver-url {}: {e}", self.webdriver_url)))?;
        url::Url::parse(&self.origin)
            .map_err(|e| AppError::Config(format!("--origin {}: {e}", self.origin)))?;
        Ok(())
    }

    pub fn autostart(&self) -> DriverAutostart {
        DriverAutostart {
            enabled: !self.no_driver_autostart,
            binary: self.chromedriver.clone(),
            start_timeout: Duration::from_millis(self.driver_start_timeout_ms),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ListingArgs {
    #[command(flatten)]
    pub browser: BrowserArgs,

    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_LISTING_FILE)]
    pub output: PathBuf,

    #[arg(long, default_value = "Restaurants")]
    pub query: String,

    #[arg(long, default_value = "New Jersey")]
    pub location: String,

    /// Skip the search form and start from this results URL.
    #[arg(long, value_name = "URL")]
    pub search_url: Option<String>,
}

impl ListingArgs {
    pub fn entry(&self) -> SearchEntry {
        match &self.search_url {
            Some(url) => SearchEntry::Direct { url: url.clone() },
            None => SearchEntry::Form {
                home_url: self.browser.origin.clone(),
                query: self.query.clone(),
                location: self.location.clone(),
            },
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct DetailArgs {
    #[command(flatten)]
    pub browser: BrowserArgs,

    /// Listing file produced by `bizcrawl listings`.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_LISTING_FILE)]
    pub input: PathBuf,

    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_DETAIL_FILE)]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn listings_defaults() {
        let cli = Cli::try_parse_from(["bizcrawl", "listings"]).unwrap();
        let Command::Listings(args) = cli.command else {
            panic!("expected listings");
        };
        assert_eq!(args.output, PathBuf::from(DEFAULT_LISTING_FILE));
        assert_eq!(args.browser.debugger_address, "127.0.0.1:9222");
        assert!(args.browser.autostart().enabled);
        match args.entry() {
            SearchEntry::Form {
                home_url,
                query,
                location,
            } => {
                assert_eq!(home_url, DEFAULT_ORIGIN);
                assert_eq!(query, "Restaurants");
                assert_eq!(location, "New Jersey");
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn search_url_skips_the_form() {
        let cli = Cli::try_parse_from([
            "bizcrawl",
            "listings",
            "--search-url",
            "https://www.yelp.com/search?find_desc=Pizza",
            "--pace",
            "0",
        ])
        .unwrap();
        let Command::Listings(args) = cli.command else {
            panic!("expected listings");
        };
        assert!(matches!(args.entry(), SearchEntry::Direct { .. }));
        assert!(args.browser.validate().is_ok());
    }

    #[test]
    fn details_reads_listing_file_by_default() {
        let cli = Cli::try_parse_from(["bizcrawl", "details", "--no-driver-autostart"]).unwrap();
        let Command::Details(args) = cli.command else {
            panic!("expected details");
        };
        assert_eq!(args.input, PathBuf::from(DEFAULT_LISTING_FILE));
        assert_eq!(args.output, PathBuf::from(DEFAULT_DETAIL_FILE));
        assert!(!args.browser.autostart().enabled);
    }

    #[test]
    fn negative_pace_is_rejected() {
        let cli =
            Cli::try_parse_from(["bizcrawl", "details", "--pace=-1"]).unwrap();
        let Command::Details(args) = cli.command else {
            panic!("expected details");
        };
        assert!(matches!(args.browser.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn oversized_pace_is_rejected() {
        let cli = Cli::try_parse_from(["bizcrawl", "details", "--pace", "1e300"]).unwrap();
        let Command::Details(args) = cli.command else {
            panic!("expected details");
        };
        assert!(matches!(args.browser.validate(), Err(AppError::Config(_))));

        let cli = Cli::try_parse_from(["bizcrawl", "details", "--pace", "100"]).unwrap();
        let Command::Details(args) = cli.command else {
            panic!("expected details");
        };
        assert!(args.browser.validate().is_ok());
    }
}
