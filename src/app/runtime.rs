use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::CrawlContext;
use super::canonical::Canonicalizer;
use super::challenge::InterruptionHandler;
use super::config::{BrowserArgs, Cli, Command, DetailArgs, LaunchArgs, ListingArgs};
use super::detail::DetailCrawler;
use super::error::AppError;
use super::launcher::{ChromeLaunch, DriverProcess, default_profile_dir, ensure_webdriver};
use super::listing::ListingCrawler;
use super::pacing::Pacer;
use super::store::{RecordStore, load_queue};
use super::types::{DetailRecord, SummaryRecord};
use super::webdriver::WebDriverPage;

pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Launch(args) => run_launch(&args),
        Command::Listings(args) => run_listings(&args).await,
        Command::Details(args) => run_details(&args).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run_launch(args: &LaunchArgs) -> Result<(), AppError> {
    let launch = ChromeLaunch {
        binary: args.chrome.clone(),
        profile_dir: args
            .profile_dir
            .clone()
            .unwrap_or_else(default_profile_dir),
        debugging_port: args.debugging_port,
        home_url: args.home_url.clone(),
    };
    let child = launch.spawn()?;
    info!(
        pid = child.id(),
        port = launch.debugging_port,
        "chrome is running; keep it open and run `bizcrawl listings` or `bizcrawl details`"
    );
    Ok(())
}

async fn run_listings(args: &ListingArgs) -> Result<(), AppError> {
    args.browser.validate()?;
    let mut store = RecordStore::<SummaryRecord>::open(&args.output)?;
    store.claim()?;
    info!(
        output = %store.path().display(),
        known = store.len(),
        "listing store ready"
    );

    let (_driver_process, mut page) = attach(&args.browser).await?;
    let ctx = crawl_context(&args.browser);
    let result = ListingCrawler::new(&ctx, args.entry())
        .run(&mut page, &mut store)
        .await;
    close(page).await;

    result?;
    Ok(())
}

async fn run_details(args: &DetailArgs) -> Result<(), AppError> {
    args.browser.validate()?;
    let queue = load_queue(&args.input)?;
    let mut store = RecordStore::<DetailRecord>::open(&args.output)?;
    store.claim()?;
    info!(
        input = %args.input.display(),
        output = %store.path().display(),
        queued = queue.len(),
        enriched = store.len(),
        "detail store ready"
    );
    if queue.is_empty() {
        warn!(input = %args.input.display(), "listing file has no urls, nothing to do");
        return Ok(());
    }

    let (_driver_process, mut page) = attach(&args.browser).await?;
    let ctx = crawl_context(&args.browser);
    let result = DetailCrawler::new(&ctx)
        .run(&mut page, &queue, &mut store)
        .await;
    close(page).await;

    result?;
    Ok(())
}

/// Brings up chromedriver if needed and attaches a session to the running
/// Chrome. The returned process handle must outlive the session.
async fn attach(
    browser: &BrowserArgs,
) -> Result<(Option<DriverProcess>, WebDriverPage), AppError> {
    let driver_process = ensure_webdriver(&browser.webdriver_url, &browser.autostart()).await?;
    if let Some(process) = &driver_process {
        info!(log = %process.log_path().display(), "using chromedriver started by bizcrawl");
    }
    let page = WebDriverPage::connect(&browser.webdriver_url, &browser.debugger_address).await?;
    Ok((driver_process, page))
}

fn crawl_context(browser: &BrowserArgs) -> CrawlContext {
    CrawlContext {
        pacer: Pacer::new(browser.pace),
        canon: Canonicalizer::new(&browser.origin),
        interrupts: InterruptionHandler::console(),
    }
}

async fn close(page: WebDriverPage) {
    if let Err(err) = page.close().await {
        warn!(error = %err, "failed to end webdriver session");
    }
}
