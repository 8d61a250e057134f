use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match bizcrawl::app::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "bizcrawl failed");
            ExitCode::FAILURE
        }
    }
}
