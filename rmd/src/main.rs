use anyhow::Result;
use clap::Parser;
use rmd::cli::{init_tracing, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::trace!("tracing initialised, environment loaded, arguments parsed");

    let result = run(cli).await;
    match &result {
        Ok(()) => tracing::trace!("rmd exiting"),
        Err(e) => tracing::error!(error = %e, "rmd exited with error"),
    }
    result
}
