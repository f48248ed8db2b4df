use anyhow::Result;
use clap::Parser;
use rmd::cli::init_tracing;
use rmd::pocket_tail::{run, TailCli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = TailCli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "pocket-tail exited with error");
    }
    result
}
