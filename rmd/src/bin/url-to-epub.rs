use anyhow::Result;
use clap::Parser;
use rmd::cli::init_tracing;
use rmd::url_to_epub::{run, EpubCli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = EpubCli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "url-to-epub exited with error");
    }
    result
}
