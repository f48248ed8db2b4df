//! `url-to-epub`: convert the items listed on standard input into EPUB files.
//!
//! Each input line is a JSON object `{"id": ..., "url": ...}`. Every item is fetched and
//! converted on its own task; the file lands in the output directory as `<id>-<slug>.epub`
//! and its path is printed once written. Malformed lines and failed items are logged and
//! skipped.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rmd_core::contract::{Converter, Extractor};
use rmd_core::convert::{PandocConverter, DEFAULT_CONVERTER};
use rmd_core::error::{ConvertError, ExtractError, WorkerError};
use rmd_core::extract::HttpExtractor;
use rmd_core::slug::{document_title_or, slug};
use rmd_core::worker::ARTIFACT_EXTENSION;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::load_config::parse_duration;

/// Title given to pages that carry neither a title nor a site name.
pub const NO_TITLE: &str = "No Title";

/// url-to-epub: convert JSON items read from standard input into EPUB files.
#[derive(Debug, Parser)]
#[clap(
    name = "url-to-epub",
    version,
    about = "Convert JSON items read from standard input into EPUB files"
)]
pub struct EpubCli {
    /// Directory for generated EPUB files [default: current directory]
    #[clap(long, short = 'o', value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Use DURATION as the hard timeout for fetching a page
    #[clap(
        long,
        value_name = "DURATION",
        value_parser = parse_duration,
        default_value = "30s"
    )]
    pub fetch_timeout: Duration,

    /// Use DURATION as the hard timeout for converting a page
    #[clap(
        long,
        value_name = "DURATION",
        value_parser = parse_duration,
        default_value = "10s"
    )]
    pub convert_timeout: Duration,

    /// Use PROGRAM as the document converter
    #[clap(
        long,
        env = "RMD_CONVERTER",
        value_name = "PROGRAM",
        default_value = DEFAULT_CONVERTER
    )]
    pub converter: String,

    /// Print debugging messages about progress
    #[clap(long, short = 'v', env = "RMD_VERBOSE")]
    pub verbose: bool,
}

/// Item identifier as it appears in the input: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Number(u64),
    Text(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{n}"),
            ItemId::Text(s) => f.write_str(s),
        }
    }
}

/// One input line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UrlItem {
    pub id: ItemId,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct EpubSettings {
    pub out_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub convert_timeout: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EpubReport {
    pub converted: u64,
    pub failed: u64,
    /// Input lines that were not a valid item.
    pub malformed: u64,
}

/// Fetch and convert one item into `<out_dir>/<id>-<slug>.epub`.
pub async fn item_to_epub(
    item: &UrlItem,
    extractor: &dyn Extractor,
    converter: &dyn Converter,
    settings: &EpubSettings,
) -> Result<PathBuf, WorkerError> {
    let url = item.url.as_str();
    let mut article = tokio::time::timeout(
        settings.fetch_timeout,
        extractor.extract(url, settings.fetch_timeout),
    )
    .await
    .unwrap_or_else(|_| {
        Err(ExtractError::Timeout {
            url: url.to_string(),
            timeout: settings.fetch_timeout,
        })
    })?;

    // the converter writes the title into the document metadata
    article.title = document_title_or(&article, NO_TITLE);
    let output = settings.out_dir.join(format!(
        "{}-{}.{ARTIFACT_EXTENSION}",
        item.id,
        slug(&article)
    ));

    trace!(id = %item.id, path = %output.display(), "converting item");
    tokio::time::timeout(
        settings.convert_timeout,
        converter.convert(&article, &output, settings.convert_timeout),
    )
    .await
    .unwrap_or_else(|_| {
        Err(ConvertError::Timeout {
            program: "converter".to_string(),
            timeout: settings.convert_timeout,
        })
    })?;
    Ok(output)
}

/// Convert every item read from `input` concurrently, printing each written path to `out`.
pub async fn convert_all<R, W>(
    input: R,
    out: &mut W,
    extractor: Arc<dyn Extractor>,
    converter: Arc<dyn Converter>,
    settings: EpubSettings,
) -> Result<EpubReport>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let settings = Arc::new(settings);
    let mut tasks = JoinSet::new();
    let mut report = EpubReport::default();

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("cannot read input")? {
        if line.trim().is_empty() {
            continue;
        }
        let item: UrlItem = match serde_json::from_str(&line) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "skipping malformed input line");
                report.malformed += 1;
                continue;
            }
        };
        debug!(id = %item.id, url = %item.url, "item read");
        let extractor = extractor.clone();
        let converter = converter.clone();
        let settings = settings.clone();
        tasks.spawn(async move {
            let result =
                item_to_epub(&item, extractor.as_ref(), converter.as_ref(), &settings).await;
            (item, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(path))) => {
                writeln!(out, "{}", path.display()).context("cannot write to output")?;
                report.converted += 1;
            }
            Ok((item, Err(e))) => {
                warn!(id = %item.id, url = %item.url, error = %e, "item abandoned");
                report.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "conversion task ended abnormally");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

fn out_dir(cli_out: Option<PathBuf>) -> Result<PathBuf> {
    match cli_out {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("cannot determine the current directory"),
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("output directory {} does not exist", path.display());
    }
    Ok(())
}

pub async fn run(cli: EpubCli) -> Result<()> {
    let converter = PandocConverter::with_program(cli.converter.clone());
    converter
        .ensure_available()
        .context("cannot convert documents")?;
    let settings = EpubSettings {
        out_dir: out_dir(cli.out)?,
        fetch_timeout: cli.fetch_timeout,
        convert_timeout: cli.convert_timeout,
    };
    ensure_dir(&settings.out_dir)?;

    let report = convert_all(
        BufReader::new(tokio::io::stdin()),
        &mut std::io::stdout(),
        Arc::new(HttpExtractor::new()),
        Arc::new(converter),
        settings,
    )
    .await?;
    info!(?report, "conversion complete");
    Ok(())
}
