//! `load_config` module: everything read from disk before the pipeline starts.
//!
//! # Responsibilities
//! - Parse the optional YAML config file into [`FileConfig`]; its values fill whatever the
//!   command line and environment left unset
//! - Parse human durations (`500ms`, `10s`, `5m`, `1h`, or bare seconds)
//! - Load the read-it-later credentials file, refusing it when group or others can access it
//!
//! # Errors
//! All failures are `anyhow::Error` with the offending path attached, surfaced at the CLI
//! boundary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rmd_core::source::PocketAuth;
use serde::Deserialize;
use tracing::{error, info, trace};

/// YAML-side settings. Every key is optional; unknown keys are rejected.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub dest: Option<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub retry: Option<u32>,
    pub keep: Option<bool>,
    pub tag: Option<String>,
    pub converter: Option<String>,
    pub rm_device: Option<String>,
    pub rm_user: Option<String>,
    pub pocket_key: Option<String>,
    pub pocket_token: Option<String>,
    pub pocket_auth: Option<PathBuf>,
    pub store_root: Option<PathBuf>,
    pub token_url: Option<String>,
}

/// Loads a YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path = path.as_ref();
    info!(config_path = %path.display(), "Loading configuration from file");

    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = %path.display(), "Failed to read config file");
        anyhow!("Failed to read config file {}: {}", path.display(), e)
    })?;

    let config: FileConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = %path.display(), "Failed to parse config file");
        anyhow!("Failed to parse config file {}: {}", path.display(), e)
    })?;
    trace!(?config, "config file parsed");
    Ok(config)
}

/// Parse `500ms`, `10s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let s = raw.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid duration {raw:?}: expected a number"));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration {raw:?}: {e}"))?;
    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration {raw:?}: too large"))
    };
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(3600),
        other => Err(format!(
            "invalid duration {raw:?}: unknown unit {other:?} (use ms, s, m or h)"
        )),
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(unix)]
fn ensure_private(path: &Path, meta: &fs::Metadata) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        bail!(
            "permissions {:04o} for {} are too open; others must not access it (try chmod 600)",
            mode,
            path.display()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_private(_path: &Path, _meta: &fs::Metadata) -> Result<()> {
    Ok(())
}

/// Load `{"consumer_key": ..., "access_token": ...}` from a private file.
pub fn load_pocket_auth(path: &Path) -> Result<PocketAuth> {
    let path = expand_home(path);
    let meta = fs::metadata(&path)
        .with_context(|| format!("cannot access credentials file {}", path.display()))?;
    ensure_private(&path, &meta)?;
    let content = fs::read(&path)
        .with_context(|| format!("cannot read credentials file {}", path.display()))?;
    let auth: PocketAuth = serde_json::from_slice(&content)
        .with_context(|| format!("malformed credentials file {}", path.display()))?;
    if auth.consumer_key.is_empty() || auth.access_token.is_empty() {
        bail!("credentials file {} has empty fields", path.display());
    }
    trace!(path = %path.display(), "credentials loaded");
    Ok(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_units_and_bare_seconds() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn bad_durations_are_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
    }

    #[test]
    fn overflowing_durations_are_errors_not_panics() {
        let err = parse_duration("6000000000000000h").unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert!(parse_duration("400000000000000000m").is_err());
        assert_eq!(
            parse_duration("5124095576030431h"),
            Ok(Duration::from_secs(5_124_095_576_030_431 * 3600))
        );
    }

    #[test]
    fn non_home_paths_are_untouched() {
        assert_eq!(
            expand_home(Path::new("/etc/pocket")),
            PathBuf::from("/etc/pocket")
        );
    }
}
