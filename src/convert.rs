//! Conversion through an external program (pandoc by default).
//!
//! The article content is fed on stdin and the program writes the e-book to the output path.
//! The whole run is bounded by a wall-clock deadline; on breach the child is killed and the
//! caller gets [`ConvertError::Timeout`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use crate::contract::{Article, Converter};
use crate::error::ConvertError;
use crate::slug::document_title;

pub const DEFAULT_CONVERTER: &str = "pandoc";

#[derive(Debug, Clone)]
pub struct PandocConverter {
    program: String,
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self::with_program(DEFAULT_CONVERTER)
    }
}

impl PandocConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, article: &Article, output: &Path) -> Result<(), ConvertError> {
        let title = document_title(article);
        let mut child = Command::new(&self.program)
            .arg("-f")
            .arg(&article.format)
            .arg("-o")
            .arg(output)
            .arg("--metadata")
            .arg(format!("title={title}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConvertError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(article.content.as_bytes()).await {
                Ok(()) => {}
                // the program quit without reading; its exit status tells why
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    trace!(program = %self.program, "converter closed its input early");
                }
                Err(e) => return Err(e.into()),
            }
            // closing stdin lets the program see EOF
            drop(stdin);
        }

        let out = child.wait_with_output().await?;
        if !out.status.success() {
            return Err(ConvertError::Failed {
                program: self.program.clone(),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Locate `program` the way a shell would.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[async_trait]
impl Converter for PandocConverter {
    fn ensure_available(&self) -> Result<(), ConvertError> {
        match find_program(&self.program) {
            Some(path) => {
                trace!(program = %self.program, path = %path.display(), "converter found");
                Ok(())
            }
            None => Err(ConvertError::MissingProgram(self.program.clone())),
        }
    }

    async fn convert(
        &self,
        article: &Article,
        output: &Path,
        timeout: Duration,
    ) -> Result<(), ConvertError> {
        trace!(program = %self.program, output = %output.display(), "converting");
        match tokio::time::timeout(timeout, self.run(article, output)).await {
            Ok(result) => result,
            // dropping the run future kills the child
            Err(_) => Err(ConvertError::Timeout {
                program: self.program.clone(),
                timeout,
            }),
        }
    }
}
