//! Video lookup for scene changes and direct searches.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Finds a playable URL for a free-text query
#[async_trait]
pub trait VideoSearch: Send + Sync {
    /// First matching URL, `None` when nothing was found or the search failed
    async fn search(&self, query: &str) -> Option<String>;
}

/// Shells out to `yt-dlp` and takes the first result.
#[derive(Debug, Clone)]
pub struct YtDlpSearch {
    program: String,
}

impl YtDlpSearch {
    pub fn new() -> Self {
        Self {
            program: "yt-dlp".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, query: &str) -> Result<Option<String>> {
        let output = Command::new(&self.program)
            .arg("--no-warnings")
            .arg("--skip-download")
            .arg("--print")
            .arg("webpage_url")
            .arg(format!("ytsearch1:{}", query))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(first_url(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Default for YtDlpSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSearch for YtDlpSearch {
    async fn search(&self, query: &str) -> Option<String> {
        debug!("Searching for {:?}", query);
        match self.run(query).await {
            Ok(Some(url)) => {
                info!("Search {:?} -> {}", query, url);
                Some(url)
            }
            Ok(None) => {
                warn!("No results for {:?}", query);
                None
            }
            Err(e) => {
                warn!("Search for {:?} failed: {:#}", query, e);
                None
            }
        }
    }
}

fn first_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("http://") || l.starts_with("https://"))
        .map(str::to_string)
}
