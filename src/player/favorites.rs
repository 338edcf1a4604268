use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// One favorite URL with the `#` title line above it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favorite {
    pub title: Option<String>,
    pub url: String,
}

/// Line-oriented favorites file.
///
/// Blank lines and lines starting with `#` are comments (a `#` line
/// directly above a URL is its title); every other line is a URL.
#[derive(Debug, Clone)]
pub struct FavoritesStore {
    path: PathBuf,
}

impl FavoritesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    pub fn list(&self) -> Result<Vec<Favorite>> {
        let text = self.read()?;
        let mut favorites = Vec::new();
        let mut title = None;

        for line in text.lines().map(str::trim) {
            if line.is_empty() {
                title = None;
            } else if let Some(comment) = line.strip_prefix('#') {
                title = Some(comment.trim().to_string());
            } else {
                favorites.push(Favorite {
                    title: title.take(),
                    url: line.to_string(),
                });
            }
        }

        Ok(favorites)
    }

    pub fn urls(&self) -> Result<Vec<String>> {
        Ok(self.list()?.into_iter().map(|f| f.url).collect())
    }

    /// Exact string match against every URL line
    pub fn contains(&self, url: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|f| f.url == url))
    }

    /// Append `#title` and the URL. Returns `false` if it was already there.
    pub fn add(&self, title: &str, url: &str) -> Result<bool> {
        let url = url.trim();
        if self.contains(url)? {
            return Ok(false);
        }

        let needs_newline = {
            let text = self.read()?;
            !text.is_empty() && !text.ends_with('\n')
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut entry = String::new();
        if needs_newline {
            entry.push('\n');
        }
        entry.push_str(&format!("#{}\n{}\n", title.trim(), url));
        file.write_all(entry.as_bytes())?;

        info!("Added favorite {}", url);
        Ok(true)
    }

    /// A uniformly random URL, `None` when the list is empty
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<String>> {
        Ok(self.urls()?.choose(rng).cloned())
    }
}
