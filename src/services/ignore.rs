//! Key prefixes excluded from a run.

use std::{io::ErrorKind, path::Path};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    prefixes: Vec<String>,
}

impl IgnoreList {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().trim_start_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Load one prefix per line. A missing file means nothing is ignored.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let list = Self::new(text.lines());
                info!(path = %path.display(), count = list.prefixes.len(), "loaded ignore list");
                list
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no ignore list");
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), "cannot read ignore list: {}", err);
                Self::default()
            }
        }
    }

    /// True for directory markers and for keys under an ignored prefix.
    pub fn is_ignored(&self, key: &str) -> bool {
        key.ends_with('/') || self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }
}
