//! Reading articles from a directory of line-delimited JSON files.
//!
//! Every non-blank line of a matching file is parsed as one article. Lines
//! with an unusable `body` are dropped quietly; lines that are not JSON at all
//! are handled according to the loader's [`MalformedLinePolicy`].

mod jsonl_loader;
mod utils;

pub use jsonl_loader::{ArticleLoader, Articles, DEFAULT_FILE_PATTERN};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Article directory `{}` does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("Invalid glob-pattern")]
    InvalidGlobPattern(#[from] glob::PatternError),
    #[error("Failed to walk article directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Failed to read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed article at {}:{line}: {reason}", path.display())]
    MalformedLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// What to do with a line that cannot be parsed as JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Log a warning and continue with the next line.
    #[default]
    Skip,
    /// Stop loading and surface [`LoaderError::MalformedLine`].
    Abort,
}

impl std::str::FromStr for MalformedLinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown malformed-line policy `{other}`")),
        }
    }
}
