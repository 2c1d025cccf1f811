//! Batch download mode.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// How the batch downloader lays out selected folders in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Preserve the selected folder name.
    #[default]
    Literal,
    /// Flatten selected folders into the archive root.
    Merge,
}

impl DownloadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "literal" => Ok(Self::Literal),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidMode(format!(
                "{other:?}; supported: 'literal', 'merge'"
            ))),
        }
    }
}

impl std::fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        assert_eq!(DownloadMode::parse("literal").unwrap(), DownloadMode::Literal);
        assert_eq!(DownloadMode::parse("merge").unwrap(), DownloadMode::Merge);
        assert!(DownloadMode::parse("zip").is_err());
    }
}
