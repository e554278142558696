//! Decomposition of firmware filenames into basename, separator, version and
//! extension.
//!
//! Firmware files are named `<basename><separator><X.Y.Z><.extension>`, for
//! example `SC-E8000_4.3.1.bin`. The shortest basename wins, and the separator
//! is never a digit, so multi-digit version fields stay inside the version.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::utils::compile_static_regex;

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"^(.*?)([^0-9])([0-9]+\.[0-9]+\.[0-9]+)(\..*)$")
});

/// A filename that does not follow the firmware naming scheme.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error(
        "malformed firmware filename '{filename}': expected <name><separator><X.Y.Z><.ext>"
    )]
    Malformed { filename: String },
}

/// The parts of a firmware filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    basename: String,
    separator: char,
    version: String,
    extension: String,
}

impl FilenamePattern {
    /// Splits `filename` into its parts.
    ///
    /// # Errors
    ///
    /// Returns [`FilenameError::Malformed`] when the filename has no
    /// `<separator><X.Y.Z><.ext>` tail.
    pub fn parse(filename: &str) -> Result<Self, FilenameError> {
        let malformed = || FilenameError::Malformed {
            filename: filename.to_string(),
        };
        let caps = FILENAME_RE.captures(filename).ok_or_else(malformed)?;
        let separator = caps
            .get(2)
            .and_then(|m| m.as_str().chars().next())
            .ok_or_else(malformed)?;
        let part = |index: usize| caps.get(index).map_or("", |m| m.as_str()).to_string();
        Ok(Self {
            basename: part(1),
            separator,
            version: part(3),
            extension: part(4),
        })
    }

    #[must_use]
    pub fn basename(&self) -> &str {
        &self.basename
    }

    #[must_use]
    pub fn separator(&self) -> char {
        self.separator
    }

    /// The `X.Y.Z` part, as written in the filename.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The extension including its leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Rebuilds the filename with `version` in place of the original one.
    #[must_use]
    pub fn with_version(&self, version: &str) -> String {
        format!(
            "{}{}{}{}",
            self.basename, self.separator, version, self.extension
        )
    }
}
