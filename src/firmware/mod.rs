//! Firmware records as returned by the E-Tube firmware API.
//!
//! The API answers with a JSON array of objects:
//!
//! ```json
//! [{"filename": "SC-E8000_4.3.1.bin", "version": "4.3.1", "filesize": 123,
//!   "md5": "…", "type": "SC", "download_url": "https://…/SC-E8000_4.3.1.bin"}]
//! ```
//!
//! Records compare structurally: two entries with the same filename but a
//! different checksum are distinct set members.

mod filename;

use serde::{Deserialize, Deserializer, Serialize};

pub use filename::{FilenameError, FilenamePattern};

/// One firmware file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Firmware {
    /// File name, e.g. `SC-E8000_4.3.1.bin`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filename: String,
    /// Firmware version string.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub version: String,
    /// File size in bytes, when the API reports it.
    #[serde(default)]
    pub filesize: Option<u64>,
    /// MD5 checksum, when the API reports it.
    #[serde(default)]
    pub md5: Option<String>,
    /// Device type label.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Where the file can be downloaded.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub download_url: String,
}

impl Firmware {
    /// A record is usable when it names a file and a place to get it.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.filename.is_empty() && !self.download_url.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses one API payload into firmware records.
///
/// # Errors
///
/// Returns the `serde_json` error when the payload is not an array of
/// firmware objects.
pub fn parse_payload(payload: &str) -> Result<Vec<Firmware>, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Drops invalid records and sorts the rest by filename.
#[must_use]
pub fn sanitize(firmware: impl IntoIterator<Item = Firmware>) -> Vec<Firmware> {
    let mut valid: Vec<Firmware> = firmware.into_iter().filter(Firmware::is_valid).collect();
    valid.sort_by(|a, b| a.filename.cmp(&b.filename));
    valid
}
