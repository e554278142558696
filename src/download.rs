//! Writing firmware files to a local directory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::fetch::{FetchError, ResilientFetcher, RetryBudget};
use crate::firmware::Firmware;

/// What happened to one firmware file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// The file already existed and overwriting was off.
    Skipped { path: PathBuf },
    Failed { reason: String },
}

/// Totals for one download batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadSummary {
    fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded { .. } => self.downloaded += 1,
            DownloadOutcome::Skipped { .. } => self.skipped += 1,
            DownloadOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Local file name for `filename`: its last path component, with characters
/// that are unsafe on common filesystems replaced by `_`.
///
/// Returns `None` when nothing usable is left.
#[must_use]
pub fn local_filename(filename: &str) -> Option<String> {
    let last = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}

/// Downloads firmware files one at a time into a directory.
#[derive(Debug, Clone)]
pub struct FirmwareDownloader<'a> {
    fetcher: &'a ResilientFetcher,
    budget: RetryBudget,
    overwrite: bool,
}

impl<'a> FirmwareDownloader<'a> {
    #[must_use]
    pub fn new(fetcher: &'a ResilientFetcher, budget: RetryBudget, overwrite: bool) -> Self {
        Self {
            fetcher,
            budget,
            overwrite,
        }
    }

    /// Downloads every record into `dir`, creating it if needed.
    ///
    /// `on_item` is called once per record, in input order, after the record
    /// is handled.
    ///
    /// # Errors
    ///
    /// Only fails when `dir` cannot be created. Per-file failures are logged
    /// and counted in the summary.
    #[instrument(skip(self, firmware, on_item), fields(dir = %dir.display()))]
    pub async fn download_all(
        &self,
        firmware: &[Firmware],
        dir: &Path,
        mut on_item: impl FnMut(&Firmware, &DownloadOutcome),
    ) -> Result<DownloadSummary, std::io::Error> {
        tokio::fs::create_dir_all(dir).await?;

        let mut summary = DownloadSummary::default();
        for fw in firmware {
            let outcome = self.download_one(fw, dir).await;
            if let DownloadOutcome::Failed { reason } = &outcome {
                warn!(filename = %fw.filename, reason = %reason, "download failed");
            }
            summary.record(&outcome);
            on_item(fw, &outcome);
        }
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "download batch finished"
        );
        Ok(summary)
    }

    async fn download_one(&self, fw: &Firmware, dir: &Path) -> DownloadOutcome {
        let Some(name) = local_filename(&fw.filename) else {
            return DownloadOutcome::Failed {
                reason: format!("unusable filename '{}'", fw.filename),
            };
        };
        let path = dir.join(&name);

        if !self.overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "already present");
            return DownloadOutcome::Skipped { path };
        }

        // The final name only ever holds a complete body.
        let partial = partial_path(&path);
        let bytes = match self
            .fetcher
            .download_to(&fw.download_url, &partial, self.budget)
            .await
        {
            Ok(bytes) => bytes,
            Err(error) => {
                remove_partial(&partial).await;
                return DownloadOutcome::Failed {
                    reason: describe_fetch_error(&error),
                };
            }
        };

        match tokio::fs::rename(&partial, &path).await {
            Ok(()) => DownloadOutcome::Downloaded { path, bytes },
            Err(error) => {
                remove_partial(&partial).await;
                DownloadOutcome::Failed {
                    reason: format!("cannot write {}: {error}", path.display()),
                }
            }
        }
    }
}

fn describe_fetch_error(error: &FetchError) -> String {
    match error.status() {
        Some(status) => format!("HTTP {status}"),
        None => error.to_string(),
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

async fn remove_partial(partial: &Path) {
    if let Err(error) = tokio::fs::remove_file(partial).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %partial.display(), error = %error, "could not remove partial download");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fetch::testing::{RecordingSleeper, Reply, ScriptedTransport};
    use crate::fetch::BackoffPolicy;

    fn firmware(filename: &str) -> Firmware {
        Firmware {
            filename: filename.to_string(),
            version: "1.0.0".to_string(),
            filesize: None,
            md5: None,
            kind: None,
            download_url: format!("https://files/{filename}"),
        }
    }

    fn fetcher() -> (Arc<ScriptedTransport>, ResilientFetcher) {
        let transport = Arc::new(ScriptedTransport::from_fn(|_, url| {
            if url.contains("missing") {
                Reply::Status(404, None)
            } else {
                Reply::Body(url.as_bytes().to_vec())
            }
        }));
        let fetcher = ResilientFetcher::with_sleeper(
            transport.clone(),
            Arc::new(RecordingSleeper::default()),
            BackoffPolicy::default(),
        );
        (transport, fetcher)
    }

    #[test]
    fn test_local_filename_strips_directories() {
        assert_eq!(local_filename("SC-E8000_4.3.1.bin").unwrap(), "SC-E8000_4.3.1.bin");
        assert_eq!(local_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(local_filename("dir\\fw:1.bin").unwrap(), "fw_1.bin");
        assert!(local_filename("..").is_none());
        assert!(local_filename("a/").is_none());
    }

    #[tokio::test]
    async fn test_download_all_writes_skips_and_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fw");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("B_1.0.0.bin"), b"old").unwrap();

        let (transport, fetcher) = fetcher();
        let items = [
            firmware("A_1.0.0.bin"),
            firmware("B_1.0.0.bin"),
            firmware("missing_1.0.0.bin"),
        ];
        let mut seen = Vec::new();
        let summary = FirmwareDownloader::new(&fetcher, RetryBudget::Limited(0), false)
            .download_all(&items, &target, |fw, outcome| {
                seen.push((fw.filename.clone(), outcome.clone()));
            })
            .await
            .unwrap();

        assert_eq!(
            summary,
            DownloadSummary {
                downloaded: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(
            std::fs::read(target.join("A_1.0.0.bin")).unwrap(),
            b"https://files/A_1.0.0.bin"
        );
        assert_eq!(std::fs::read(target.join("B_1.0.0.bin")).unwrap(), b"old");
        assert!(!target.join("missing_1.0.0.bin").exists());
        assert!(!target.join("A_1.0.0.bin.part").exists());
        assert_eq!(transport.calls("https://files/B_1.0.0.bin"), 0);
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[2].1,
            DownloadOutcome::Failed {
                reason: "HTTP 404".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_download_all_overwrite_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A_1.0.0.bin"), b"old").unwrap();

        let (_, fetcher) = fetcher();
        let summary = FirmwareDownloader::new(&fetcher, RetryBudget::Limited(0), true)
            .download_all(&[firmware("A_1.0.0.bin")], dir.path(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(
            std::fs::read(dir.path().join("A_1.0.0.bin")).unwrap(),
            b"https://files/A_1.0.0.bin"
        );
    }

    #[tokio::test]
    async fn test_failed_download_removes_stale_partial() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("missing_1.0.0.bin.part");
        std::fs::write(&stale, b"half a file").unwrap();

        let (_, fetcher) = fetcher();
        let summary = FirmwareDownloader::new(&fetcher, RetryBudget::Limited(0), false)
            .download_all(&[firmware("missing_1.0.0.bin")], dir.path(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(!stale.exists());
        assert!(!dir.path().join("missing_1.0.0.bin").exists());
    }

    #[tokio::test]
    async fn test_download_retries_transient_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script_result("https://files/A_1.0.0.bin", Reply::Status(503, None));
        transport.script_result("https://files/A_1.0.0.bin", Reply::Body(b"payload".to_vec()));
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher =
            ResilientFetcher::with_sleeper(transport.clone(), sleeper.clone(), BackoffPolicy::default());
        let dir = tempfile::tempdir().unwrap();

        let mut outcomes = Vec::new();
        FirmwareDownloader::new(&fetcher, RetryBudget::Limited(1), false)
            .download_all(&[firmware("A_1.0.0.bin")], dir.path(), |_, outcome| {
                outcomes.push(outcome.clone());
            })
            .await
            .unwrap();

        let path = dir.path().join("A_1.0.0.bin");
        assert_eq!(outcomes, [DownloadOutcome::Downloaded { path: path.clone(), bytes: 7 }]);
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert_eq!(sleeper.sleeps().len(), 1);
        assert_eq!(transport.calls("https://files/A_1.0.0.bin"), 2);
    }
}
