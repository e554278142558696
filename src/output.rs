//! CLI output formatting: aligned tables for terminals, JSON for pipes.

use std::fmt::Write as _;

use anyhow::Result;
use etube_core::{DownloadSummary, Firmware};

const HEADERS: [&str; 5] = ["FILENAME", "VERSION", "SIZE", "MD5", "TYPE"];
const MISSING: &str = "-";

/// Output format for firmware lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    /// Table on a terminal, JSON otherwise.
    pub fn for_stdout(is_terminal: bool) -> Self {
        if is_terminal { Self::Table } else { Self::Json }
    }
}

/// Renders `firmware` in `format`, with a trailing newline.
pub fn render_firmware(firmware: &[Firmware], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(firmware)?;
            json.push('\n');
            Ok(json)
        }
        OutputFormat::Table => Ok(render_table(firmware)),
    }
}

fn row(fw: &Firmware) -> [String; 5] {
    [
        fw.filename.clone(),
        fw.version.clone(),
        fw.filesize.map_or_else(|| MISSING.to_string(), |size| size.to_string()),
        fw.md5.clone().unwrap_or_else(|| MISSING.to_string()),
        fw.kind.clone().unwrap_or_else(|| MISSING.to_string()),
    ]
}

fn render_table(firmware: &[Firmware]) -> String {
    let rows: Vec<[String; 5]> = firmware.iter().map(row).collect();
    let mut widths = HEADERS.map(str::len);
    for cells in &rows {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header = HEADERS.map(str::to_string);
    for cells in std::iter::once(&header).chain(&rows) {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(out, "{}", line.trim_end());
    }
    let _ = writeln!(out, "{} firmware file(s)", firmware.len());
    out
}

/// One-line download summary.
pub fn render_download_summary(summary: &DownloadSummary) -> String {
    format!(
        "Downloaded {}, skipped {}, failed {}",
        summary.downloaded, summary.skipped, summary.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firmware(filename: &str, filesize: Option<u64>, md5: Option<&str>) -> Firmware {
        Firmware {
            filename: filename.to_string(),
            version: "4.3.1".to_string(),
            filesize,
            md5: md5.map(str::to_string),
            kind: Some("SC".to_string()),
            download_url: format!("https://dl/{filename}"),
        }
    }

    #[test]
    fn test_output_format_for_stdout() {
        assert_eq!(OutputFormat::for_stdout(true), OutputFormat::Table);
        assert_eq!(OutputFormat::for_stdout(false), OutputFormat::Json);
    }

    #[test]
    fn test_render_table_aligns_and_marks_missing() {
        let rendered = render_firmware(
            &[
                firmware("SC-E8000_4.3.1.bin", Some(2048), Some("abc")),
                firmware("BM_4.3.1.bin", None, None),
            ],
            OutputFormat::Table,
        )
        .unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("FILENAME            VERSION"));
        assert_eq!(lines[1], "SC-E8000_4.3.1.bin  4.3.1    2048  abc  SC");
        assert_eq!(lines[2], "BM_4.3.1.bin        4.3.1    -     -    SC");
        assert_eq!(lines[3], "2 firmware file(s)");
    }

    #[test]
    fn test_render_json_round_trips() {
        let items = vec![firmware("SC-E8000_4.3.1.bin", None, Some("abc"))];
        let rendered = render_firmware(&items, OutputFormat::Json).unwrap();
        assert!(rendered.contains("\"type\": \"SC\""));
        assert!(rendered.contains("\"filesize\": null"));
        let parsed: Vec<Firmware> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, items);
    }

    #[test]
    fn test_render_download_summary() {
        let summary = DownloadSummary {
            downloaded: 2,
            skipped: 1,
            failed: 0,
        };
        assert_eq!(
            render_download_summary(&summary),
            "Downloaded 2, skipped 1, failed 0"
        );
    }
}
