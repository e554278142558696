//! CLI entry point for the etube firmware tool.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use etube_core::{CatalogSettings, DownloadOutcome, Firmware, FirmwareCatalog};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, info};

mod app_config;
mod cli;
mod output;

use cli::{Args, Command, FwCommand};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_default_file_config()?;
    let mut settings = CatalogSettings::default();
    if let Some(config) = &loaded.config {
        config.apply(&mut settings)?;
        debug!(path = ?loaded.path, "loaded config file");
    }

    let catalog = FirmwareCatalog::new(settings).context("Failed to set up HTTP client")?;
    let format = OutputFormat::for_stdout(io::stdout().is_terminal());

    match args.command {
        Command::Fw(FwCommand::Get { app_version }) => {
            let firmware = if FwCommand::is_any_version(&app_version) {
                let range = catalog.settings().search_range;
                info!(
                    low = %range.low(),
                    high = %range.high(),
                    "searching all app versions; assumes the API answer changes only at version boundaries"
                );
                catalog.list_all_bisected().await?
            } else {
                catalog.list_for_version(&app_version).await?
            };
            print_firmware(&firmware, format)?;
        }
        Command::Fw(FwCommand::Scrape) => {
            let firmware = catalog.discover_all().await?;
            print_firmware(&firmware, format)?;
        }
        Command::Fw(FwCommand::Download {
            dir,
            file,
            overwrite,
        }) => {
            let firmware = read_firmware_list(file.as_deref())?;
            download(&catalog, &firmware, &dir, overwrite, args.quiet).await?;
        }
    }

    Ok(())
}

fn print_firmware(firmware: &[Firmware], format: OutputFormat) -> Result<()> {
    let rendered = output::render_firmware(firmware, format)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn read_firmware_list(file: Option<&Path>) -> Result<Vec<Firmware>> {
    let raw = if let Some(path) = file {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read firmware list '{}'", path.display()))?
    } else if io::stdin().is_terminal() {
        bail!("No firmware list provided. Pass --file or pipe the output of `etube fw get`.");
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };
    serde_json::from_str(&raw).context("Firmware list is not a JSON array of firmware records")
}

async fn download(
    catalog: &FirmwareCatalog,
    firmware: &[Firmware],
    dir: &Path,
    overwrite: bool,
    quiet: bool,
) -> Result<()> {
    let progress = ProgressBar::new(firmware.len() as u64);
    if quiet || !io::stderr().is_terminal() {
        progress.set_draw_target(ProgressDrawTarget::hidden());
    }
    progress.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let summary = catalog
        .download_with_progress(firmware, dir, overwrite, |fw, outcome| {
            let status = match outcome {
                DownloadOutcome::Downloaded { .. } => "downloaded",
                DownloadOutcome::Skipped { .. } => "skipped",
                DownloadOutcome::Failed { .. } => "failed",
            };
            progress.set_message(format!("{} ({status})", fw.filename));
            progress.inc(1);
        })
        .await?;
    progress.finish_and_clear();

    if !quiet {
        println!("{}", output::render_download_summary(&summary));
    }
    if summary.failed > 0 {
        bail!("{} firmware download(s) failed", summary.failed);
    }
    Ok(())
}
