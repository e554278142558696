//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Discover and download Shimano E-Tube firmware.
///
/// The firmware API only lists firmware per E-Tube app version; `fw scrape`
/// searches the whole app-version range, merges in the versions listed on the
/// Shimano website and keeps only files that can actually be downloaded.
#[derive(Parser, Debug)]
#[command(name = "etube")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Firmware operations
    #[command(subcommand)]
    Fw(FwCommand),
}

#[derive(Subcommand, Debug)]
pub enum FwCommand {
    /// List firmware the API returns for an app version
    ///
    /// Pass `any` to search every supported app version. The search assumes
    /// the API answer only changes at a few version boundaries; a change that
    /// reverts between two queried versions goes unnoticed.
    Get {
        /// App version such as 4.2.0, or `any`
        app_version: String,
    },

    /// Discover, reconcile with the website and verify all firmware
    Scrape,

    /// Download firmware listed in a JSON file or on stdin
    Download {
        /// Target directory (created if missing)
        dir: PathBuf,

        /// Read the firmware list from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
    },
}

impl FwCommand {
    /// True when `app_version` asks for every version.
    pub fn is_any_version(app_version: &str) -> bool {
        app_version.eq_ignore_ascii_case("any")
    }
}
