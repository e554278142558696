//! Application configuration loading for catalog defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use etube_core::{BackoffPolicy, CatalogSettings, RetryBudget, SearchRange, Version};

/// Key/value file configuration overriding [`CatalogSettings`] defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// Firmware API base URL.
    pub api_base_url: Option<String>,
    /// Base URL for synthesized download links.
    pub download_base_url: Option<String>,
    /// Lowest app version searched by `fw get any` and `fw scrape`.
    pub search_min_version: Option<Version>,
    /// Highest app version searched by `fw get any` and `fw scrape`.
    pub search_max_version: Option<Version>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    /// First backoff delay in seconds; doubled on every retry.
    pub backoff_initial_secs: Option<u64>,
    /// Backoff ceiling in seconds.
    pub backoff_max_secs: Option<u64>,
    /// Retries after the first attempt, or unlimited.
    pub max_retries: Option<RetryBudget>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_url("api_base_url", self.api_base_url.as_deref())?;
        validate_url("download_base_url", self.download_base_url.as_deref())?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;

        if let Some(initial) = self.backoff_initial_secs
            && initial > 3600
        {
            bail!("Invalid config value for `backoff_initial_secs`: {initial}. Expected range: 0..=3600");
        }
        if let Some(max) = self.backoff_max_secs
            && max > 3600
        {
            bail!("Invalid config value for `backoff_max_secs`: {max}. Expected range: 0..=3600");
        }
        if let (Some(initial), Some(max)) = (self.backoff_initial_secs, self.backoff_max_secs)
            && initial > max
        {
            bail!("`backoff_initial_secs` ({initial}) must not exceed `backoff_max_secs` ({max})");
        }
        if let (Some(low), Some(high)) = (self.search_min_version, self.search_max_version)
            && low > high
        {
            bail!("`search_min_version` ({low}) must not exceed `search_max_version` ({high})");
        }
        Ok(())
    }

    /// Layers the configured values over `settings`.
    pub fn apply(&self, settings: &mut CatalogSettings) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            settings.api_base_url.clone_from(url);
        }
        if let Some(url) = &self.download_base_url {
            settings.download_base_url.clone_from(url);
        }
        if self.search_min_version.is_some() || self.search_max_version.is_some() {
            let low = self
                .search_min_version
                .unwrap_or(settings.search_range.low());
            let high = self
                .search_max_version
                .unwrap_or(settings.search_range.high());
            settings.search_range =
                SearchRange::new(low, high).context("Invalid configured search range")?;
        }
        if let Some(secs) = self.connect_timeout_secs {
            settings.timeouts.connect = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            settings.timeouts.request = Duration::from_secs(secs);
        }
        if self.backoff_initial_secs.is_some() || self.backoff_max_secs.is_some() {
            let initial = self
                .backoff_initial_secs
                .map_or(settings.backoff.initial(), Duration::from_secs);
            let max = self
                .backoff_max_secs
                .map_or(settings.backoff.max(), Duration::from_secs);
            if initial > max {
                bail!(
                    "Configured backoff start ({}s) exceeds its ceiling ({}s)",
                    initial.as_secs(),
                    max.as_secs()
                );
            }
            settings.backoff = BackoffPolicy::new(initial, max);
        }
        if let Some(budget) = self.max_retries {
            settings.max_retries = budget;
        }
        Ok(())
    }
}

fn validate_url(field: &str, value: Option<&str>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        bail!("Invalid config value for `{field}`: '{value}'. Expected an http(s) URL");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/etube/config.toml`
/// 2. `$HOME/.config/etube/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("etube").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("etube")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "api_base_url" => {
                cfg.api_base_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "download_base_url" => {
                cfg.download_base_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "search_min_version" => {
                cfg.search_min_version = Some(parse_version(value).with_context(invalid)?);
            }
            "search_max_version" => {
                cfg.search_max_version = Some(parse_version(value).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "backoff_initial_secs" => {
                cfg.backoff_initial_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "backoff_max_secs" => {
                cfg.backoff_max_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_retries" => {
                cfg.max_retries = Some(parse_retry_budget(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_version(raw_value: &str) -> Result<Version> {
    let literal = parse_string_literal(raw_value)?;
    Ok(Version::parse(&literal)?)
}

/// `max_retries = 5` or `max_retries = "unlimited"`.
fn parse_retry_budget(raw_value: &str) -> Result<RetryBudget> {
    if raw_value.starts_with('"') {
        let literal = parse_string_literal(raw_value)?;
        if literal == "unlimited" {
            return Ok(RetryBudget::Unlimited);
        }
        bail!("Expected an integer or \"unlimited\"");
    }
    let value = parse_integer_u64(raw_value)?;
    let retries =
        u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))?;
    Ok(RetryBudget::Limited(retries))
}
