//! Model → version lists scraped from the E-Tube marketing pages.
//!
//! Each page carries a table with class `firmware-table`; every body row has
//! a cell with class `firmware-modelNo` and one with class
//! `firmware-version`. Model names of the form `Name (Alias)` are reduced to
//! the alias, which is how firmware files are named.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::fetch::{FetchCache, FetchError, ResilientFetcher, RetryBudget};
use crate::utils::{compile_static_regex, html_text};

/// Marketing pages listing current firmware per model.
pub const FIRMWARE_PAGES: [&str; 2] = [
    "https://bike.shimano.com/products/apps/e-tube-project-cyclist.html",
    "https://bike.shimano.com/products/apps/e-tube-project-professional.html",
];

const TABLE_CLASS: &str = "firmware-table";
const MODEL_CLASS: &str = "firmware-modelNo";
const VERSION_CLASS: &str = "firmware-version";

static CLASSED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<([a-z][a-z0-9]*)\b[^>]*?\bclass\s*=\s*["']([^"']*)["'][^>]*>"#)
});
static ANY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<(/?)([a-z][a-z0-9]*)\b[^>]*?(/?)>"));
static TBODY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<tbody\b[^>]*>(.*?)</tbody\s*>"));
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>"));

/// Errors while scraping the marketing pages.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("page {url} is not UTF-8: {source}")]
    Encoding {
        url: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// The page layout changed and no firmware table was found.
    #[error("no firmware table found on {url}")]
    MissingTable { url: String },
}

/// Ordered mapping from model name to the versions listed for it.
///
/// Models keep the order in which they were first seen; versions keep row
/// order. Matching relies on this order for reproducible tie-breaks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedModels {
    entries: Vec<(String, Vec<String>)>,
}

impl ScrapedModels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `version` to `model`'s list. Blank models or versions are ignored.
    pub fn insert(&mut self, model: impl Into<String>, version: impl Into<String>) {
        let model = model.into().trim().to_string();
        let version = version.into().trim().to_string();
        if model.is_empty() || version.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|(name, _)| *name == model) {
            Some((_, versions)) => versions.push(version),
            None => self.entries.push((model, vec![version])),
        }
    }

    /// Versions listed for `model`.
    #[must_use]
    pub fn versions(&self, model: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, versions)| versions.as_slice())
    }

    /// Model names in first-seen order.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M, V> FromIterator<(M, V)> for ScrapedModels
where
    M: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (M, V)>>(iter: I) -> Self {
        let mut models = Self::new();
        for (model, version) in iter {
            models.insert(model, version);
        }
        models
    }
}

/// Reduces `Name (Alias)` to `Alias`: the trimmed text between the first `(`
/// and its matching `)`. Names without a parenthesis are only trimmed.
#[must_use]
pub fn reduce_model_alias(name: &str) -> String {
    let Some(open) = name.find('(') else {
        return name.trim().to_string();
    };
    let inner = &name[open + 1..];
    let mut depth = 0usize;
    for (index, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' if depth == 0 => return inner[..index].trim().to_string(),
            ')' => depth -= 1,
            _ => {}
        }
    }
    inner.trim().to_string()
}

/// Extracts `(model, version)` rows from the firmware table of one page.
///
/// Rows missing either cell are skipped.
///
/// # Errors
///
/// Returns [`ScrapeError::MissingTable`] when the page has no firmware table.
pub fn parse_firmware_table(url: &str, html: &str) -> Result<Vec<(String, String)>, ScrapeError> {
    let table = element_inner(html, TABLE_CLASS).ok_or_else(|| ScrapeError::MissingTable {
        url: url.to_string(),
    })?;

    let mut rows = Vec::new();
    for body in TBODY_RE.captures_iter(table) {
        let Some(body) = body.get(1) else { continue };
        for row in ROW_RE.captures_iter(body.as_str()) {
            let Some(row) = row.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let (Some(model), Some(version)) = (
                element_inner(row, MODEL_CLASS),
                element_inner(row, VERSION_CLASS),
            ) else {
                debug!(url, "skipping firmware row without model/version cells");
                continue;
            };
            rows.push((reduce_model_alias(&html_text(model)), html_text(version)));
        }
    }
    if rows.is_empty() {
        warn!(url, "firmware table has no model/version rows");
    }
    Ok(rows)
}

/// Inner HTML of the first element whose class list contains `class`.
///
/// Nested elements with the same tag name are skipped over, so the content
/// ends at the element's own closing tag. An unclosed element runs to the end
/// of `html`.
fn element_inner<'h>(html: &'h str, class: &str) -> Option<&'h str> {
    CLASSED_TAG_RE.captures_iter(html).find_map(|caps| {
        let classes = caps.get(2)?.as_str();
        if !classes.split_whitespace().any(|c| c == class) {
            return None;
        }
        let tag = caps.get(1)?.as_str();
        let start = caps.get(0)?.end();
        let rest = &html[start..];
        Some(&rest[..closing_tag_offset(rest, tag)])
    })
}

/// Offset in `rest` of the `</tag>` that closes an element opened just
/// before `rest`.
fn closing_tag_offset(rest: &str, tag: &str) -> usize {
    let mut depth = 0usize;
    for caps in ANY_TAG_RE.captures_iter(rest) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        if !name.as_str().eq_ignore_ascii_case(tag) {
            continue;
        }
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let self_closing = caps.get(3).is_some_and(|m| !m.as_str().is_empty());
        if closing {
            if depth == 0 {
                return whole.start();
            }
            depth -= 1;
        } else if !self_closing {
            depth += 1;
        }
    }
    rest.len()
}

/// Fetches the marketing pages and merges their firmware tables.
#[derive(Debug, Clone)]
pub struct MarketingPageScraper<'a> {
    fetcher: &'a ResilientFetcher,
    pages: &'a [String],
    budget: RetryBudget,
}

impl<'a> MarketingPageScraper<'a> {
    #[must_use]
    pub fn new(fetcher: &'a ResilientFetcher, pages: &'a [String], budget: RetryBudget) -> Self {
        Self {
            fetcher,
            pages,
            budget,
        }
    }

    /// Scrapes every page in order.
    ///
    /// # Errors
    ///
    /// Fails when a page cannot be fetched or has no firmware table.
    #[instrument(skip_all, fields(pages = self.pages.len()))]
    pub async fn scrape(&self, cache: &mut FetchCache) -> Result<ScrapedModels, ScrapeError> {
        let mut models = ScrapedModels::new();
        for url in self.pages {
            let body = self.fetcher.get(cache, url, self.budget).await?;
            let html = String::from_utf8(body).map_err(|source| ScrapeError::Encoding {
                url: url.clone(),
                source,
            })?;
            let rows = parse_firmware_table(url, &html)?;
            info!(url = %url, rows = rows.len(), "scraped firmware table");
            for (model, version) in rows {
                models.insert(model, version);
            }
        }
        Ok(models)
    }
}
