//! Reconciliation of API-discovered firmware with scraped model/version lists.
//!
//! Discovered records are grouped by filename basename. Each group is matched
//! to at most one scraped model; matched groups gain a synthesized record for
//! every scraped version the API did not return.

mod similarity;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info, instrument};

use crate::firmware::{Firmware, FilenameError, FilenamePattern};
use crate::scrape::ScrapedModels;

pub use similarity::ratio;

/// Published location of firmware files.
pub const DOWNLOAD_BASE: &str = "https://api.shimano.com/etube/public/data/upload/published";

/// Fuzzy matches must score strictly above this ratio.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.7;

/// How a group was matched to a scraped model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    /// The normalized model name occurs inside the group name.
    Contains,
    /// The group name occurs inside the normalized model name.
    ContainedIn,
    /// Best similarity ratio above [`FUZZY_MATCH_THRESHOLD`].
    Similar { ratio: f64 },
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains => f.write_str("substr"),
            Self::ContainedIn => f.write_str("rev. substr"),
            Self::Similar { ratio } => write!(f, "similar (ratio: {ratio:.3})"),
        }
    }
}

/// A scraped model chosen for a group.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMatch {
    pub model: String,
    pub kind: MatchKind,
}

/// Scraped model names carry hyphens the filenames often drop.
#[must_use]
pub fn normalize_model(model: &str) -> String {
    model.replace('-', "")
}

/// Picks the scraped model for `group`.
///
/// Containment is tried first, then reverse containment, then the best
/// similarity ratio. Ties go to the model scraped first. Models that
/// normalize to nothing (a lone `-` cell) never match.
#[must_use]
pub fn match_model(group: &str, scraped: &ScrapedModels) -> Option<ModelMatch> {
    let normalized: Vec<(&str, String)> = scraped
        .models()
        .map(|model| (model, normalize_model(model)))
        .filter(|(_, norm)| !norm.trim().is_empty())
        .collect();

    let found = |kind: MatchKind, model: &str| ModelMatch {
        model: model.to_string(),
        kind,
    };

    if let Some((model, _)) = normalized.iter().find(|(_, norm)| group.contains(norm.as_str())) {
        return Some(found(MatchKind::Contains, model));
    }
    if let Some((model, _)) = normalized.iter().find(|(_, norm)| norm.contains(group)) {
        return Some(found(MatchKind::ContainedIn, model));
    }

    let mut best: Option<(&str, f64)> = None;
    for (model, norm) in &normalized {
        let score = ratio(group, norm);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((*model, score));
        }
    }
    best.filter(|&(_, score)| score > FUZZY_MATCH_THRESHOLD)
        .map(|(model, score)| found(MatchKind::Similar { ratio: score }, model))
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Discovered plus synthesized records, structurally deduplicated.
    pub firmware: BTreeSet<Firmware>,
    /// Match decision for every group, unmatched groups included.
    pub matches: BTreeMap<String, Option<ModelMatch>>,
    /// Number of records added from scraped versions.
    pub synthesized: usize,
}

/// Merges discovered firmware with scraped model versions.
#[derive(Debug, Clone)]
pub struct SourceReconciler {
    download_base: String,
}

impl Default for SourceReconciler {
    fn default() -> Self {
        Self::new(DOWNLOAD_BASE)
    }
}

impl SourceReconciler {
    pub fn new(download_base: impl Into<String>) -> Self {
        Self {
            download_base: download_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Download URL for a synthesized `filename`.
    #[must_use]
    pub fn download_url(&self, filename: &str) -> String {
        format!("{}/{filename}", self.download_base)
    }

    /// Groups, matches and synthesizes.
    ///
    /// # Errors
    ///
    /// Returns [`FilenameError`] if any discovered filename does not follow
    /// the firmware naming scheme.
    #[instrument(skip_all, fields(firmware = discovered.len(), models = scraped.len()))]
    pub fn reconcile(
        &self,
        discovered: &[Firmware],
        scraped: &ScrapedModels,
    ) -> Result<Reconciliation, FilenameError> {
        let mut groups: BTreeMap<String, Vec<(&Firmware, FilenamePattern)>> = BTreeMap::new();
        for firmware in discovered {
            let pattern = FilenamePattern::parse(&firmware.filename)?;
            groups
                .entry(pattern.basename().to_string())
                .or_default()
                .push((firmware, pattern));
        }

        let mut result = Reconciliation {
            firmware: discovered.iter().cloned().collect(),
            ..Reconciliation::default()
        };

        for (name, members) in &groups {
            let matched = match_model(name, scraped);
            match &matched {
                Some(m) => info!(group = %name, model = %m.model, "{}", m.kind),
                None => info!(group = %name, "no match with scraped data"),
            }

            if let (Some(m), Some((template, pattern))) = (&matched, members.first()) {
                let present: BTreeSet<&str> = members
                    .iter()
                    .flat_map(|(fw, pattern)| [fw.version.as_str(), pattern.version()])
                    .collect();
                for version in scraped.versions(&m.model).unwrap_or_default() {
                    if present.contains(version.as_str()) {
                        continue;
                    }
                    let filename = pattern.with_version(version);
                    debug!(group = %name, %filename, "synthesized firmware record");
                    let added = result.firmware.insert(Firmware {
                        download_url: self.download_url(&filename),
                        filename,
                        version: version.clone(),
                        filesize: None,
                        md5: None,
                        kind: template.kind.clone(),
                    });
                    if added {
                        result.synthesized += 1;
                    }
                }
            }
            result.matches.insert(name.clone(), matched);
        }

        info!(
            groups = result.matches.len(),
            synthesized = result.synthesized,
            "reconciled firmware"
        );
        Ok(result)
    }
}
