use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

// The greedy prefix makes the last `Title (YYYY)` path segment win, so a
// year-suffixed release folder inside a differently named library folder
// resolves to the release name.
static TITLE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*/([^/]+) \((\d{4})\)").expect("valid title pattern"));
static SEASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S(\d{2})E").expect("valid season pattern"));
static EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)E(\d{1,2})").expect("valid episode pattern"));

/// Identity extracted from a media path. Absent pattern matches leave the
/// corresponding field unset; a record without a title is still emitted but
/// is excluded from catalog matching downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub identity: Identity,
}

/// Series observations keyed by `(title, year)`: per-season episode lists,
/// appended in file order without deduplication.
pub type SeriesObservations = BTreeMap<(String, i32), BTreeMap<u32, Vec<u32>>>;

pub fn parse_identity(path: &Path) -> Identity {
    let text = path.to_string_lossy();
    let (title, year) = match TITLE_YEAR.captures(&text) {
        Some(caps) => (Some(caps[1].to_string()), caps[2].parse::<i32>().ok()),
        None => (None, None),
    };
    // Season tokens are strictly two digits (`S02` -> 2, zero stripped by
    // the numeric parse); episode tokens are one or two digits.
    let season = SEASON
        .captures(&text)
        .and_then(|caps| caps[1].parse::<u32>().ok());
    let episode = EPISODE
        .captures(&text)
        .and_then(|caps| caps[1].parse::<u32>().ok());
    Identity {
        title,
        year,
        season,
        episode,
    }
}

pub fn parse_candidates(paths: &[PathBuf]) -> Vec<CandidateFile> {
    paths
        .iter()
        .map(|path| CandidateFile {
            path: path.clone(),
            identity: parse_identity(path),
        })
        .collect()
}

/// Distinct `(title, year)` identities observed among movie candidates.
pub fn fold_movie_observations(candidates: &[CandidateFile]) -> BTreeSet<(String, i32)> {
    let mut observed = BTreeSet::new();
    for candidate in candidates {
        match (&candidate.identity.title, candidate.identity.year) {
            (Some(title), Some(year)) => {
                observed.insert((title.clone(), year));
            }
            _ => warn!(
                path = %candidate.path.display(),
                "no title/year pattern in path; excluded from matching"
            ),
        }
    }
    observed
}

/// Fold series candidates into per-series season/episode observations.
/// Candidates without a season token can never be reconciled and are
/// dropped here; duplicate episode observations are preserved.
pub fn fold_series_observations(candidates: &[CandidateFile]) -> SeriesObservations {
    let mut observed: SeriesObservations = BTreeMap::new();
    for candidate in candidates {
        let identity = &candidate.identity;
        let (Some(title), Some(year)) = (&identity.title, identity.year) else {
            warn!(
                path = %candidate.path.display(),
                "no title/year pattern in path; excluded from matching"
            );
            continue;
        };
        let Some(season) = identity.season else {
            debug!(
                path = %candidate.path.display(),
                "no season token in path; cannot reconcile"
            );
            continue;
        };
        let episodes = observed
            .entry((title.clone(), year))
            .or_default()
            .entry(season)
            .or_default();
        if let Some(episode) = identity.episode {
            episodes.push(episode);
        }
    }
    observed
}
