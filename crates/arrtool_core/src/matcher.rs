use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use deunicode::deunicode;
use regex::Regex;
use tracing::{info, warn};

use crate::catalog::CatalogItem;

// Catalog titles may carry a year disambiguator ("Heist (2021)"); the
// candidate title never does, so it is stripped before comparison.
static YEAR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" \(\d+\)").expect("valid year suffix pattern"));

/// Per-instance matching policy from the configuration.
#[derive(Debug, Clone, Default)]
pub struct MatchPolicy {
    pub include_profiles: Vec<String>,
    pub exclude_profiles: Vec<String>,
    pub exclude_titles: BTreeSet<String>,
}

/// Why a matched catalog item was rejected by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Eligible,
    Excluded,
    ProfileUnresolved,
    ProfileRejected,
    Unmonitored,
}

/// Normalize a title for identity comparison: transliterate to ASCII,
/// drop characters outside the allow-list, collapse every non-alphanumeric
/// run into a single space, lowercase. Idempotent.
pub fn normalize_title(raw: &str) -> String {
    let ascii = deunicode(raw);
    let mut out = String::with_capacity(ascii.len());
    let mut pending_gap = false;
    for ch in ascii.chars() {
        if !is_allowed(ch) {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            if pending_gap && !out.is_empty() {
                out.push(' ');
            }
            pending_gap = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_gap = true;
        }
    }
    out
}

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || ch.is_ascii_whitespace()
        || matches!(ch, '-' | '(' | ')' | '/' | '.' | '\'')
}

/// Find the catalog item whose normalized title and year match the parsed
/// identity. Equal titles one year apart are an ambiguous release-year
/// mismatch: warned about, never matched.
pub fn find_catalog_match<'a>(
    title: &str,
    year: i32,
    items: &'a [CatalogItem],
) -> Option<&'a CatalogItem> {
    let wanted = normalize_title(title);
    for item in items {
        let have = normalize_title(&YEAR_SUFFIX.replace_all(item.title(), ""));
        if have != wanted {
            continue;
        }
        if (item.year() - year).abs() == 1 {
            warn!(
                candidate = title,
                catalog = item.title(),
                candidate_year = year,
                catalog_year = item.year(),
                "titles match but release years differ by one; not treating as a match"
            );
            continue;
        }
        if item.year() == year {
            return Some(item);
        }
    }
    None
}

/// Apply the per-instance policy gates to a matched catalog item, logging
/// each skip. An unmonitored item is always rejected, independent of the
/// profile filters.
pub fn apply_policy(
    item: &CatalogItem,
    policy: &MatchPolicy,
    profiles: &BTreeMap<i64, String>,
) -> PolicyVerdict {
    if policy.exclude_titles.contains(item.title()) {
        info!(title = item.title(), "skipping; title is on the exclusion list");
        return PolicyVerdict::Excluded;
    }

    match profiles.get(&item.quality_profile_id()) {
        None => {
            warn!(
                title = item.title(),
                profile_id = item.quality_profile_id(),
                "skipping; no matching quality profile name"
            );
            return PolicyVerdict::ProfileUnresolved;
        }
        Some(name) => {
            if !policy.include_profiles.is_empty()
                && !policy.include_profiles.iter().any(|profile| profile == name)
            {
                info!(
                    title = item.title(),
                    profile = %name,
                    "skipping; quality profile is not on the include list"
                );
                return PolicyVerdict::ProfileRejected;
            }
            if policy.exclude_profiles.iter().any(|profile| profile == name) {
                info!(
                    title = item.title(),
                    profile = %name,
                    "skipping; quality profile is explicitly excluded"
                );
                return PolicyVerdict::ProfileRejected;
            }
        }
    }

    if !item.monitored() {
        info!(title = item.title(), "skipping; item is not monitored");
        return PolicyVerdict::Unmonitored;
    }

    PolicyVerdict::Eligible
}
