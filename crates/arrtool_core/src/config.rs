use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::MediaKind;
use crate::matcher::MatchPolicy;

/// Ceilings at or above this are refused outright; the run must not start.
pub const FATAL_SEARCH_CEILING: u32 = 20;
/// Ceilings at or above this are allowed but warned about.
pub const RISKY_SEARCH_CEILING: u32 = 10;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub maximum_searches: u32,
    #[serde(default)]
    pub radarr: Vec<InstanceConfig>,
    #[serde(default)]
    pub sonarr: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InstanceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub include_profiles: Vec<String>,
    #[serde(default)]
    pub exclude_profiles: Vec<String>,
    #[serde(default)]
    pub exclude_titles: Vec<String>,
}

impl InstanceConfig {
    /// Resolve the instance API key: `ARRTOOL_API_KEY_<NAME>` > config value.
    pub fn api_key(&self) -> Result<String> {
        let env_key = format!(
            "ARRTOOL_API_KEY_{}",
            self.name.to_uppercase().replace(['-', ' '], "_")
        );
        if let Ok(value) = env::var(&env_key) {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Ok(trimmed);
            }
        }
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => bail!(
                "no API key for instance {} (set {env_key} or api_key in the config)",
                self.name
            ),
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            include_profiles: self.include_profiles.clone(),
            exclude_profiles: self.exclude_profiles.clone(),
            exclude_titles: self.exclude_titles.iter().cloned().collect::<BTreeSet<_>>(),
        }
    }
}

impl AppConfig {
    /// All configured instances, movie instances first, in config order.
    pub fn instances(&self) -> impl Iterator<Item = (MediaKind, &InstanceConfig)> {
        self.radarr
            .iter()
            .map(|instance| (MediaKind::Movie, instance))
            .chain(
                self.sonarr
                    .iter()
                    .map(|instance| (MediaKind::Series, instance)),
            )
    }
}

pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AppConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Hourly search ceiling that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchCeiling(u32);

impl SearchCeiling {
    /// Validate the configured ceiling before any filesystem or network
    /// work. Twenty or more searches per hour is enough to get an account
    /// flagged on private trackers, so that tier is fatal.
    pub fn validate(maximum_searches: u32) -> Result<Self> {
        if maximum_searches >= FATAL_SEARCH_CEILING {
            bail!(
                "maximum_searches is {maximum_searches}; ceilings of {FATAL_SEARCH_CEILING} or more are refused"
            );
        }
        if maximum_searches >= RISKY_SEARCH_CEILING {
            warn!(
                maximum_searches,
                "high search ceiling; this can strain trackers"
            );
        } else if maximum_searches == 0 {
            info!("maximum_searches is 0; matching will run but no actions will be issued");
        }
        Ok(Self(maximum_searches))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}
