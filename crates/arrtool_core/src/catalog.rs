use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

/// Which catalog dialect an instance speaks. Replaces the usual
/// "Radarr"/"Sonarr" string comparisons with a closed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovieRecord {
    pub id: i64,
    pub title: String,
    pub year: i32,
    pub monitored: bool,
    pub quality_profile_id: i64,
    #[serde(default)]
    pub movie_file: Option<MovieFileRecord>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MovieFileRecord {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRecord {
    pub id: i64,
    pub title: String,
    pub year: i32,
    pub monitored: bool,
    pub quality_profile_id: i64,
    #[serde(default)]
    pub seasons: Vec<SeasonRecord>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeasonRecord {
    pub season_number: u32,
    pub monitored: bool,
    #[serde(default)]
    pub statistics: Option<SeasonStatistics>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeasonStatistics {
    pub episode_file_count: u32,
    pub total_episode_count: u32,
}

/// One tracked episode of a series, fetched on demand per series.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeasonDetailRow {
    pub id: i64,
    pub season_number: u32,
    pub episode_number: u32,
    pub monitored: bool,
    #[serde(default)]
    pub episode_file_id: i64,
}

impl SeasonDetailRow {
    /// The catalog reports `0` for episodes without a file on disk.
    pub fn file_id(&self) -> Option<i64> {
        (self.episode_file_id > 0).then_some(self.episode_file_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogItem {
    Movie(MovieRecord),
    Series(SeriesRecord),
}

impl CatalogItem {
    pub fn id(&self) -> i64 {
        match self {
            Self::Movie(record) => record.id,
            Self::Series(record) => record.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Movie(record) => &record.title,
            Self::Series(record) => &record.title,
        }
    }

    pub fn year(&self) -> i32 {
        match self {
            Self::Movie(record) => record.year,
            Self::Series(record) => record.year,
        }
    }

    pub fn monitored(&self) -> bool {
        match self {
            Self::Movie(record) => record.monitored,
            Self::Series(record) => record.monitored,
        }
    }

    pub fn quality_profile_id(&self) -> i64 {
        match self {
            Self::Movie(record) => record.quality_profile_id,
            Self::Series(record) => record.quality_profile_id,
        }
    }
}

pub trait CatalogReadApi {
    fn list_media(&mut self) -> Result<Vec<CatalogItem>>;
    fn list_quality_profiles(&mut self) -> Result<BTreeMap<i64, String>>;
    fn get_season_detail(&mut self, media_id: i64) -> Result<Vec<SeasonDetailRow>>;
}

pub trait CatalogWriteApi: CatalogReadApi {
    fn delete_movie_file(&mut self, file_id: i64) -> Result<()>;
    fn delete_episode_files(&mut self, file_ids: &[i64]) -> Result<()>;
    fn refresh(&mut self, media_id: i64) -> Result<()>;
    fn search_movie(&mut self, media_id: i64) -> Result<()>;
    fn search_season(&mut self, media_id: i64, season_number: u32) -> Result<()>;
    fn search_episodes(&mut self, episode_ids: &[i64]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CatalogClientConfig {
    pub kind: MediaKind,
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl CatalogClientConfig {
    pub fn new(kind: MediaKind, base_url: &str, api_key: &str) -> Self {
        Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_ms: env_value_u64("ARRTOOL_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("ARRTOOL_RATE_LIMIT_MS", 250),
            max_retries: env_value_usize("ARRTOOL_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("ARRTOOL_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Blocking client for one Sonarr/Radarr-style instance. All calls are
/// synchronous request/response; a polite inter-request delay is applied
/// and only idempotent reads are retried.
pub struct CatalogClient {
    client: Client,
    config: CatalogClientConfig,
    last_request_at: Option<Instant>,
}

impl CatalogClient {
    pub fn new(config: CatalogClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build catalog HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3/{path}", self.config.base_url)
    }

    fn request_json(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = self.url(path);
        let retries = if method == Method::GET {
            self.config.max_retries
        } else {
            0
        };

        for attempt in 0..=retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("X-Api-Key", self.config.api_key.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("catalog API request {method} {url} failed with HTTP {status}");
                    }
                    let text = response
                        .text()
                        .context("failed to read catalog API response body")?;
                    if text.trim().is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&text)
                        .with_context(|| format!("failed to decode catalog API response from {url}"));
                }
                Err(error) => {
                    if attempt < retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call catalog API at {url}"));
                }
            }
        }

        bail!("catalog API request exhausted retry budget")
    }

    fn command(&mut self, body: Value) -> Result<()> {
        self.request_json(Method::POST, "command", &[], Some(body))?;
        Ok(())
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let delay = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        sleep(Duration::from_millis(delay));
    }
}

impl CatalogReadApi for CatalogClient {
    fn list_media(&mut self) -> Result<Vec<CatalogItem>> {
        match self.config.kind {
            MediaKind::Movie => {
                let payload = self.request_json(Method::GET, "movie", &[], None)?;
                let records: Vec<MovieRecord> = serde_json::from_value(payload)
                    .context("failed to decode movie list response")?;
                Ok(records.into_iter().map(CatalogItem::Movie).collect())
            }
            MediaKind::Series => {
                let payload = self.request_json(Method::GET, "series", &[], None)?;
                let records: Vec<SeriesRecord> = serde_json::from_value(payload)
                    .context("failed to decode series list response")?;
                Ok(records.into_iter().map(CatalogItem::Series).collect())
            }
        }
    }

    fn list_quality_profiles(&mut self) -> Result<BTreeMap<i64, String>> {
        #[derive(Deserialize)]
        struct Profile {
            id: i64,
            name: String,
        }
        let payload = self.request_json(Method::GET, "qualityprofile", &[], None)?;
        let profiles: Vec<Profile> = serde_json::from_value(payload)
            .context("failed to decode quality profile response")?;
        Ok(profiles
            .into_iter()
            .map(|profile| (profile.id, profile.name))
            .collect())
    }

    fn get_season_detail(&mut self, media_id: i64) -> Result<Vec<SeasonDetailRow>> {
        let payload = self.request_json(
            Method::GET,
            "episode",
            &[("seriesId", media_id.to_string())],
            None,
        )?;
        serde_json::from_value(payload).context("failed to decode episode list response")
    }
}

impl CatalogWriteApi for CatalogClient {
    fn delete_movie_file(&mut self, file_id: i64) -> Result<()> {
        self.request_json(Method::DELETE, &format!("moviefile/{file_id}"), &[], None)?;
        Ok(())
    }

    fn delete_episode_files(&mut self, file_ids: &[i64]) -> Result<()> {
        self.request_json(
            Method::DELETE,
            "episodefile/bulk",
            &[],
            Some(json!({ "episodeFileIds": file_ids })),
        )?;
        Ok(())
    }

    fn refresh(&mut self, media_id: i64) -> Result<()> {
        match self.config.kind {
            MediaKind::Movie => {
                self.command(json!({ "name": "RefreshMovie", "movieIds": [media_id] }))
            }
            MediaKind::Series => {
                self.command(json!({ "name": "RefreshSeries", "seriesId": media_id }))
            }
        }
    }

    fn search_movie(&mut self, media_id: i64) -> Result<()> {
        self.command(json!({ "name": "MoviesSearch", "movieIds": [media_id] }))
    }

    fn search_season(&mut self, media_id: i64, season_number: u32) -> Result<()> {
        self.command(json!({
            "name": "SeasonSearch",
            "seriesId": media_id,
            "seasonNumber": season_number,
        }))
    }

    fn search_episodes(&mut self, episode_ids: &[i64]) -> Result<()> {
        self.command(json!({ "name": "EpisodeSearch", "episodeIds": episode_ids }))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
