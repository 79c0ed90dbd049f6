use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::catalog::{CatalogItem, CatalogReadApi, MediaKind, SeriesRecord};
use crate::matcher::{MatchPolicy, PolicyVerdict, apply_policy, find_catalog_match};
use crate::parse::{
    CandidateFile, SeriesObservations, fold_movie_observations, fold_series_observations,
    parse_candidates,
};

/// A single remediation unit, built by the reconciliation pipeline and
/// consumed exactly once by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDescriptor {
    Movie {
        media_id: i64,
        file_id: i64,
        title: String,
    },
    Series {
        media_id: i64,
        title: String,
        season_number: u32,
        season_pack: bool,
        episode_file_ids: Vec<i64>,
        episode_ids: Vec<i64>,
        episode_numbers: Vec<u32>,
    },
}

/// Build the ordered action list for one instance from probed files:
/// parse identities, match them against the catalog, filter by policy,
/// and (for series) reconcile at season granularity.
pub fn build_actions(
    kind: MediaKind,
    files: &[PathBuf],
    policy: &MatchPolicy,
    api: &mut dyn CatalogReadApi,
) -> Result<Vec<ActionDescriptor>> {
    let candidates = parse_candidates(files);
    let items = api.list_media()?;
    let profiles = api.list_quality_profiles()?;
    match kind {
        MediaKind::Movie => Ok(build_movie_actions(&candidates, &items, policy, &profiles)),
        MediaKind::Series => {
            let observed = fold_series_observations(&candidates);
            build_series_actions(&observed, &items, policy, &profiles, api)
        }
    }
}

fn build_movie_actions(
    candidates: &[CandidateFile],
    items: &[CatalogItem],
    policy: &MatchPolicy,
    profiles: &BTreeMap<i64, String>,
) -> Vec<ActionDescriptor> {
    let observed = fold_movie_observations(candidates);
    let mut actions = Vec::new();
    for (title, year) in &observed {
        let Some(item) = find_catalog_match(title, *year, items) else {
            continue;
        };
        if apply_policy(item, policy, profiles) != PolicyVerdict::Eligible {
            continue;
        }
        let CatalogItem::Movie(record) = item else {
            continue;
        };
        match &record.movie_file {
            Some(file) => actions.push(ActionDescriptor::Movie {
                media_id: record.id,
                file_id: file.id,
                title: record.title.clone(),
            }),
            None => debug!(
                title = %record.title,
                "matched movie has no file on record; nothing to replace"
            ),
        }
    }
    actions
}

fn build_series_actions(
    observed: &SeriesObservations,
    items: &[CatalogItem],
    policy: &MatchPolicy,
    profiles: &BTreeMap<i64, String>,
    api: &mut dyn CatalogReadApi,
) -> Result<Vec<ActionDescriptor>> {
    let mut actions = Vec::new();
    for ((title, year), seasons_observed) in observed {
        let Some(item) = find_catalog_match(title, *year, items) else {
            continue;
        };
        if apply_policy(item, policy, profiles) != PolicyVerdict::Eligible {
            continue;
        }
        let CatalogItem::Series(record) = item else {
            continue;
        };
        reconcile_series(record, seasons_observed, api, &mut actions)?;
    }
    Ok(actions)
}

/// Reconcile one matched series: intersect its monitored seasons with the
/// observed seasons, then decide pack-vs-partial per common season. A
/// season whose tracked file count equals its tracked episode count is
/// replaced wholesale; a season still filling in is replaced only at the
/// episodes actually observed.
fn reconcile_series(
    record: &SeriesRecord,
    seasons_observed: &BTreeMap<u32, Vec<u32>>,
    api: &mut dyn CatalogReadApi,
    actions: &mut Vec<ActionDescriptor>,
) -> Result<()> {
    let monitored: BTreeSet<u32> = record
        .seasons
        .iter()
        .filter(|season| season.monitored)
        .map(|season| season.season_number)
        .collect();
    let common: Vec<u32> = seasons_observed
        .keys()
        .copied()
        .filter(|number| monitored.contains(number))
        .collect();
    if common.is_empty() {
        debug!(
            title = %record.title,
            "no monitored season intersects the observed files"
        );
        return Ok(());
    }

    let detail = api.get_season_detail(record.id)?;

    for season_number in common {
        let stats = record
            .seasons
            .iter()
            .find(|season| season.season_number == season_number)
            .and_then(|season| season.statistics)
            .unwrap_or_default();
        let season_pack = stats.episode_file_count == stats.total_episode_count;
        let observed_episodes = seasons_observed
            .get(&season_number)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut episode_file_ids = Vec::new();
        let mut episode_ids = Vec::new();
        let mut episode_numbers = Vec::new();
        for row in detail
            .iter()
            .filter(|row| row.monitored && row.season_number == season_number)
        {
            let Some(file_id) = row.file_id() else {
                continue;
            };
            if season_pack {
                // A full-season replace targets every tracked file once,
                // independent of which episodes were observed deficient.
                if !episode_file_ids.contains(&file_id) {
                    episode_file_ids.push(file_id);
                }
            } else if observed_episodes.contains(&row.episode_number) {
                episode_file_ids.push(file_id);
                episode_ids.push(row.id);
                episode_numbers.push(row.episode_number);
            }
        }

        if episode_file_ids.is_empty() {
            debug!(
                title = %record.title,
                season = season_number,
                "no tracked files to replace for this season"
            );
            continue;
        }

        actions.push(ActionDescriptor::Series {
            media_id: record.id,
            title: record.title.clone(),
            season_number,
            season_pack,
            episode_file_ids,
            episode_ids,
            episode_numbers,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use anyhow::Result;

    use super::{ActionDescriptor, build_actions};
    use crate::catalog::{
        CatalogItem, CatalogReadApi, MediaKind, MovieFileRecord, MovieRecord, SeasonDetailRow,
        SeasonRecord, SeasonStatistics, SeriesRecord,
    };
    use crate::matcher::MatchPolicy;

    struct MockCatalog {
        items: Vec<CatalogItem>,
        profiles: BTreeMap<i64, String>,
        detail: Vec<SeasonDetailRow>,
        detail_requests: Vec<i64>,
    }

    impl MockCatalog {
        fn new(items: Vec<CatalogItem>, detail: Vec<SeasonDetailRow>) -> Self {
            Self {
                items,
                profiles: BTreeMap::from([(1, "HD-1080p".to_string())]),
                detail,
                detail_requests: Vec::new(),
            }
        }
    }

    impl CatalogReadApi for MockCatalog {
        fn list_media(&mut self) -> Result<Vec<CatalogItem>> {
            Ok(self.items.clone())
        }

        fn list_quality_profiles(&mut self) -> Result<BTreeMap<i64, String>> {
            Ok(self.profiles.clone())
        }

        fn get_season_detail(&mut self, media_id: i64) -> Result<Vec<SeasonDetailRow>> {
            self.detail_requests.push(media_id);
            Ok(self.detail.clone())
        }
    }

    fn series(seasons: Vec<SeasonRecord>) -> CatalogItem {
        CatalogItem::Series(SeriesRecord {
            id: 11,
            title: "Show".to_string(),
            year: 2020,
            monitored: true,
            quality_profile_id: 1,
            seasons,
        })
    }

    fn season(number: u32, monitored: bool, files: u32, total: u32) -> SeasonRecord {
        SeasonRecord {
            season_number: number,
            monitored,
            statistics: Some(SeasonStatistics {
                episode_file_count: files,
                total_episode_count: total,
            }),
        }
    }

    fn row(id: i64, season: u32, episode: u32, monitored: bool, file_id: i64) -> SeasonDetailRow {
        SeasonDetailRow {
            id,
            season_number: season,
            episode_number: episode,
            monitored,
            episode_file_id: file_id,
        }
    }

    fn episode_paths(episodes: &[&str]) -> Vec<PathBuf> {
        episodes
            .iter()
            .map(|token| {
                PathBuf::from(format!(
                    "/tv/Show (2020)/Season 01/Show (2020) {token}.mkv"
                ))
            })
            .collect()
    }

    #[test]
    fn complete_season_is_replaced_as_a_pack() {
        // Observed only episodes 2 and 3, but season statistics say the
        // catalog holds all ten files: the whole season is targeted.
        let detail: Vec<SeasonDetailRow> = (1..=10)
            .map(|n| row(i64::from(n) + 100, 1, n, true, i64::from(n) + 500))
            .collect();
        let mut api = MockCatalog::new(vec![series(vec![season(1, true, 10, 10)])], detail);

        let actions = build_actions(
            MediaKind::Series,
            &episode_paths(&["S01E02", "S01E03"]),
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");

        assert_eq!(actions.len(), 1);
        let ActionDescriptor::Series {
            season_pack,
            episode_file_ids,
            episode_ids,
            ..
        } = &actions[0]
        else {
            panic!("expected a series action");
        };
        assert!(season_pack);
        assert_eq!(episode_file_ids.len(), 10);
        assert!(episode_ids.is_empty());
    }

    #[test]
    fn partial_season_targets_only_observed_episodes() {
        // Episode 5 is tracked and monitored but was not observed on disk;
        // it must not be targeted.
        let detail = vec![
            row(102, 1, 2, true, 502),
            row(103, 1, 3, true, 503),
            row(105, 1, 5, true, 505),
        ];
        let mut api = MockCatalog::new(vec![series(vec![season(1, true, 6, 10)])], detail);

        let actions = build_actions(
            MediaKind::Series,
            &episode_paths(&["S01E02", "S01E03"]),
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");

        assert_eq!(actions.len(), 1);
        let ActionDescriptor::Series {
            season_pack,
            episode_file_ids,
            episode_ids,
            episode_numbers,
            ..
        } = &actions[0]
        else {
            panic!("expected a series action");
        };
        assert!(!season_pack);
        assert_eq!(episode_file_ids, &vec![502, 503]);
        assert_eq!(episode_ids, &vec![102, 103]);
        assert_eq!(episode_numbers, &vec![2, 3]);
    }

    #[test]
    fn duplicate_observations_do_not_duplicate_targets() {
        // The observation list keeps duplicate episode numbers as observed
        // (see parse), but each catalog row is still collected only once.
        let detail = vec![row(102, 1, 2, true, 502), row(103, 1, 3, true, 503)];
        let mut api = MockCatalog::new(vec![series(vec![season(1, true, 6, 10)])], detail);

        let actions = build_actions(
            MediaKind::Series,
            &episode_paths(&["S01E02", "S01E02 repack", "S01E03"]),
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");

        assert_eq!(actions.len(), 1);
        let ActionDescriptor::Series {
            episode_file_ids, ..
        } = &actions[0]
        else {
            panic!("expected a series action");
        };
        assert_eq!(episode_file_ids, &vec![502, 503]);
    }

    #[test]
    fn unmonitored_seasons_and_rows_are_ignored() {
        let detail = vec![
            row(102, 1, 2, false, 502),
            row(103, 1, 3, true, 503),
            row(201, 2, 1, true, 601),
        ];
        let mut api = MockCatalog::new(
            vec![series(vec![season(1, true, 6, 10), season(2, false, 4, 4)])],
            detail,
        );

        let actions = build_actions(
            MediaKind::Series,
            &episode_paths(&["S01E02", "S01E03", "S02E01"]),
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");

        // Season 2 is unmonitored and ignored entirely; the unmonitored
        // row for episode 2 is skipped within season 1.
        assert_eq!(actions.len(), 1);
        let ActionDescriptor::Series {
            season_number,
            episode_file_ids,
            ..
        } = &actions[0]
        else {
            panic!("expected a series action");
        };
        assert_eq!(*season_number, 1);
        assert_eq!(episode_file_ids, &vec![503]);
    }

    #[test]
    fn seasons_outside_the_observed_set_are_ignored() {
        let detail = vec![row(102, 1, 2, true, 502), row(301, 3, 1, true, 701)];
        let mut api = MockCatalog::new(
            vec![series(vec![season(1, true, 6, 10), season(3, true, 2, 8)])],
            detail,
        );

        let actions = build_actions(
            MediaKind::Series,
            &episode_paths(&["S01E02"]),
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");

        assert_eq!(actions.len(), 1);
        let ActionDescriptor::Series { season_number, .. } = &actions[0] else {
            panic!("expected a series action");
        };
        assert_eq!(*season_number, 1);
    }

    #[test]
    fn unmatched_series_fetches_no_detail() {
        let mut api = MockCatalog::new(vec![series(vec![season(1, true, 6, 10)])], Vec::new());
        let actions = build_actions(
            MediaKind::Series,
            &[PathBuf::from(
                "/tv/Other Show (1999)/Season 01/Other Show (1999) S01E01.mkv",
            )],
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");
        assert!(actions.is_empty());
        assert!(api.detail_requests.is_empty());
    }

    #[test]
    fn excluded_series_produces_no_actions() {
        let policy = MatchPolicy {
            exclude_titles: ["Show".to_string()].into_iter().collect(),
            ..MatchPolicy::default()
        };
        let detail = vec![row(102, 1, 2, true, 502)];
        let mut api = MockCatalog::new(vec![series(vec![season(1, true, 10, 10)])], detail);

        let actions = build_actions(
            MediaKind::Series,
            &episode_paths(&["S01E02"]),
            &policy,
            &mut api,
        )
        .expect("build actions");
        assert!(actions.is_empty());
        assert!(api.detail_requests.is_empty());
    }

    #[test]
    fn year_ambiguity_produces_no_actions() {
        let detail = vec![row(102, 1, 2, true, 502)];
        let mut api = MockCatalog::new(vec![series(vec![season(1, true, 10, 10)])], detail);

        // Candidate year 2021, catalog year 2020: warned, not matched.
        let actions = build_actions(
            MediaKind::Series,
            &[PathBuf::from(
                "/tv/Show (2021)/Season 01/Show (2021) S01E02.mkv",
            )],
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");
        assert!(actions.is_empty());
    }

    #[test]
    fn movie_actions_target_the_tracked_file() {
        let items = vec![
            CatalogItem::Movie(MovieRecord {
                id: 5,
                title: "Movie".to_string(),
                year: 2021,
                monitored: true,
                quality_profile_id: 1,
                movie_file: Some(MovieFileRecord { id: 77 }),
            }),
            CatalogItem::Movie(MovieRecord {
                id: 6,
                title: "Fileless".to_string(),
                year: 2022,
                monitored: true,
                quality_profile_id: 1,
                movie_file: None,
            }),
        ];
        let mut api = MockCatalog::new(items, Vec::new());

        let actions = build_actions(
            MediaKind::Movie,
            &[
                PathBuf::from("/movies/Movie (2021)/Movie (2021).mkv"),
                PathBuf::from("/movies/Fileless (2022)/Fileless (2022).mkv"),
            ],
            &MatchPolicy::default(),
            &mut api,
        )
        .expect("build actions");

        assert_eq!(
            actions,
            vec![ActionDescriptor::Movie {
                media_id: 5,
                file_id: 77,
                title: "Movie".to_string(),
            }]
        );
    }
}
