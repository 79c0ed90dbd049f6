use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::catalog::CatalogWriteApi;
use crate::reconcile::ActionDescriptor;
use crate::throttle::{self, ThrottleState};

/// What one instance's dispatch pass actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub dispatched: usize,
    pub skipped_at_ceiling: usize,
}

/// Owns the run's throttle state: loaded once at run start, carried across
/// every instance, written back once at run end. Actions are dispatched in
/// the order produced; the first gate failure aborts the remainder (already
/// applied actions are not rolled back).
pub struct ThrottledExecutor {
    state: ThrottleState,
    max_searches: u32,
    dry_run: bool,
    ceiling_announced: bool,
}

impl ThrottledExecutor {
    /// Load persisted state and rotate the window. Called once per run,
    /// before any gating decision.
    pub fn start(state_db: &Path, max_searches: u32, dry_run: bool, now: u64) -> Self {
        let state = throttle::load_state(state_db).rotated(now);
        Self {
            state,
            max_searches,
            dry_run,
            ceiling_announced: false,
        }
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    /// Dispatch actions in order, stopping at the hourly ceiling.
    /// Collaborator errors propagate to the caller mid-sequence; the
    /// caller is responsible for calling [`finish`](Self::finish) on every
    /// exit path.
    pub fn run(
        &mut self,
        api: &mut dyn CatalogWriteApi,
        actions: &[ActionDescriptor],
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        for (index, action) in actions.iter().enumerate() {
            if self.state.search_count >= self.max_searches {
                if !self.ceiling_announced {
                    warn!(
                        ceiling = self.max_searches,
                        "hourly search ceiling reached; skipping remaining actions"
                    );
                    self.ceiling_announced = true;
                }
                report.skipped_at_ceiling = actions.len() - index;
                return Ok(report);
            }
            dispatch_one(api, action, self.dry_run)?;
            if !self.dry_run {
                self.state.search_count += 1;
            }
            report.dispatched += 1;
        }
        Ok(report)
    }

    /// Persist the throttle state. Called once at run end whether the run
    /// completed, aborted at the ceiling, or failed mid-sequence.
    pub fn finish(&self, state_db: &Path) {
        throttle::save_state(state_db, self.state);
    }
}

fn dispatch_one(
    api: &mut dyn CatalogWriteApi,
    action: &ActionDescriptor,
    dry_run: bool,
) -> Result<()> {
    match action {
        ActionDescriptor::Movie {
            media_id,
            file_id,
            title,
        } => {
            if dry_run {
                info!(
                    title = %title,
                    "dry run: would delete the movie file and search for a replacement"
                );
                return Ok(());
            }
            api.delete_movie_file(*file_id)?;
            api.refresh(*media_id)?;
            api.search_movie(*media_id)?;
            info!(
                title = %title,
                file_id,
                "deleted movie file and requested a replacement search"
            );
        }
        ActionDescriptor::Series {
            media_id,
            title,
            season_number,
            season_pack: true,
            episode_file_ids,
            ..
        } => {
            if dry_run {
                info!(
                    title = %title,
                    season = season_number,
                    "dry run: would delete the season's files and search for a season pack"
                );
                return Ok(());
            }
            api.delete_episode_files(episode_file_ids)?;
            api.refresh(*media_id)?;
            api.search_season(*media_id, *season_number)?;
            info!(
                title = %title,
                season = season_number,
                files = episode_file_ids.len(),
                "deleted season files and requested a season search"
            );
        }
        ActionDescriptor::Series {
            media_id,
            title,
            season_number,
            season_pack: false,
            episode_file_ids,
            episode_ids,
            episode_numbers,
        } => {
            if dry_run {
                info!(
                    title = %title,
                    season = season_number,
                    episodes = ?episode_numbers,
                    "dry run: would delete episode files and search for replacements"
                );
                return Ok(());
            }
            api.delete_episode_files(episode_file_ids)?;
            api.refresh(*media_id)?;
            api.search_episodes(episode_ids)?;
            info!(
                title = %title,
                season = season_number,
                episodes = ?episode_numbers,
                "deleted episode files and requested per-episode searches"
            );
        }
    }
    Ok(())
}
