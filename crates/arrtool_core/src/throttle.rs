use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, warn};

/// Length of the rolling search window.
pub const WINDOW_SECONDS: u64 = 3600;

/// Persisted search accounting for the rolling hour. The count never
/// exceeds the configured ceiling within an active window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub search_count: u32,
    pub window_start: u64,
}

impl ThrottleState {
    /// Rotate the window if it has lapsed. Evaluated once per run, before
    /// any gating decision.
    pub fn rotated(self, now: u64) -> Self {
        if now.saturating_sub(self.window_start) >= WINDOW_SECONDS {
            Self {
                search_count: 0,
                window_start: now,
            }
        } else {
            self
        }
    }

    /// Seconds until the current window lapses.
    pub fn seconds_until_rotation(self, now: u64) -> u64 {
        WINDOW_SECONDS.saturating_sub(now.saturating_sub(self.window_start))
    }
}

pub fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}

/// Load the persisted throttle state. Every failure mode (missing
/// database, missing table, unreadable rows) degrades to the zero state
/// rather than failing the run.
pub fn load_state(db_path: &Path) -> ThrottleState {
    match read_state(db_path) {
        Ok(state) => state,
        Err(error) => {
            debug!(%error, "throttle state unavailable; starting from zero");
            ThrottleState::default()
        }
    }
}

/// Persist the throttle state. Best-effort: a failed write is logged and
/// swallowed, and the next run re-derives a stale window.
pub fn save_state(db_path: &Path, state: ThrottleState) {
    if let Err(error) = write_state(db_path, state) {
        warn!(%error, "failed to persist throttle state");
    }
}

fn read_state(db_path: &Path) -> Result<ThrottleState> {
    let connection = open_connection(db_path)?;
    let search_count = read_value(&connection, "search_count")?;
    let window_start = read_value(&connection, "window_start")?;
    Ok(ThrottleState {
        search_count: u32::try_from(search_count).context("stored search count out of range")?,
        window_start: u64::try_from(window_start).context("stored window start out of range")?,
    })
}

fn write_state(db_path: &Path, state: ThrottleState) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let connection = open_connection(db_path)?;
    connection
        .execute(
            "CREATE TABLE IF NOT EXISTS throttle (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
            [],
        )
        .context("failed to create throttle table")?;
    let window_start =
        i64::try_from(state.window_start).context("window start does not fit into i64")?;
    connection
        .execute(
            "INSERT INTO throttle (key, value) VALUES ('search_count', ?1), ('window_start', ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![i64::from(state.search_count), window_start],
        )
        .context("failed to write throttle rows")?;
    Ok(())
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    Ok(connection)
}

fn read_value(connection: &Connection, key: &str) -> Result<i64> {
    connection
        .query_row("SELECT value FROM throttle WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .with_context(|| format!("failed to read throttle row {key}"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{ThrottleState, WINDOW_SECONDS, load_state, save_state};

    #[test]
    fn missing_store_defaults_to_zero() {
        let temp = tempdir().expect("tempdir");
        let state = load_state(&temp.path().join("state").join("arrtool.db"));
        assert_eq!(state, ThrottleState::default());
    }

    #[test]
    fn state_round_trips() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("arrtool.db");
        let state = ThrottleState {
            search_count: 4,
            window_start: 1_700_000_000,
        };
        save_state(&db_path, state);
        assert_eq!(load_state(&db_path), state);

        // Overwrites, not appends.
        let updated = ThrottleState {
            search_count: 5,
            window_start: 1_700_000_100,
        };
        save_state(&db_path, updated);
        assert_eq!(load_state(&db_path), updated);
    }

    #[test]
    fn corrupt_store_degrades_to_zero() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("arrtool.db");
        fs::write(&db_path, b"not a sqlite database").expect("write garbage");
        assert_eq!(load_state(&db_path), ThrottleState::default());
    }

    #[test]
    fn lapsed_window_rotates_to_zero() {
        let now = 1_700_000_000u64;
        let state = ThrottleState {
            search_count: 5,
            window_start: now - WINDOW_SECONDS - 61,
        };
        assert_eq!(
            state.rotated(now),
            ThrottleState {
                search_count: 0,
                window_start: now,
            }
        );
    }

    #[test]
    fn active_window_is_untouched() {
        let now = 1_700_000_000u64;
        let state = ThrottleState {
            search_count: 5,
            window_start: now - WINDOW_SECONDS + 10,
        };
        assert_eq!(state.rotated(now), state);
        assert_eq!(state.seconds_until_rotation(now), 10);
    }
}
