use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const DEFAULT_CONFIG_FILENAME: &str = "arrtool.yml";
pub const STATE_DIR_NAME: &str = ".arrtool";
pub const STATE_DB_FILENAME: &str = "arrtool.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub state_db_path: PathBuf,
    pub config_source: ValueSource,
    pub state_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({})\nstate_dir={} ({})\nstate_db_path={}",
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.state_dir),
            self.state_source.as_str(),
            normalize_for_display(&self.state_db_path),
        )
    }
}

pub fn resolve_paths(context: &ResolutionContext, overrides: &PathOverrides) -> ResolvedPaths {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("ARRTOOL_CONFIG")
        && !value.trim().is_empty()
    {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (context.cwd.join(DEFAULT_CONFIG_FILENAME), ValueSource::Default)
    };

    let config_parent = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| context.cwd.clone());

    let (state_dir, state_source) = if let Some(path) = overrides.state_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("ARRTOOL_STATE_DIR")
        && !value.trim().is_empty()
    {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (config_parent.join(STATE_DIR_NAME), ValueSource::Default)
    };

    ResolvedPaths {
        state_db_path: state_dir.join(STATE_DB_FILENAME),
        config_path,
        state_dir,
        config_source,
        state_source,
    }
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{
        DEFAULT_CONFIG_FILENAME, PathOverrides, ResolutionContext, ValueSource,
        resolve_paths_with_lookup,
    };

    fn context() -> ResolutionContext {
        ResolutionContext {
            cwd: PathBuf::from("/work"),
        }
    }

    #[test]
    fn defaults_resolve_relative_to_cwd() {
        let paths = resolve_paths_with_lookup(&context(), &PathOverrides::default(), |_| None);
        assert_eq!(
            paths.config_path,
            Path::new("/work").join(DEFAULT_CONFIG_FILENAME)
        );
        assert_eq!(paths.state_dir, Path::new("/work/.arrtool"));
        assert_eq!(paths.state_db_path, Path::new("/work/.arrtool/arrtool.db"));
        assert_eq!(paths.config_source, ValueSource::Default);
        assert_eq!(paths.state_source, ValueSource::Default);
    }

    #[test]
    fn env_overrides_beat_defaults() {
        let paths = resolve_paths_with_lookup(&context(), &PathOverrides::default(), |key| {
            match key {
                "ARRTOOL_CONFIG" => Some("/etc/arrtool/config.yml".to_string()),
                "ARRTOOL_STATE_DIR" => Some("/var/lib/arrtool".to_string()),
                _ => None,
            }
        });
        assert_eq!(paths.config_path, Path::new("/etc/arrtool/config.yml"));
        assert_eq!(paths.state_dir, Path::new("/var/lib/arrtool"));
        assert_eq!(paths.config_source, ValueSource::Env);
        assert_eq!(paths.state_source, ValueSource::Env);
    }

    #[test]
    fn flags_beat_env() {
        let overrides = PathOverrides {
            config: Some(PathBuf::from("custom.yml")),
            state_dir: Some(PathBuf::from("state")),
        };
        let paths = resolve_paths_with_lookup(&context(), &overrides, |_| {
            Some("/ignored".to_string())
        });
        assert_eq!(paths.config_path, Path::new("/work/custom.yml"));
        assert_eq!(paths.state_dir, Path::new("/work/state"));
        assert_eq!(paths.config_source, ValueSource::Flag);
        assert_eq!(paths.state_source, ValueSource::Flag);
    }

    #[test]
    fn default_state_dir_follows_config_parent() {
        let overrides = PathOverrides {
            config: Some(PathBuf::from("/etc/arrtool/config.yml")),
            state_dir: None,
        };
        let paths = resolve_paths_with_lookup(&context(), &overrides, |_| None);
        assert_eq!(paths.state_dir, Path::new("/etc/arrtool/.arrtool"));
    }
}
