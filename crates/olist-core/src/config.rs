use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::lock::LockConfig;

/// Watchpath used when nothing else is configured, relative to the
/// project root.
pub const DEFAULT_WATCHPATH: &str = ".olist/remote";

/// List name used when nothing else is configured.
pub const DEFAULT_LIST: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub list: ListConfig,
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Root directory of the shared blob store.
    #[serde(default)]
    pub watchpath: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListConfig {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            acquire_timeout_ms: None,
        }
    }
}

impl LockSection {
    #[must_use]
    pub fn to_lock_config(&self) -> LockConfig {
        LockConfig {
            stale_after: Duration::from_millis(self.stale_after_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            acquire_timeout: self.acquire_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub watchpath: Option<PathBuf>,
    #[serde(default)]
    pub list: Option<String>,
}

/// Values given on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub json: bool,
    pub watchpath: Option<PathBuf>,
    pub list: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub watchpath: PathBuf,
    pub list: String,
    pub resolved_output: String,
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".olist/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content).with_context(|| {
        format!("{}: Failed to parse {}", ErrorCode::ConfigParseError, path.display())
    })
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("olist/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content).with_context(|| {
        format!("{}: Failed to parse {}", ErrorCode::ConfigParseError, path.display())
    })
}

/// Merge project file, user file, environment, and CLI flags.
///
/// Precedence, highest first: CLI flag, `OLIST_WATCHPATH`/`OLIST_LIST`,
/// project config, user config, built-in default. A relative watchpath is
/// resolved against `project_root`.
pub fn resolve_config(project_root: &Path, cli: &CliOverrides) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_watchpath = env::var_os("OLIST_WATCHPATH").map(PathBuf::from);
    let env_list = env::var("OLIST_LIST").ok();
    let env_format = env::var("FORMAT").ok();

    let watchpath = cli
        .watchpath
        .clone()
        .or(env_watchpath)
        .or_else(|| project.remote.watchpath.clone())
        .or_else(|| user.watchpath.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WATCHPATH));
    let watchpath = if watchpath.is_absolute() {
        watchpath
    } else {
        project_root.join(watchpath)
    };

    let list = cli
        .list
        .clone()
        .or(env_list)
        .or_else(|| project.list.name.clone())
        .or_else(|| user.list.clone())
        .unwrap_or_else(|| DEFAULT_LIST.to_string());
    validate_list_name(&list)?;

    let resolved_output = resolve_output(cli.json, user.output.clone(), env_format);

    Ok(EffectiveConfig {
        project,
        user,
        watchpath,
        list,
        resolved_output,
    })
}

/// List names become blob names, so they must be a single plain path
/// component that cannot collide with lock records.
pub fn validate_list_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control)
    {
        anyhow::bail!(
            "{}: invalid list name {name:?}; use a plain name without '/', '\\' or a leading '.'",
            ErrorCode::InvalidListName
        );
    }
    Ok(())
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_stale_after_ms() -> u64 {
    10_000
}

const fn default_retry_interval_ms() -> u64 {
    1_000
}

const fn default_update_interval_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = TempDir::new().expect("temp dir");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert!(cfg.remote.watchpath.is_none());
        assert!(cfg.list.name.is_none());
        assert_eq!(cfg.lock.to_lock_config(), LockConfig::default());
        assert_eq!(cfg.schedule.update_interval(), Duration::from_secs(30));
    }

    #[test]
    fn project_config_parses_all_sections() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(root.path().join(".olist")).expect("create .olist");
        std::fs::write(
            root.path().join(".olist/config.toml"),
            r#"
[remote]
watchpath = "/srv/lists"

[list]
name = "groceries"

[lock]
stale_after_ms = 5000
acquire_timeout_ms = 20000

[schedule]
update_interval_ms = 1500
"#,
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("parse");
        assert_eq!(cfg.remote.watchpath, Some(PathBuf::from("/srv/lists")));
        assert_eq!(cfg.list.name.as_deref(), Some("groceries"));
        let lock = cfg.lock.to_lock_config();
        assert_eq!(lock.stale_after, Duration::from_secs(5));
        assert_eq!(lock.retry_interval, Duration::from_secs(1));
        assert_eq!(lock.acquire_timeout, Some(Duration::from_secs(20)));
        assert_eq!(cfg.schedule.update_interval(), Duration::from_millis(1500));
    }

    #[test]
    fn malformed_project_config_is_an_error() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(root.path().join(".olist")).expect("create .olist");
        std::fs::write(root.path().join(".olist/config.toml"), "[lock\n").expect("write");
        let err = load_project_config(root.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn cli_overrides_win_and_relative_paths_resolve_against_root() {
        let root = TempDir::new().expect("temp dir");
        let cli = CliOverrides {
            json: true,
            watchpath: Some(PathBuf::from("shared")),
            list: Some("hardware".to_string()),
        };
        let cfg = resolve_config(root.path(), &cli).expect("resolve");
        assert_eq!(cfg.watchpath, root.path().join("shared"));
        assert_eq!(cfg.list, "hardware");
        assert_eq!(cfg.resolved_output, "json");
    }

    #[test]
    fn list_names_must_be_plain() {
        assert!(validate_list_name("groceries").is_ok());
        assert!(validate_list_name("week 12").is_ok());
        assert!(validate_list_name("").is_err());
        assert!(validate_list_name(".hidden").is_err());
        assert!(validate_list_name("a/b").is_err());
    }

    #[test]
    fn env_format_beats_user_output() {
        assert_eq!(
            resolve_output(false, Some("pretty".to_string()), Some("json".to_string())),
            "json"
        );
        assert_eq!(
            resolve_output(false, Some("human".to_string()), Some("bogus".to_string())),
            "pretty"
        );
    }
}
