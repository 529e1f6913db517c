//! World configuration file – reads/writes `~/.blockworld/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use blockworld_world::WorldConfig;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the path to `~/.blockworld/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".blockworld").join("config.toml")
}

/// Resolve the effective configuration: `explicit` if given, else the
/// default path; a missing file means defaults.  Environment overrides are
/// applied last.
pub fn load(explicit: Option<&Path>) -> Result<WorldConfig, ConfigError> {
    let path = explicit.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = match load_from(&path)? {
        Some(cfg) => {
            debug!(path = %path.display(), "config loaded");
            cfg
        }
        None => {
            debug!(path = %path.display(), "no config file, using defaults");
            WorldConfig::default()
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<WorldConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(cfg))
}

/// Apply `BLOCKWORLD_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BLOCKWORLD_UNOBSERVED_THRESHOLD` | `unobserved_dirty_threshold` |
/// | `BLOCKWORLD_MATCH_TOLERANCE_MM` | `same_distance_tolerance_mm` |
/// | `BLOCKWORLD_COLLISION_PADDING_MM` | `robot.collision_padding_mm` |
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut WorldConfig) {
    if let Some(v) = env_parsed::<u32>("BLOCKWORLD_UNOBSERVED_THRESHOLD") {
        cfg.unobserved_dirty_threshold = v;
    }
    if let Some(v) = env_parsed::<f32>("BLOCKWORLD_MATCH_TOLERANCE_MM") {
        cfg.same_distance_tolerance_mm = v;
    }
    if let Some(v) = env_parsed::<f32>("BLOCKWORLD_COLLISION_PADDING_MM") {
        cfg.robot.collision_padding_mm = v;
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &WorldConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockworld_types::ObjectType;

    #[test]
    fn config_path_points_to_blockworld_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".blockworld"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&WorldConfig::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.unobserved_dirty_threshold, 2);
        assert!((loaded.same_distance_tolerance_mm - 30.0).abs() < 1e-5);
        assert_eq!(loaded.objects.len(), WorldConfig::default().objects.len());
        assert!(loaded.library().is_unique(ObjectType::Charger));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            "unobserved_dirty_threshold = 5\n\n[robot]\nlength_mm = 100.0\n",
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.unobserved_dirty_threshold, 5);
        assert!((cfg.robot.length_mm - 100.0).abs() < 1e-5);
        assert!((cfg.robot.width_mm - 54.0).abs() < 1e-5);
        assert!((cfg.pre_action.docking_mm - 100.0).abs() < 1e-5);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        fs::write(&path, "unobserved_dirty_threshold = \"lots\"").expect("write");
        assert!(matches!(load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn apply_env_overrides_changes_threshold_and_ignores_garbage() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("BLOCKWORLD_UNOBSERVED_THRESHOLD", "4");
            std::env::set_var("BLOCKWORLD_MATCH_TOLERANCE_MM", "not-a-number");
        }
        let mut cfg = WorldConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.unobserved_dirty_threshold, 4);
        assert!((cfg.same_distance_tolerance_mm - 30.0).abs() < 1e-5);
        unsafe {
            std::env::remove_var("BLOCKWORLD_UNOBSERVED_THRESHOLD");
            std::env::remove_var("BLOCKWORLD_MATCH_TOLERANCE_MM");
        }
    }

    #[test]
    fn apply_env_overrides_changes_collision_padding() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("BLOCKWORLD_COLLISION_PADDING_MM", "12.5") };
        let mut cfg = WorldConfig::default();
        apply_env_overrides(&mut cfg);
        assert!((cfg.robot.collision_padding_mm - 12.5).abs() < 1e-5);
        unsafe { std::env::remove_var("BLOCKWORLD_COLLISION_PADDING_MM") };
    }
}
