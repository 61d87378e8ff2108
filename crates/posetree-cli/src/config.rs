//! Simulator configuration – reads `~/.posetree/config.toml`.

use posetree_core::DEFAULT_MAX_RECURSION_DEPTH;
use posetree_types::PoseTreeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings of one simulated tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of camera frames to track.
    #[serde(default = "default_frames")]
    pub frames: u64,

    /// Every n-th frame becomes a keyframe and is admitted to the
    /// optimizer's graph.
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u64,

    /// Frames between two optimizer passes.
    #[serde(default = "default_optimize_every")]
    pub optimize_every: u64,

    /// Translation error (metres) the tracker adds to every relative pose.
    #[serde(default = "default_drift_per_frame")]
    pub drift_per_frame: f64,

    /// Radius (metres) of the circular ground-truth trajectory.
    #[serde(default = "default_trajectory_radius")]
    pub trajectory_radius: f64,

    /// Heading change per frame along the trajectory (radians).
    #[serde(default = "default_angular_step_rad")]
    pub angular_step_rad: f64,

    /// Parent-chain depth at which pose resolution aborts.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,

    /// Pause between frames (milliseconds); 0 runs flat out.
    #[serde(default)]
    pub frame_interval_ms: u64,
}

fn default_frames() -> u64 {
    600
}
fn default_keyframe_interval() -> u64 {
    10
}
fn default_optimize_every() -> u64 {
    100
}
fn default_drift_per_frame() -> f64 {
    0.002
}
fn default_trajectory_radius() -> f64 {
    5.0
}
fn default_angular_step_rad() -> f64 {
    0.01
}
fn default_max_recursion_depth() -> usize {
    DEFAULT_MAX_RECURSION_DEPTH
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frames: default_frames(),
            keyframe_interval: default_keyframe_interval(),
            optimize_every: default_optimize_every(),
            drift_per_frame: default_drift_per_frame(),
            trajectory_radius: default_trajectory_radius(),
            angular_step_rad: default_angular_step_rad(),
            max_recursion_depth: default_max_recursion_depth(),
            frame_interval_ms: 0,
        }
    }
}

impl Config {
    /// Reject settings the simulator cannot run with.
    pub fn validate(&self) -> Result<(), PoseTreeError> {
        if self.keyframe_interval == 0 {
            return Err(PoseTreeError::Config("keyframe_interval must be at least 1".into()));
        }
        if self.optimize_every == 0 {
            return Err(PoseTreeError::Config("optimize_every must be at least 1".into()));
        }
        if self.max_recursion_depth == 0 {
            return Err(PoseTreeError::Config("max_recursion_depth must be at least 1".into()));
        }
        if !self.drift_per_frame.is_finite() || self.drift_per_frame < 0.0 {
            return Err(PoseTreeError::Config(format!(
                "drift_per_frame must be a non-negative number, got {}",
                self.drift_per_frame
            )));
        }
        Ok(())
    }
}

/// Return the config path: `$POSETREE_CONFIG` when set, else
/// `~/.posetree/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("POSETREE_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".posetree").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, PoseTreeError> {
    load_from(&config_path())
}

/// Load and validate the config at `path`, applying environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PoseTreeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        PoseTreeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| PoseTreeError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `POSETREE_*` environment variable overrides to `cfg`.
///
/// Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `POSETREE_FRAMES` | `frames` |
/// | `POSETREE_KEYFRAME_INTERVAL` | `keyframe_interval` |
/// | `POSETREE_OPTIMIZE_EVERY` | `optimize_every` |
/// | `POSETREE_DRIFT` | `drift_per_frame` |
/// | `POSETREE_MAX_DEPTH` | `max_recursion_depth` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_parse("POSETREE_FRAMES") {
        cfg.frames = v;
    }
    if let Some(v) = env_parse("POSETREE_KEYFRAME_INTERVAL") {
        cfg.keyframe_interval = v;
    }
    if let Some(v) = env_parse("POSETREE_OPTIMIZE_EVERY") {
        cfg.optimize_every = v;
    }
    if let Some(v) = env_parse("POSETREE_DRIFT") {
        cfg.drift_per_frame = v;
    }
    if let Some(v) = env_parse("POSETREE_MAX_DEPTH") {
        cfg.max_recursion_depth = v;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Write `cfg` to `path`, creating parent directories.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), PoseTreeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PoseTreeError::Config(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PoseTreeError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        PoseTreeError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Serialises tests that set `POSETREE_*` variables or read them
    /// through [`load_from`].
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn roundtrip_default_config() {
        let _env = env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.frames, 600);
        assert_eq!(loaded.max_recursion_depth, 5000);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let _env = env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "frames = 42\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.frames, 42);
        assert!((loaded.trajectory_radius - 5.0).abs() < 1e-12);
        assert_eq!(loaded.frame_interval_ms, 0);
    }

    #[test]
    fn config_path_points_to_posetree_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".posetree"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let _env = env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "frames = \"many\"\n").unwrap();
        assert!(matches!(load_from(&path), Err(PoseTreeError::Config(_))));
    }

    #[test]
    fn zero_keyframe_interval_is_rejected() {
        let cfg = Config {
            keyframe_interval: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(PoseTreeError::Config(_))));
    }

    #[test]
    fn negative_drift_is_rejected() {
        let cfg = Config {
            drift_per_frame: -0.1,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn apply_env_overrides_changes_fields() {
        let _env = env_lock();
        // SAFETY: env access in this test binary is serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("POSETREE_KEYFRAME_INTERVAL", "7");
            std::env::set_var("POSETREE_DRIFT", "0.05");
            std::env::set_var("POSETREE_OPTIMIZE_EVERY", "soon");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.keyframe_interval, 7);
        assert!((cfg.drift_per_frame - 0.05).abs() < 1e-12);
        assert_eq!(cfg.optimize_every, 100);
        unsafe {
            std::env::remove_var("POSETREE_KEYFRAME_INTERVAL");
            std::env::remove_var("POSETREE_DRIFT");
            std::env::remove_var("POSETREE_OPTIMIZE_EVERY");
        }
    }
}
