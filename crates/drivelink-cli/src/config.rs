//! Startup configuration – `drivelink.toml` plus `DRIVELINK_*` overrides.
//!
//! The file is optional; every field has a default. Values are validated
//! once, before anything is bound or loaded, and any violation is fatal.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use drivelink_control::{SpeedLimit, ThrottlePolicy};
use drivelink_middleware::{ChannelConfig, OverflowPolicy};
use drivelink_runtime::PredictorAccess;
use drivelink_types::DriveError;
use serde::Deserialize;
use tracing::warn;

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Speed at which the throttle reaches zero.
    #[serde(default = "default_speed_limit")]
    pub speed_limit: f64,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Steering model artifact.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default)]
    pub predictor_access: PredictorAccess,

    /// Per-session inbound FIFO capacity.
    #[serde(default = "default_queue_depth")]
    pub session_queue_depth: usize,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Drop telemetry that finds the session queue full instead of pausing
    /// socket reads until the worker catches up.
    #[serde(default)]
    pub drop_stale_frames: bool,
}

fn default_speed_limit() -> f64 {
    10.0
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4567
}
fn default_model_path() -> PathBuf {
    PathBuf::from("model.json")
}
fn default_queue_depth() -> usize {
    8
}
fn default_ping_interval_ms() -> u64 {
    25_000
}
fn default_ping_timeout_ms() -> u64 {
    20_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speed_limit: default_speed_limit(),
            bind_address: default_bind_address(),
            port: default_port(),
            model_path: default_model_path(),
            predictor_access: PredictorAccess::default(),
            session_queue_depth: default_queue_depth(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            drop_stale_frames: false,
        }
    }
}

impl Config {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), DriveError> {
        SpeedLimit::new(self.speed_limit)?;
        self.socket_addr()?;
        if self.session_queue_depth == 0 {
            return Err(DriveError::Config("session_queue_depth must be at least 1".to_string()));
        }
        if self.ping_interval_ms == 0 {
            return Err(DriveError::Config("ping_interval_ms must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, DriveError> {
        let ip: IpAddr = self
            .bind_address
            .trim()
            .parse()
            .map_err(|e| DriveError::Config(format!("bind_address {:?}: {e}", self.bind_address)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn throttle_policy(&self) -> Result<ThrottlePolicy, DriveError> {
        Ok(ThrottlePolicy::new(SpeedLimit::new(self.speed_limit)?))
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            queue_depth: self.session_queue_depth,
            overflow: if self.drop_stale_frames {
                OverflowPolicy::DropNewest
            } else {
                OverflowPolicy::Backpressure
            },
        }
    }
}

/// `DRIVELINK_CONFIG`, or `drivelink.toml` in the working directory.
pub fn config_path() -> PathBuf {
    std::env::var_os("DRIVELINK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("drivelink.toml"))
}

/// Load, override from the environment, and validate.
pub fn load() -> Result<Config, DriveError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Config, DriveError> {
    let mut cfg = read_file(path)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse `path`. A missing file yields the defaults.
pub(crate) fn read_file(path: &Path) -> Result<Config, DriveError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| DriveError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw).map_err(|e| DriveError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `DRIVELINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DRIVELINK_SPEED_LIMIT` | `speed_limit` |
/// | `DRIVELINK_BIND` | `bind_address` |
/// | `DRIVELINK_PORT` | `port` |
/// | `DRIVELINK_MODEL` | `model_path` |
/// | `DRIVELINK_PREDICTOR_ACCESS` | `predictor_access` |
///
/// Unparseable numeric or enum values are logged and ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("DRIVELINK_SPEED_LIMIT") {
        match v.trim().parse::<f64>() {
            Ok(limit) => cfg.speed_limit = limit,
            Err(e) => warn!(value = %v, error = %e, "ignoring DRIVELINK_SPEED_LIMIT"),
        }
    }
    if let Some(v) = lookup("DRIVELINK_BIND") {
        cfg.bind_address = v;
    }
    if let Some(v) = lookup("DRIVELINK_PORT") {
        match v.trim().parse::<u16>() {
            Ok(port) => cfg.port = port,
            Err(e) => warn!(value = %v, error = %e, "ignoring DRIVELINK_PORT"),
        }
    }
    if let Some(v) = lookup("DRIVELINK_MODEL") {
        cfg.model_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("DRIVELINK_PREDICTOR_ACCESS") {
        match v.parse::<PredictorAccess>() {
            Ok(access) => cfg.predictor_access = access,
            Err(e) => warn!(value = %v, error = %e, "ignoring DRIVELINK_PREDICTOR_ACCESS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overflow_policy_defaults_to_backpressure() {
        assert_eq!(Config::default().channel_config().overflow, OverflowPolicy::Backpressure);

        let file = write_toml("drop_stale_frames = true\n");
        let cfg = read_file(file.path()).unwrap();
        assert_eq!(cfg.channel_config().overflow, OverflowPolicy::DropNewest);
    }

    fn write_toml(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        file.write_all(body.as_bytes()).expect("write");
        file
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.speed_limit, 10.0);
        assert_eq!(cfg.socket_addr().unwrap(), "0.0.0.0:4567".parse().unwrap());
        assert_eq!(cfg.predictor_access, PredictorAccess::Shared);
        assert_eq!(cfg.channel_config().queue_depth, 8);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = read_file(&dir.path().join("drivelink.toml")).expect("no error");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_toml("speed_limit = 25.0\npredictor_access = \"serialized\"\n");
        let cfg = read_file(file.path()).expect("parse");
        assert_eq!(cfg.speed_limit, 25.0);
        assert_eq!(cfg.predictor_access, PredictorAccess::Serialized);
        assert_eq!(cfg.port, 4567);
        assert_eq!(cfg.model_path, PathBuf::from("model.json"));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let file = write_toml("speed_limit = \"fast\"\n");
        assert!(matches!(read_file(file.path()), Err(DriveError::Config(_))));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let cases = [
            Config { speed_limit: 0.0, ..Config::default() },
            Config { speed_limit: -3.0, ..Config::default() },
            Config { speed_limit: f64::NAN, ..Config::default() },
            Config { session_queue_depth: 0, ..Config::default() },
            Config { ping_interval_ms: 0, ..Config::default() },
            Config { bind_address: "not-an-ip".to_string(), ..Config::default() },
        ];
        for cfg in cases {
            let err = cfg.validate().unwrap_err();
            assert!(matches!(err, DriveError::Config(_)), "{cfg:?}");
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            overrides(&[
                ("DRIVELINK_SPEED_LIMIT", "15"),
                ("DRIVELINK_BIND", "127.0.0.1"),
                ("DRIVELINK_PORT", "9000"),
                ("DRIVELINK_MODEL", "/models/track1.json"),
                ("DRIVELINK_PREDICTOR_ACCESS", "serialized"),
            ]),
        );
        assert_eq!(cfg.speed_limit, 15.0);
        assert_eq!(cfg.socket_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.model_path, PathBuf::from("/models/track1.json"));
        assert_eq!(cfg.predictor_access, PredictorAccess::Serialized);
    }

    #[test]
    fn unparseable_env_values_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            overrides(&[
                ("DRIVELINK_SPEED_LIMIT", "fast"),
                ("DRIVELINK_PORT", "not-a-port"),
                ("DRIVELINK_PREDICTOR_ACCESS", "exclusive"),
            ]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn env_speed_limit_is_still_validated() {
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, overrides(&[("DRIVELINK_SPEED_LIMIT", "0")]));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ipv6_bind_address() {
        let cfg = Config {
            bind_address: "::1".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.socket_addr().unwrap(), "[::1]:4567".parse().unwrap());
    }
}
