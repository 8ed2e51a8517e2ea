//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, per-class concurrency, rate-limit presets, the
//! video queue, maintenance, and external tools. Every section defaults
//! sensibly so a completely empty `{}` file is valid. `FILEFORGE_*`
//! environment variables override the file after it is loaded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::media::ResourceClass;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub concurrency: ConcurrencyConfig,
    pub rate_limits: RateLimitsConfig,
    pub queue: QueueConfig,
    pub maintenance: MaintenanceConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist. Environment overrides are
    /// applied in every case.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let mut config = Self::load_file(path);
        config.apply_env_overrides();
        config
    }

    fn load_file(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply `FILEFORGE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("FILEFORGE_HOST") {
            self.server.host = host;
        }
        override_parsed(&lookup, "FILEFORGE_PORT", &mut self.server.port);
        override_parsed(
            &lookup,
            "FILEFORGE_QUEUE_MAX_SIZE",
            &mut self.queue.max_queue_size,
        );
        override_parsed(
            &lookup,
            "FILEFORGE_JOB_TIMEOUT_SECS",
            &mut self.queue.job_timeout_secs,
        );
        override_parsed(
            &lookup,
            "FILEFORGE_VIDEO_CONCURRENCY",
            &mut self.concurrency.video,
        );
        override_parsed(
            &lookup,
            "FILEFORGE_CLEANUP_INTERVAL_SECS",
            &mut self.maintenance.cleanup_interval_secs,
        );
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        for class in ResourceClass::ALL {
            if self.concurrency.limit_for(class) == 0 {
                warnings.push(format!(
                    "concurrency.{class} is 0; every {class} request will be rejected"
                ));
            }
        }

        for (name, preset) in [
            ("conversion", &self.rate_limits.conversion),
            ("burst", &self.rate_limits.burst),
            ("api", &self.rate_limits.api),
        ] {
            if preset.interval_secs == 0 {
                warnings.push(format!("rate_limits.{name}.interval_secs is 0"));
            }
            if preset.max_requests == 0 {
                warnings.push(format!(
                    "rate_limits.{name}.max_requests is 0; all requests will be denied"
                ));
            }
        }

        if self.queue.max_queue_size == 0 {
            warnings.push("queue.max_queue_size is 0; video jobs cannot be queued".into());
        }

        if self.queue.job_timeout_secs < self.queue.average_job_duration_secs {
            warnings.push(format!(
                "queue.job_timeout_secs ({}) is shorter than average_job_duration_secs ({})",
                self.queue.job_timeout_secs, self.queue.average_job_duration_secs
            ));
        }

        if self.maintenance.cleanup_interval_secs == 0 {
            warnings.push("maintenance.cleanup_interval_secs is 0; using 1s".into());
        }

        warnings
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!("Ignoring unparseable {key}={raw:?}"),
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Per-resource-class concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub pdf: usize,
    pub image: usize,
    /// Processing slots of the video queue.
    pub video: usize,
    pub audio: usize,
    pub archive: usize,
    pub text: usize,
}

impl ConcurrencyConfig {
    pub fn limit_for(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Pdf => self.pdf,
            ResourceClass::Image => self.image,
            ResourceClass::Video => self.video,
            ResourceClass::Audio => self.audio,
            ResourceClass::Archive => self.archive,
            ResourceClass::Text => self.text,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            pdf: 2,
            image: 3,
            video: 1,
            audio: 2,
            archive: 2,
            text: 5,
        }
    }
}

/// A fixed-window rate-limit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPreset {
    /// Window length in seconds.
    pub interval_secs: u64,
    /// Requests allowed per window.
    pub max_requests: u32,
}

impl RateLimitPreset {
    pub const fn new(interval_secs: u64, max_requests: u32) -> Self {
        Self {
            interval_secs,
            max_requests,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// The recognized rate-limit presets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Conversion endpoints: narrow window, low cap.
    pub conversion: RateLimitPreset,
    /// Burst protection: very short window, very low cap.
    pub burst: RateLimitPreset,
    /// General API: wide window, high cap.
    pub api: RateLimitPreset,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            conversion: RateLimitPreset::new(60, 10),
            burst: RateLimitPreset::new(10, 3),
            api: RateLimitPreset::new(60, 100),
        }
    }
}

/// Video job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Jobs held at once (any non-purged status).
    pub max_queue_size: usize,
    /// Fixed per-job estimate used for wait-time hints.
    pub average_job_duration_secs: u64,
    /// A processing job older than this is reaped.
    pub job_timeout_secs: u64,
    /// Terminal jobs are purged this long after completion.
    pub retention_secs: u64,
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            average_job_duration_secs: 30,
            job_timeout_secs: 600,
            retention_secs: 300,
        }
    }
}

/// Background sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub cleanup_interval_secs: u64,
}

impl MaintenanceConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 60,
        }
    }
}

/// Paths to external converter binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub magick_path: Option<PathBuf>,
    pub libreoffice_path: Option<PathBuf>,
    pub sevenzip_path: Option<PathBuf>,
    pub pandoc_path: Option<PathBuf>,
    /// Maximum run time of a single converter invocation.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            magick_path: None,
            libreoffice_path: None,
            sevenzip_path: None,
            pandoc_path: None,
            timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_json_is_default() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.concurrency.video, 1);
        assert_eq!(config.queue.max_queue_size, 50);
        assert_eq!(config.rate_limits.conversion, RateLimitPreset::new(60, 10));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config =
            Config::from_json(r#"{"queue": {"max_queue_size": 5}, "concurrency": {"image": 7}}"#)
                .unwrap();
        assert_eq!(config.queue.max_queue_size, 5);
        assert_eq!(config.queue.job_timeout_secs, 600);
        assert_eq!(config.concurrency.limit_for(ResourceClass::Image), 7);
        assert_eq!(config.concurrency.limit_for(ResourceClass::Pdf), 2);
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load_file(Some(Path::new("/nonexistent/fileforge.json")));
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("FILEFORGE_PORT", "9090"),
            ("FILEFORGE_VIDEO_CONCURRENCY", "2"),
            ("FILEFORGE_JOB_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.concurrency.video, 2);
        assert_eq!(config.queue.job_timeout_secs, 600);
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn zero_limits_warn() {
        let mut config = Config::default();
        config.concurrency.audio = 0;
        config.rate_limits.burst.max_requests = 0;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("concurrency.audio")));
        assert!(warnings.iter().any(|w| w.contains("rate_limits.burst")));
    }
}
