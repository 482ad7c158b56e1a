use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bws_client::ClientSettings;
use bws_session::SessionSettings;
use serde::Deserialize;

/// CLI configuration: optional TOML file, then `BWS_*` environment
/// variables, then command line flags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the BWS extension API.
    pub endpoint: String,
    pub app_id: String,
    pub app_secret: String,
    /// Biometric class id tokens are requested for.
    pub bcid: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub face_detection_timeout_secs: u64,
    pub motion_detection_timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub max_failed_uploads: u32,
    /// Delay between replayed frames.
    pub frame_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let client = ClientSettings::default();
        let session = SessionSettings::default();
        Self {
            endpoint: client.endpoint,
            app_id: client.app_id,
            app_secret: client.app_secret,
            bcid: client.bcid,
            connect_timeout_secs: client.connect_timeout.as_secs(),
            read_timeout_secs: client.read_timeout.as_secs(),
            upload_timeout_secs: client.upload_timeout.as_secs(),
            face_detection_timeout_secs: session.face_detection_timeout.as_secs(),
            motion_detection_timeout_secs: session.motion_detection_timeout.as_secs(),
            retry_delay_secs: session.retry_delay.as_secs(),
            max_failed_uploads: session.max_failed_uploads,
            frame_interval_ms: 200,
        }
    }
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub bcid: Option<String>,
    pub frame_interval_ms: Option<u64>,
}

impl Config {
    /// Load the file (if any), apply the process environment, then `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Apply `BWS_*` variables as reported by `var`. Unparseable numbers are
    /// ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("BWS_ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = var("BWS_APP_ID") {
            self.app_id = v;
        }
        if let Some(v) = var("BWS_APP_SECRET") {
            self.app_secret = v;
        }
        if let Some(v) = var("BWS_BCID") {
            self.bcid = v;
        }
        self.connect_timeout_secs =
            env_u64(&var, "BWS_CONNECT_TIMEOUT_SECS", self.connect_timeout_secs);
        self.read_timeout_secs = env_u64(&var, "BWS_READ_TIMEOUT_SECS", self.read_timeout_secs);
        self.upload_timeout_secs =
            env_u64(&var, "BWS_UPLOAD_TIMEOUT_SECS", self.upload_timeout_secs);
        self.face_detection_timeout_secs = env_u64(
            &var,
            "BWS_FACE_DETECTION_TIMEOUT_SECS",
            self.face_detection_timeout_secs,
        );
        self.motion_detection_timeout_secs = env_u64(
            &var,
            "BWS_MOTION_DETECTION_TIMEOUT_SECS",
            self.motion_detection_timeout_secs,
        );
        self.retry_delay_secs = env_u64(&var, "BWS_RETRY_DELAY_SECS", self.retry_delay_secs);
        self.max_failed_uploads = env_u32(&var, "BWS_MAX_FAILED_UPLOADS", self.max_failed_uploads);
        self.frame_interval_ms = env_u64(&var, "BWS_FRAME_INTERVAL_MS", self.frame_interval_ms);
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(v) = &overrides.endpoint {
            self.endpoint = v.clone();
        }
        if let Some(v) = &overrides.app_id {
            self.app_id = v.clone();
        }
        if let Some(v) = &overrides.app_secret {
            self.app_secret = v.clone();
        }
        if let Some(v) = &overrides.bcid {
            self.bcid = v.clone();
        }
        if let Some(v) = overrides.frame_interval_ms {
            self.frame_interval_ms = v;
        }
    }

    /// Client settings; fails when credentials or the bcid are missing.
    pub fn client_settings(&self) -> Result<ClientSettings> {
        let missing: Vec<&str> = [
            ("app_id", &self.app_id),
            ("app_secret", &self.app_secret),
            ("bcid", &self.bcid),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            bail!(
                "missing configuration: {} (set them in the config file, BWS_* variables or flags)",
                missing.join(", ")
            );
        }

        Ok(ClientSettings {
            endpoint: self.endpoint.clone(),
            app_id: self.app_id.clone(),
            app_secret: self.app_secret.clone(),
            bcid: self.bcid.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            upload_timeout: Duration::from_secs(self.upload_timeout_secs),
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            face_detection_timeout: Duration::from_secs(self.face_detection_timeout_secs),
            motion_detection_timeout: Duration::from_secs(self.motion_detection_timeout_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            max_failed_uploads: self.max_failed_uploads,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn env_u64(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(var: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
