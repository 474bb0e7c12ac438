//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through `settings.toml`.  Every section is
//! `#[serde(default)]`, so a file that only sets `server.base_url` is valid.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::workflow::WorkflowKind;

/// Environment variable that overrides `server.api_token`.
pub const TOKEN_ENV_VAR: &str = "VOICE_WORKFLOW_TOKEN";

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Connection to the workflow service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL without the workflow prefix, e.g. `https://workflow.example.com`.
    pub base_url: String,
    /// Bearer token.  `None` sends no `Authorization` header.
    pub api_token: Option<String>,
    /// Maximum seconds to wait for one request.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// The token to send: `VOICE_WORKFLOW_TOKEN` when set and non-empty,
    /// otherwise `api_token`.
    pub fn api_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.api_token.clone())
    }
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Workflow started when none is given on the command line.
    pub kind: WorkflowKind,
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample rate of uploaded recordings in Hz.
    pub sample_rate: u32,
    /// Recordings shorter than this are not uploaded.
    pub min_recording_secs: f32,
    /// Capture stops accumulating audio after this many seconds.
    pub max_recording_secs: f32,
    /// Refresh period of the recording timer.
    pub tick_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            min_recording_secs: 0.5,
            max_recording_secs: 60.0,
            tick_interval_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Push-to-talk key name (e.g. `"F9"`).
    pub push_to_talk_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            push_to_talk_key: "F9".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_workflow::config::AppConfig;
///
/// // Returns Default when the file is missing.
/// let config = AppConfig::load().unwrap();
/// println!("{}", config.server.base_url);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub workflow: WorkflowConfig,
    pub capture: CaptureConfig,
    pub hotkey: HotkeyConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");

        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.workflow.kind, WorkflowKind::Contact);
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(config.hotkey.push_to_talk_key, "F9");
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut cfg = AppConfig::default();
        cfg.server.base_url = "https://workflow.example.com".into();
        cfg.server.api_token = Some("tok-123".into());
        cfg.server.timeout_secs = 90;
        cfg.workflow.kind = WorkflowKind::Invoice;
        cfg.capture.min_recording_secs = 1.0;
        cfg.hotkey.push_to_talk_key = "F10".into();

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.server.base_url, "https://workflow.example.com");
        assert_eq!(loaded.server.api_token.as_deref(), Some("tok-123"));
        assert_eq!(loaded.server.timeout_secs, 90);
        assert_eq!(loaded.workflow.kind, WorkflowKind::Invoice);
        assert_eq!(loaded.capture.min_recording_secs, 1.0);
        assert_eq!(loaded.hotkey.push_to_talk_key, "F10");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[workflow]\nkind = \"invoice\"\n").unwrap();

        let config = AppConfig::load_from(&path).expect("load");

        assert_eq!(config.workflow.kind, WorkflowKind::Invoice);
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.capture.max_recording_secs, 60.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nbase_url = ").unwrap();

        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn configured_token_is_used_without_override() {
        let cfg = ServerConfig {
            api_token: Some("from-file".into()),
            ..Default::default()
        };
        if std::env::var(TOKEN_ENV_VAR).is_err() {
            assert_eq!(cfg.api_token().as_deref(), Some("from-file"));
        }
    }
}
