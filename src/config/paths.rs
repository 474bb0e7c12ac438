//! Cross-platform application paths using the `dirs` crate.
//!
//! Config dir (`settings.toml`):
//!   Windows: %APPDATA%\voice-workflow\
//!   macOS:   ~/Library/Application Support/voice-workflow/
//!   Linux:   ~/.config/voice-workflow/
//!
//! Cache dir (recordings awaiting upload):
//!   Windows: %LOCALAPPDATA%\voice-workflow\recordings\
//!   macOS:   ~/Library/Caches/voice-workflow/recordings/
//!   Linux:   ~/.cache/voice-workflow/recordings/

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Where finished recordings are written before upload.
    pub recordings_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-workflow";

    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let recordings_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::APP_NAME)
            .join("recordings");

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            recordings_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
