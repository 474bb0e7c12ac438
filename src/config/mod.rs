//! Configuration: `AppConfig` (top-level settings), one section per
//! subsystem, `AppPaths` for platform directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, CaptureConfig, HotkeyConfig, ServerConfig, WorkflowConfig, TOKEN_ENV_VAR,
};
