//! Push-to-talk capture lifecycle.
//!
//! A press/release can be shorter than the permission → audio mode →
//! allocate sequence needed to start recording.
//! [`CaptureLifecycleController`] turns any such press into at most one
//! [`CaptureArtifact`] and never leaks a recording resource.
//!
//! The platform side sits behind two traits:
//!
//! * [`CaptureDevice`]: permission, audio mode, resource allocation.
//! * [`RecordingResource`]: one live recording; finished or discarded
//!   exactly once.
//!
//! [`crate::audio::CpalDevice`] is the desktop implementation.

pub mod controller;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use controller::{CaptureLifecycleController, CapturePhase};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("failed to encode recording: {0}")]
    Encode(String),

    #[error("recording I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// CaptureArtifact
// ---------------------------------------------------------------------------

/// The audio file produced by one start/stop cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureArtifact {
    pub path: PathBuf,
    pub duration: Duration,
    pub sample_rate: u32,
}

// ---------------------------------------------------------------------------
// Device traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Platform capture backend.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn request_permission(&self) -> Result<Permission, CaptureError>;

    /// Switch the platform audio session into (`true`) or out of (`false`)
    /// recording mode.
    async fn configure_audio_mode(&self, recording: bool) -> Result<(), CaptureError>;

    /// Open a live recording.
    async fn allocate(&self) -> Result<Box<dyn RecordingResource>, CaptureError>;
}

/// One live recording.  Consumed by whichever of `finish`/`discard` runs.
#[async_trait]
pub trait RecordingResource: Send {
    async fn finish(self: Box<Self>) -> Result<CaptureArtifact, CaptureError>;

    async fn discard(self: Box<Self>);
}
