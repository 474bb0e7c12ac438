//! Desktop audio capture: microphone → mono at the upload rate → WAV file.
//!
//! ```text
//! cpal callback (stream thread) → interleaved f32 buffer
//!   → downmix → resample → write_wav → CaptureArtifact
//! ```
//!
//! [`CpalDevice`] plugs into [`crate::capture::CaptureLifecycleController`].

pub mod capture;
pub mod resample;
pub mod wav;

pub use capture::CpalDevice;
pub use resample::{downmix, duration_secs, resample};
pub use wav::write_wav;
