//! Capture lifecycle state machine.
//!
//! ```text
//! Idle ──start──▶ Acquiring ──(permission, audio mode, allocate)──▶ Recording
//!                   │                                                  │
//!                   └─ stop: stop_requested = true                    stop
//!                      (start's continuation cleans up → Idle)         ▼
//!                                                                   Stopping ──▶ Idle
//! ```
//!
//! Each `start` takes a generation number, and moves to `Acquiring`,
//! before its first await.  After every await the
//! continuation checks `stop_requested` and whether its generation is still
//! current; if either trips it releases what it holds, restores the audio
//! mode and settles in `Idle` without ever entering `Recording`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::{CaptureArtifact, CaptureDevice, CaptureError, Permission, RecordingResource};

// ---------------------------------------------------------------------------
// CapturePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Stopping,
}

impl CapturePhase {
    pub fn label(&self) -> &'static str {
        match self {
            CapturePhase::Idle => "Idle",
            CapturePhase::Acquiring => "Starting",
            CapturePhase::Recording => "Recording",
            CapturePhase::Stopping => "Stopping",
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureSession {
    phase: CapturePhase,
    generation: u64,
    stop_requested: bool,
    resource: Option<Box<dyn RecordingResource>>,
    started_at: Option<Instant>,
    elapsed: Duration,

    has_captured: bool,
    last_artifact: Option<CaptureArtifact>,
    error: Option<String>,
}

impl CaptureSession {
    /// `true` when the start attempt `generation` must give up.
    fn abandoned(&self, generation: u64) -> bool {
        self.stop_requested || self.generation != generation
    }

    /// Return to `Idle` on behalf of `generation`, unless a newer attempt
    /// owns the session by now.
    fn settle_idle(&mut self, generation: u64, error: Option<String>) {
        if self.generation != generation {
            return;
        }
        self.phase = CapturePhase::Idle;
        self.stop_requested = false;
        self.started_at = None;
        if error.is_some() {
            self.error = error;
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureLifecycleController
// ---------------------------------------------------------------------------

/// Turns push-to-talk presses into audio artifacts.
///
/// Cheap to clone; clones share the same session, so `start` and `stop` can
/// run from different tasks.
#[derive(Clone)]
pub struct CaptureLifecycleController {
    device: Arc<dyn CaptureDevice>,
    session: Arc<Mutex<CaptureSession>>,
    tick_interval: Duration,
}

impl CaptureLifecycleController {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            session: Arc::new(Mutex::new(CaptureSession::default())),
            tick_interval: Duration::from_millis(100),
        }
    }

    /// How often the recording duration is refreshed.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    // -----------------------------------------------------------------------
    // start / stop / reset
    // -----------------------------------------------------------------------

    /// Begin recording.  A no-op while a capture is already under way.
    pub async fn start(&self) {
        if let Some(generation) = self.claim() {
            self.acquire(generation).await;
        }
    }

    /// Like [`start`](Self::start), but only the acquisition runs on a
    /// spawned task.  The session is `Acquiring` by the time this returns,
    /// so a `stop` issued right after is never lost.  `None` when a capture
    /// is already under way.
    pub fn spawn_start(&self) -> Option<JoinHandle<()>> {
        let generation = self.claim()?;
        let this = self.clone();
        Some(tokio::spawn(async move { this.acquire(generation).await }))
    }

    /// Take a new generation and enter `Acquiring`, unless not `Idle`.
    fn claim(&self) -> Option<u64> {
        let mut s = self.lock();
        if s.phase != CapturePhase::Idle {
            log::debug!("capture: start ignored while {:?}", s.phase);
            return None;
        }
        s.generation += 1;
        s.phase = CapturePhase::Acquiring;
        s.stop_requested = false;
        s.elapsed = Duration::ZERO;
        s.error = None;
        log::debug!("capture: attempt {} acquiring", s.generation);
        Some(s.generation)
    }

    async fn acquire(&self, generation: u64) {
        // 1. Permission.
        match self.device.request_permission().await {
            Ok(Permission::Granted) => {}
            Ok(Permission::Denied) | Err(CaptureError::PermissionDenied) => {
                log::warn!("capture: microphone permission denied");
                self.lock()
                    .settle_idle(generation, Some(CaptureError::PermissionDenied.to_string()));
                return;
            }
            Err(e) => {
                log::error!("capture: permission request failed: {e}");
                self.lock().settle_idle(generation, Some(e.to_string()));
                return;
            }
        }
        if self.lock().abandoned(generation) {
            log::debug!("capture: attempt {generation} abandoned after permission");
            self.lock().settle_idle(generation, None);
            return;
        }

        // 2. Audio mode.
        if let Err(e) = self.device.configure_audio_mode(true).await {
            log::error!("capture: could not enter recording mode: {e}");
            self.restore_audio_mode().await;
            self.lock().settle_idle(generation, Some(e.to_string()));
            return;
        }
        if self.lock().abandoned(generation) {
            log::debug!("capture: attempt {generation} abandoned after audio mode");
            self.restore_audio_mode().await;
            self.lock().settle_idle(generation, None);
            return;
        }

        // 3. Allocate.
        let resource = match self.device.allocate().await {
            Ok(resource) => resource,
            Err(e) => {
                log::error!("capture: could not open recording: {e}");
                self.restore_audio_mode().await;
                self.lock().settle_idle(generation, Some(e.to_string()));
                return;
            }
        };

        let leftover = {
            let mut s = self.lock();
            if s.abandoned(generation) {
                Some(resource)
            } else {
                s.resource = Some(resource);
                s.phase = CapturePhase::Recording;
                s.started_at = Some(Instant::now());
                None
            }
        };

        if let Some(resource) = leftover {
            log::debug!("capture: attempt {generation} abandoned after allocate");
            resource.discard().await;
            self.restore_audio_mode().await;
            self.lock().settle_idle(generation, None);
            return;
        }

        log::info!("capture: recording");
        self.spawn_tick(generation);
    }

    /// Stop recording and return the artifact.
    ///
    /// While still acquiring this only flags the stop and returns `None`;
    /// the pending `start` cleans up.
    pub async fn stop(&self) -> Option<CaptureArtifact> {
        let (resource, generation) = {
            let mut s = self.lock();
            match s.phase {
                CapturePhase::Acquiring => {
                    log::debug!("capture: stop requested during acquisition");
                    s.stop_requested = true;
                    return None;
                }
                CapturePhase::Idle | CapturePhase::Stopping => return None,
                CapturePhase::Recording => {}
            }
            // Taken before any await so a second stop finds nothing.
            let resource = s.resource.take()?;
            s.phase = CapturePhase::Stopping;
            if let Some(started) = s.started_at.take() {
                s.elapsed = started.elapsed();
            }
            (resource, s.generation)
        };

        let result = resource.finish().await;
        self.restore_audio_mode().await;

        let mut s = self.lock();
        match result {
            Ok(artifact) => {
                log::info!(
                    "capture: {:.1} s recorded to {}",
                    artifact.duration.as_secs_f32(),
                    artifact.path.display()
                );
                s.settle_idle(generation, None);
                s.has_captured = true;
                s.last_artifact = Some(artifact.clone());
                Some(artifact)
            }
            Err(e) => {
                log::error!("capture: finishing recording failed: {e}");
                s.settle_idle(generation, Some(e.to_string()));
                None
            }
        }
    }

    /// Clear the transient results.  An acquisition in progress is left
    /// alone.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.has_captured = false;
        s.last_artifact = None;
        s.error = None;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> CapturePhase {
        self.lock().phase
    }

    pub fn is_recording(&self) -> bool {
        self.phase() == CapturePhase::Recording
    }

    /// Recording time as of the last tick (or of `stop`).
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    pub fn has_captured(&self) -> bool {
        self.lock().has_captured
    }

    pub fn last_artifact(&self) -> Option<CaptureArtifact> {
        self.lock().last_artifact.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap()
    }

    async fn restore_audio_mode(&self) {
        if let Err(e) = self.device.configure_audio_mode(false).await {
            log::warn!("capture: could not restore audio mode: {e}");
        }
    }

    fn spawn_tick(&self, generation: u64) {
        let session = Arc::clone(&self.session);
        let period = self.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let mut s = session.lock().unwrap();
                if s.phase != CapturePhase::Recording || s.generation != generation {
                    break;
                }
                if let Some(started) = s.started_at {
                    s.elapsed = started.elapsed();
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
