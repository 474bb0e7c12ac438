//! Desktop microphone backend built on `cpal`.
//!
//! [`CpalDevice`] implements [`CaptureDevice`].  `cpal::Stream` is not
//! `Send` on every platform, so each recording owns a dedicated OS thread
//! that builds the stream, keeps it alive, and hands the captured samples
//! back when told to stop.  Finishing a recording downmixes, resamples to
//! the configured rate and writes a WAV file into the recordings directory.

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;

use super::resample::{downmix, duration_secs, resample};
use super::wav::write_wav;
use crate::capture::{
    CaptureArtifact, CaptureDevice, CaptureError, Permission, RecordingResource,
};
use crate::config::{AppPaths, CaptureConfig};

// ---------------------------------------------------------------------------
// RawCapture
// ---------------------------------------------------------------------------

/// Interleaved samples exactly as the device delivered them.
#[derive(Debug, Default)]
struct RawCapture {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl RawCapture {
    /// Mono samples at `target_rate`.
    fn into_mono(self, target_rate: u32) -> Vec<f32> {
        let mono = downmix(&self.samples, self.channels);
        resample(&mono, self.sample_rate, target_rate)
    }
}

/// Sent to the stream thread; the thread drops the stream and replies with
/// what it recorded.
struct StopCommand(oneshot::Sender<RawCapture>);

// ---------------------------------------------------------------------------
// CpalDevice
// ---------------------------------------------------------------------------

pub struct CpalDevice {
    recordings_dir: PathBuf,
    target_rate: u32,
    max_recording: Duration,
}

impl CpalDevice {
    pub fn new(config: &CaptureConfig, paths: &AppPaths) -> Self {
        Self {
            recordings_dir: paths.recordings_dir.clone(),
            target_rate: config.sample_rate,
            max_recording: Duration::from_secs_f32(config.max_recording_secs.max(0.0)),
        }
    }
}

#[async_trait]
impl CaptureDevice for CpalDevice {
    /// Desktop hosts have no runtime microphone prompt; an available input
    /// device counts as granted.
    async fn request_permission(&self) -> Result<Permission, CaptureError> {
        let has_input = tokio::task::spawn_blocking(|| {
            cpal::default_host().default_input_device().is_some()
        })
        .await
        .map_err(|e| CaptureError::Device(e.to_string()))?;

        Ok(if has_input {
            Permission::Granted
        } else {
            log::warn!("audio: no input device on the default host");
            Permission::Denied
        })
    }

    async fn configure_audio_mode(&self, recording: bool) -> Result<(), CaptureError> {
        log::debug!("audio: recording mode {}", if recording { "on" } else { "off" });
        Ok(())
    }

    async fn allocate(&self) -> Result<Box<dyn RecordingResource>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<StopCommand>();
        let max_recording = self.max_recording;

        std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || run_stream(max_recording, ready_tx, stop_rx))?;

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| CaptureError::Device("capture thread exited early".into()))??;
        log::debug!("audio: stream open at {sample_rate} Hz, {channels} ch");

        Ok(Box::new(CpalRecording {
            stop_tx,
            recordings_dir: self.recordings_dir.clone(),
            target_rate: self.target_rate,
        }))
    }
}

/// Body of the stream thread.
fn run_stream(
    max_recording: Duration,
    ready: oneshot::Sender<Result<(u32, u16), CaptureError>>,
    stop_rx: mpsc::Receiver<StopCommand>,
) {
    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));

    let opened = open_stream(Arc::clone(&buffer), max_recording);
    let (stream, sample_rate, channels) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok((sample_rate, channels))).is_err() {
        return;
    }

    // Blocks until the recording is finished, discarded, or dropped.
    let reply = stop_rx.recv().ok();
    drop(stream);

    let samples = std::mem::take(&mut *buffer.lock().unwrap());
    if let Some(StopCommand(reply)) = reply {
        let _ = reply.send(RawCapture {
            samples,
            sample_rate,
            channels,
        });
    }
}

fn open_stream(
    buffer: Arc<Mutex<Vec<f32>>>,
    max_recording: Duration,
) -> Result<(cpal::Stream, u32, u16), CaptureError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::Device("no input device".into()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.into();
    let limit = (max_recording.as_secs_f64() * f64::from(sample_rate) * f64::from(channels))
        as usize;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut buf = buffer.lock().unwrap();
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&data[..data.len().min(room)]);
            },
            |err: cpal::StreamError| log::error!("audio: stream error: {err}"),
            None,
        )
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    Ok((stream, sample_rate, channels))
}

// ---------------------------------------------------------------------------
// CpalRecording
// ---------------------------------------------------------------------------

struct CpalRecording {
    stop_tx: mpsc::Sender<StopCommand>,
    recordings_dir: PathBuf,
    target_rate: u32,
}

impl CpalRecording {
    async fn collect(&self) -> Result<RawCapture, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.stop_tx
            .send(StopCommand(tx))
            .map_err(|_| CaptureError::Device("capture thread is gone".into()))?;
        rx.await
            .map_err(|_| CaptureError::Device("capture thread dropped the recording".into()))
    }
}

#[async_trait]
impl RecordingResource for CpalRecording {
    async fn finish(self: Box<Self>) -> Result<CaptureArtifact, CaptureError> {
        let raw = self.collect().await?;
        let target_rate = self.target_rate;
        let path = self.recordings_dir.join(recording_file_name());

        tokio::task::spawn_blocking(move || -> Result<CaptureArtifact, CaptureError> {
            let mono = raw.into_mono(target_rate);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            write_wav(&path, &mono, target_rate)?;
            Ok(CaptureArtifact {
                duration: Duration::from_secs_f32(duration_secs(mono.len(), target_rate)),
                path,
                sample_rate: target_rate,
            })
        })
        .await
        .map_err(|e| CaptureError::Device(e.to_string()))?
    }

    async fn discard(self: Box<Self>) {
        if let Err(e) = self.collect().await {
            log::debug!("audio: discard: {e}");
        }
    }
}

fn recording_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("recording-{millis}.wav")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
