//! 16-bit PCM WAV encoding via `hound`.

use std::path::Path;

use crate::capture::CaptureError;

impl From<hound::Error> for CaptureError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => CaptureError::Io(io),
            other => CaptureError::Encode(other.to_string()),
        }
    }
}

/// Write mono `samples` in `[-1.0, 1.0]` to `path` as 16-bit PCM.
/// Out-of-range samples are clipped.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CaptureError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
