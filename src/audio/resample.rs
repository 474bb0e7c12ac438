//! Channel mixing and sample-rate conversion for recorded audio.
//!
//! The workflow service expects mono audio at `capture.sample_rate`
//! (16 kHz by default).  Microphones usually deliver 44.1/48 kHz stereo, so
//! every recording goes through [`downmix`] and then [`resample`] before it
//! is encoded.

/// Average interleaved frames down to one channel.
///
/// A trailing partial frame is dropped.  `channels == 0` yields nothing.
///
/// ```rust
/// use voice_workflow::audio::downmix;
///
/// let stereo = [0.25_f32, 0.75, -1.0, 1.0];
/// assert_eq!(downmix(&stereo, 2), vec![0.5, 0.0]);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = usize::from(n);
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Convert mono `samples` from `from_rate` to `to_rate` Hz by linear
/// interpolation.
///
/// ```rust
/// use voice_workflow::audio::resample;
///
/// let one_second_48k = vec![0.0_f32; 48_000];
/// assert_eq!(resample(&one_second_48k, 48_000, 16_000).len(), 16_000);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return Vec::new();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / step).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            match samples.get(idx + 1) {
                Some(next) => samples[idx] + (next - samples[idx]) * frac,
                None => samples[idx],
            }
        })
        .collect()
}

/// Duration in seconds of `len` mono samples at `rate` Hz.
pub fn duration_secs(len: usize, rate: u32) -> f32 {
    if rate == 0 {
        return 0.0;
    }
    len as f32 / rate as f32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
