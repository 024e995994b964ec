use crate::foundation::error::{EaselError, EaselResult};
use crate::settings::descriptor::AudioConstraints;

/// Time-sliced frequency band magnitudes, the value of an `audio` setting.
///
/// Every slice holds the same number of bands; magnitudes are in `0.0..=255.0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBands {
    slices: Vec<Vec<f32>>,
}

impl AudioBands {
    /// Wrap raw slices. Shape is checked against a schema on validation, not here.
    pub fn new(slices: Vec<Vec<f32>>) -> Self {
        Self { slices }
    }

    /// All slices in time order.
    pub fn slices(&self) -> &[Vec<f32>] {
        &self.slices
    }

    /// Number of time slices.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// `true` when there are no slices.
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Analyze mono PCM into band vectors governed by `constraints`.
///
/// Input longer than the maximum duration is truncated; input shorter than the minimum is
/// rejected. One slice is produced per `sample_interval_secs` window, each holding
/// `band_count` DFT magnitudes spread linearly between the window's first bin and Nyquist.
pub fn sample_bands(
    pcm: &[f32],
    sample_rate: u32,
    constraints: &AudioConstraints,
) -> EaselResult<AudioBands> {
    if sample_rate == 0 {
        return Err(EaselError::validation("audio sample_rate must be > 0"));
    }
    let sr = f64::from(sample_rate);
    let duration = pcm.len() as f64 / sr;
    let [min_secs, max_secs] = constraints.duration_secs();
    if duration < min_secs {
        return Err(EaselError::validation(format!(
            "audio is {duration:.3}s long, shorter than the minimum {min_secs}s"
        )));
    }

    let used = ((duration.min(max_secs) * sr).floor() as usize).min(pcm.len());
    let window = ((constraints.sample_interval_secs() * sr).round() as usize).max(2);
    let slice_count = used / window;
    if slice_count == 0 {
        return Err(EaselError::validation(
            "audio is shorter than one sample interval",
        ));
    }

    let bands = constraints.band_count();
    let nyquist_bin = window / 2;
    let mut slices = Vec::with_capacity(slice_count);
    for chunk in pcm[..slice_count * window].chunks_exact(window) {
        let mut out = Vec::with_capacity(bands);
        for band in 0..bands {
            let bin = 1 + band * nyquist_bin.saturating_sub(1) / bands.max(1);
            out.push(bin_magnitude(chunk, bin) * 255.0);
        }
        slices.push(out);
    }

    tracing::debug!(
        slices = slices.len(),
        bands,
        window,
        "sampled audio into band vectors"
    );
    Ok(AudioBands::new(slices))
}

// Single-bin DFT magnitude, normalized so a full-scale sine reads ~1.0.
fn bin_magnitude(window: &[f32], bin: usize) -> f32 {
    let n = window.len() as f64;
    let w = std::f64::consts::TAU * bin as f64 / n;
    let (mut re, mut im) = (0.0f64, 0.0f64);
    for (i, &x) in window.iter().enumerate() {
        let phase = w * i as f64;
        re += f64::from(x) * phase.cos();
        im -= f64::from(x) * phase.sin();
    }
    let mag = 2.0 * (re * re + im * im).sqrt() / n;
    mag.clamp(0.0, 1.0) as f32
}

#[cfg(test)]
#[path = "../../tests/unit/assets/audio.rs"]
mod tests;
