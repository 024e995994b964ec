use std::fmt;

use crate::assets::audio::AudioBands;
use crate::assets::decode::ImageHandle;
use crate::foundation::error::{EaselError, EaselResult, SettingError};
use crate::settings::color::Color;

/// Kind tag of a declared setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    /// Scalar number.
    Number,
    /// Ordered pair of numbers.
    Range,
    /// Boolean toggle.
    Boolean,
    /// Color value.
    Color,
    /// Decoded image (or none yet).
    Image,
    /// Analyzed audio bands (or none yet).
    Audio,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Number => "number",
            Self::Range => "range",
            Self::Boolean => "boolean",
            Self::Color => "color",
            Self::Image => "image",
            Self::Audio => "audio",
        };
        f.write_str(s)
    }
}

/// `[min, max]` bounds and step granularity of numeric kinds.
///
/// Only constructible through [`NumericConstraints::new`]; deserialization runs the same checks.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawNumericConstraints")]
pub struct NumericConstraints {
    min: f64,
    max: f64,
    step: f64,
}

#[derive(serde::Deserialize)]
struct RawNumericConstraints {
    min: f64,
    max: f64,
    step: f64,
}

impl TryFrom<RawNumericConstraints> for NumericConstraints {
    type Error = EaselError;

    fn try_from(raw: RawNumericConstraints) -> EaselResult<Self> {
        Self::new(raw.min, raw.max, raw.step)
    }
}

impl NumericConstraints {
    /// Create validated constraints: finite bounds, `min <= max`, finite `step > 0`.
    pub fn new(min: f64, max: f64, step: f64) -> EaselResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(EaselError::validation("numeric bounds must be finite"));
        }
        if min > max {
            return Err(EaselError::validation(format!(
                "numeric min {min} must be <= max {max}"
            )));
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(EaselError::validation("numeric step must be finite and > 0"));
        }
        Ok(Self { min, max, step })
    }

    /// Inclusive lower bound.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Inclusive upper bound.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Step, measured from `min`.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Clamp to `[min, max]`, then snap to the nearest `min + k * step` that stays within bounds.
    ///
    /// Infinite inputs clamp to the matching bound. NaN is the caller's problem.
    pub fn normalize(self, v: f64) -> f64 {
        let clamped = v.clamp(self.min, self.max);
        let max_steps = ((self.max - self.min) / self.step + 1e-9).floor();
        let k = ((clamped - self.min) / self.step).round().clamp(0.0, max_steps);
        (self.min + k * self.step).clamp(self.min, self.max)
    }
}

/// Production constraints of an `audio` setting.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawAudioConstraints")]
pub struct AudioConstraints {
    sample_interval_secs: f64,
    duration_secs: [f64; 2],
    band_count: usize,
}

#[derive(serde::Deserialize)]
struct RawAudioConstraints {
    sample_interval_secs: f64,
    duration_secs: [f64; 2],
    band_count: usize,
}

impl TryFrom<RawAudioConstraints> for AudioConstraints {
    type Error = EaselError;

    fn try_from(raw: RawAudioConstraints) -> EaselResult<Self> {
        Self::new(raw.sample_interval_secs, raw.duration_secs, raw.band_count)
    }
}

impl AudioConstraints {
    /// Create validated audio constraints.
    pub fn new(
        sample_interval_secs: f64,
        duration_secs: [f64; 2],
        band_count: usize,
    ) -> EaselResult<Self> {
        if !sample_interval_secs.is_finite() || sample_interval_secs <= 0.0 {
            return Err(EaselError::validation(
                "audio sample interval must be finite and > 0",
            ));
        }
        let [lo, hi] = duration_secs;
        if !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo > hi {
            return Err(EaselError::validation(
                "audio duration bounds must be finite with 0 <= min <= max",
            ));
        }
        if band_count == 0 {
            return Err(EaselError::validation("audio band count must be > 0"));
        }
        Ok(Self {
            sample_interval_secs,
            duration_secs,
            band_count,
        })
    }

    /// Seconds between successive slices (`1 / slicesPerSecond`).
    pub fn sample_interval_secs(&self) -> f64 {
        self.sample_interval_secs
    }

    /// `[min, max]` duration in seconds of the analyzed audio.
    pub fn duration_secs(&self) -> [f64; 2] {
        self.duration_secs
    }

    /// Number of bands per slice.
    pub fn band_count(&self) -> usize {
        self.band_count
    }
}

/// Declared kind plus its kind-specific constraints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingSpec {
    /// Scalar number within bounds.
    Number(NumericConstraints),
    /// Ordered pair, each element within bounds.
    Range(NumericConstraints),
    /// Boolean toggle.
    Boolean,
    /// Color value.
    Color,
    /// Image handle.
    Image,
    /// Audio bands.
    Audio(AudioConstraints),
}

impl SettingSpec {
    /// Kind tag of this spec.
    pub fn kind(&self) -> SettingKind {
        match self {
            Self::Number(_) => SettingKind::Number,
            Self::Range(_) => SettingKind::Range,
            Self::Boolean => SettingKind::Boolean,
            Self::Color => SettingKind::Color,
            Self::Image => SettingKind::Image,
            Self::Audio(_) => SettingKind::Audio,
        }
    }

    /// Check and normalize a candidate for this spec. `key` only labels errors.
    pub fn normalize(&self, key: &str, candidate: SettingValue) -> Result<SettingValue, SettingError> {
        let got = candidate.kind();
        match (self, candidate) {
            (Self::Number(c), SettingValue::Number(v)) => {
                reject_nan(key, v)?;
                Ok(SettingValue::Number(c.normalize(v)))
            }
            (Self::Range(c), SettingValue::Range([a, b])) => {
                reject_nan(key, a)?;
                reject_nan(key, b)?;
                let (a, b) = (c.normalize(a), c.normalize(b));
                Ok(SettingValue::Range([a.min(b), a.max(b)]))
            }
            (Self::Boolean, v @ SettingValue::Boolean(_)) => Ok(v),
            (Self::Color, v @ SettingValue::Color(_)) => Ok(v),
            (Self::Image, v @ SettingValue::Image(_)) => Ok(v),
            (Self::Audio(_), SettingValue::Audio(None)) => Ok(SettingValue::Audio(None)),
            (Self::Audio(c), SettingValue::Audio(Some(bands))) => {
                for (i, slice) in bands.slices().iter().enumerate() {
                    if slice.len() != c.band_count {
                        return Err(SettingError::new(
                            key,
                            format!(
                                "audio slice {i} has {} bands, expected {}",
                                slice.len(),
                                c.band_count
                            ),
                        ));
                    }
                    if slice.iter().any(|x| !x.is_finite()) {
                        return Err(SettingError::new(
                            key,
                            format!("audio slice {i} contains non-finite samples"),
                        ));
                    }
                }
                Ok(SettingValue::Audio(Some(bands)))
            }
            _ => Err(SettingError::new(
                key,
                format!("expected {}, got {got}", self.kind()),
            )),
        }
    }
}

fn reject_nan(key: &str, v: f64) -> Result<(), SettingError> {
    if v.is_nan() {
        return Err(SettingError::new(key, "number must not be NaN"));
    }
    Ok(())
}

/// A typed setting value: the live value of a descriptor or a candidate written to one.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    /// Scalar number.
    Number(f64),
    /// Ordered pair; normalized values satisfy `[0] <= [1]`.
    Range([f64; 2]),
    /// Boolean.
    Boolean(bool),
    /// Color.
    Color(Color),
    /// Decoded image, `None` until loaded.
    Image(Option<ImageHandle>),
    /// Audio bands, `None` until provided.
    Audio(Option<AudioBands>),
}

impl SettingValue {
    /// Kind tag of the value's shape.
    pub fn kind(&self) -> SettingKind {
        match self {
            Self::Number(_) => SettingKind::Number,
            Self::Range(_) => SettingKind::Range,
            Self::Boolean(_) => SettingKind::Boolean,
            Self::Color(_) => SettingKind::Color,
            Self::Image(_) => SettingKind::Image,
            Self::Audio(_) => SettingKind::Audio,
        }
    }

    /// JSON form used by persistence and panel descriptions. Images serialize as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Number(v) => json!(v),
            Self::Range([a, b]) => json!([a, b]),
            Self::Boolean(v) => json!(v),
            Self::Color(c) => json!(c.to_hex()),
            Self::Image(_) => serde_json::Value::Null,
            Self::Audio(None) => serde_json::Value::Null,
            Self::Audio(Some(bands)) => json!(bands.slices()),
        }
    }

    /// Parse an untrusted JSON value into the shape `spec` expects. Not yet normalized.
    pub fn from_json(
        key: &str,
        spec: &SettingSpec,
        value: &serde_json::Value,
    ) -> Result<Self, SettingError> {
        use serde_json::Value;

        let shape_err = |what: &str| SettingError::new(key, format!("expected {what}, got {value}"));
        match spec {
            SettingSpec::Number(_) => value
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| shape_err("a number")),
            SettingSpec::Range(_) => match value.as_array().map(Vec::as_slice) {
                Some([a, b]) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => Ok(Self::Range([a, b])),
                    _ => Err(shape_err("a pair of numbers")),
                },
                _ => Err(shape_err("a pair of numbers")),
            },
            SettingSpec::Boolean => value
                .as_bool()
                .map(Self::Boolean)
                .ok_or_else(|| shape_err("a boolean")),
            SettingSpec::Color => Color::from_json(value)
                .map(Self::Color)
                .map_err(|e| SettingError::new(key, e)),
            SettingSpec::Image => match value {
                Value::Null => Ok(Self::Image(None)),
                _ => Err(shape_err("null (images are not restorable from JSON)")),
            },
            SettingSpec::Audio(_) => match value {
                Value::Null => Ok(Self::Audio(None)),
                Value::Array(rows) => {
                    let mut slices = Vec::with_capacity(rows.len());
                    for row in rows {
                        let Some(row) = row.as_array() else {
                            return Err(shape_err("an array of band arrays"));
                        };
                        let mut slice = Vec::with_capacity(row.len());
                        for x in row {
                            let Some(x) = x.as_f64() else {
                                return Err(shape_err("numeric band values"));
                            };
                            slice.push(x as f32);
                        }
                        slices.push(slice);
                    }
                    Ok(Self::Audio(Some(AudioBands::new(slices))))
                }
                _ => Err(shape_err("null or an array of band arrays")),
            },
        }
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<[f64; 2]> for SettingValue {
    fn from(v: [f64; 2]) -> Self {
        Self::Range(v)
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<Color> for SettingValue {
    fn from(v: Color) -> Self {
        Self::Color(v)
    }
}

impl From<ImageHandle> for SettingValue {
    fn from(v: ImageHandle) -> Self {
        Self::Image(Some(v))
    }
}

impl From<AudioBands> for SettingValue {
    fn from(v: AudioBands) -> Self {
        Self::Audio(Some(v))
    }
}

/// One declared parameter: display metadata, kind constraints, default and live value.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingDescriptor {
    label: String,
    description: Option<String>,
    spec: SettingSpec,
    default: SettingValue,
    current: SettingValue,
}

impl SettingDescriptor {
    fn build(label: impl Into<String>, spec: SettingSpec, value: SettingValue) -> EaselResult<Self> {
        let label = label.into();
        let default = spec.normalize(&label, value)?;
        Ok(Self {
            label,
            description: None,
            spec,
            current: default.clone(),
            default,
        })
    }

    /// Scalar number setting.
    pub fn number(
        label: impl Into<String>,
        constraints: NumericConstraints,
        value: f64,
    ) -> EaselResult<Self> {
        Self::build(label, SettingSpec::Number(constraints), SettingValue::Number(value))
    }

    /// Ordered-pair setting.
    pub fn range(
        label: impl Into<String>,
        constraints: NumericConstraints,
        value: [f64; 2],
    ) -> EaselResult<Self> {
        Self::build(label, SettingSpec::Range(constraints), SettingValue::Range(value))
    }

    /// Boolean setting.
    pub fn boolean(label: impl Into<String>, value: bool) -> EaselResult<Self> {
        Self::build(label, SettingSpec::Boolean, SettingValue::Boolean(value))
    }

    /// Color setting from any accepted hex form.
    pub fn color(label: impl Into<String>, value: &str) -> EaselResult<Self> {
        let color = Color::parse(value).map_err(EaselError::validation)?;
        Self::build(label, SettingSpec::Color, SettingValue::Color(color))
    }

    /// Image setting, initially empty.
    pub fn image(label: impl Into<String>) -> EaselResult<Self> {
        Self::build(label, SettingSpec::Image, SettingValue::Image(None))
    }

    /// Audio setting, initially empty.
    pub fn audio(label: impl Into<String>, constraints: AudioConstraints) -> EaselResult<Self> {
        Self::build(label, SettingSpec::Audio(constraints), SettingValue::Audio(None))
    }

    /// Attach a description shown by settings panels.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Optional description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Kind tag.
    pub fn kind(&self) -> SettingKind {
        self.spec.kind()
    }

    /// Kind constraints.
    pub fn spec(&self) -> &SettingSpec {
        &self.spec
    }

    /// Normalized default value.
    pub fn default_value(&self) -> &SettingValue {
        &self.default
    }

    /// Live value.
    pub fn current(&self) -> &SettingValue {
        &self.current
    }

    pub(crate) fn replace_current(&mut self, value: SettingValue) -> SettingValue {
        std::mem::replace(&mut self.current, value)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/settings/descriptor.rs"]
mod tests;
