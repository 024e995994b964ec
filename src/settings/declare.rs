use serde::Deserialize;
use serde_json::Value;

use crate::foundation::error::{EaselError, EaselResult};
use crate::settings::color::Color;
use crate::settings::descriptor::{
    AudioConstraints, NumericConstraints, SettingDescriptor, SettingKind,
};
use crate::settings::schema::SettingsSchema;

/// One entry of a JSON settings declaration, as produced by [`SettingsSchema::describe`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSetting {
    #[serde(rename = "type")]
    kind: SettingKind,
    label: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    range: Option<[f64; 2]>,
    #[serde(default)]
    step: Option<f64>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    interval: Option<f64>,
    #[serde(default)]
    duration: Option<[f64; 2]>,
    #[serde(default)]
    bands: Option<usize>,
}

impl SettingsSchema {
    /// Build a schema from a JSON declaration object keyed by setting key.
    ///
    /// Accepts the shape emitted by [`SettingsSchema::describe`]. A `number` entry whose `value`
    /// is a two-element array declares a `range` setting.
    pub fn from_declaration(decl: &Value) -> EaselResult<Self> {
        let Some(entries) = decl.as_object() else {
            return Err(EaselError::validation(
                "settings declaration must be a JSON object",
            ));
        };
        let mut schema = SettingsSchema::new();
        for (key, raw) in entries {
            let raw = RawSetting::deserialize(raw)
                .map_err(|e| EaselError::validation(format!("$.{key}: {e}")))?;
            let descriptor = build(key, raw)?;
            schema.insert(key.clone(), descriptor)?;
        }
        Ok(schema)
    }

    /// [`SettingsSchema::from_declaration`] from JSON text.
    pub fn from_declaration_str(s: &str) -> EaselResult<Self> {
        let decl: Value = serde_json::from_str(s).map_err(|e| EaselError::serde(e.to_string()))?;
        Self::from_declaration(&decl)
    }
}

fn build(key: &str, raw: RawSetting) -> EaselResult<SettingDescriptor> {
    let err = |msg: &str| EaselError::validation(format!("$.{key}: {msg}"));
    let numeric = |raw: &RawSetting| -> EaselResult<NumericConstraints> {
        let [min, max] = raw.range.ok_or_else(|| err("numeric settings need `range`"))?;
        let step = raw.step.ok_or_else(|| err("numeric settings need `step`"))?;
        NumericConstraints::new(min, max, step)
    };

    let descriptor = match raw.kind {
        SettingKind::Number | SettingKind::Range => {
            let constraints = numeric(&raw)?;
            match &raw.value {
                Value::Array(pair) if raw.kind == SettingKind::Range || pair.len() == 2 => {
                    let [a, b] = pair.as_slice() else {
                        return Err(err("range values are pairs of numbers"));
                    };
                    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                        return Err(err("range values are pairs of numbers"));
                    };
                    SettingDescriptor::range(raw.label, constraints, [a, b])?
                }
                Value::Number(n) if raw.kind == SettingKind::Number => {
                    let v = n.as_f64().ok_or_else(|| err("value is not a finite number"))?;
                    SettingDescriptor::number(raw.label, constraints, v)?
                }
                Value::Null if raw.kind == SettingKind::Number => {
                    SettingDescriptor::number(raw.label, constraints, constraints.min())?
                }
                _ => return Err(err("value does not match the declared type")),
            }
        }
        SettingKind::Boolean => {
            let v = match raw.value {
                Value::Null => false,
                Value::Bool(b) => b,
                _ => return Err(err("boolean settings need a boolean value")),
            };
            SettingDescriptor::boolean(raw.label, v)?
        }
        SettingKind::Color => {
            let color = Color::from_json(&raw.value).map_err(|e| err(&e))?;
            SettingDescriptor::color(raw.label, &color.to_hex())?
        }
        SettingKind::Image => {
            if !raw.value.is_null() {
                return Err(err("image settings are declared empty (null)"));
            }
            SettingDescriptor::image(raw.label)?
        }
        SettingKind::Audio => {
            let (Some(interval), Some(duration), Some(bands)) =
                (raw.interval, raw.duration, raw.bands)
            else {
                return Err(err("audio settings need `interval`, `duration` and `bands`"));
            };
            if !raw.value.is_null() {
                return Err(err("audio settings are declared empty (null)"));
            }
            SettingDescriptor::audio(raw.label, AudioConstraints::new(interval, duration, bands)?)?
        }
    };

    Ok(match raw.description {
        Some(d) => descriptor.with_description(d),
        None => descriptor,
    })
}

#[cfg(test)]
#[path = "../../tests/unit/settings/declare.rs"]
mod tests;
