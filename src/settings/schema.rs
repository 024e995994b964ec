use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::assets::audio::AudioBands;
use crate::assets::decode::ImageHandle;
use crate::foundation::error::{EaselError, EaselResult, SettingError};
use crate::settings::color::Color;
use crate::settings::descriptor::{SettingDescriptor, SettingSpec, SettingValue};

/// Outcome of a validated write.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingUpdate {
    /// Normalized value now stored.
    pub value: SettingValue,
    /// Whether the stored value differs from the previous one.
    pub changed: bool,
}

/// Ordered mapping from stable keys to setting descriptors.
///
/// Order only matters for display. The only write path is [`SettingsSchema::set`], which runs the
/// candidate through validation first.
#[derive(Debug, Clone, Default)]
pub struct SettingsSchema {
    entries: Vec<(String, SettingDescriptor)>,
    index: HashMap<String, usize>,
}

impl SettingsSchema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`SettingsSchema::insert`].
    pub fn with(mut self, key: impl Into<String>, descriptor: SettingDescriptor) -> EaselResult<Self> {
        self.insert(key, descriptor)?;
        Ok(self)
    }

    /// Declare a setting. Keys must be unique and non-empty.
    pub fn insert(&mut self, key: impl Into<String>, descriptor: SettingDescriptor) -> EaselResult<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(EaselError::validation("setting keys must be non-empty"));
        }
        if self.index.contains_key(&key) {
            return Err(EaselError::validation(format!(
                "duplicate setting key '{key}'"
            )));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, descriptor));
        Ok(())
    }

    /// Number of declared settings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// `(key, descriptor)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingDescriptor)> {
        self.entries.iter().map(|(k, d)| (k.as_str(), d))
    }

    /// Descriptor for `key`.
    pub fn get(&self, key: &str) -> Option<&SettingDescriptor> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    fn get_or_err(&self, key: &str) -> Result<&SettingDescriptor, SettingError> {
        self.get(key)
            .ok_or_else(|| SettingError::new(key, "no such setting"))
    }

    /// Check a candidate against the declared constraints and return its normalized form.
    ///
    /// Does not store anything.
    pub fn validate(
        &self,
        key: &str,
        candidate: impl Into<SettingValue>,
    ) -> Result<SettingValue, SettingError> {
        self.get_or_err(key)?.spec().normalize(key, candidate.into())
    }

    /// Normalized default of `key`.
    pub fn default_value(&self, key: &str) -> Result<SettingValue, SettingError> {
        Ok(self.get_or_err(key)?.default_value().clone())
    }

    /// Validate and store a candidate. Rejected candidates leave the stored value untouched.
    pub fn set(
        &mut self,
        key: &str,
        candidate: impl Into<SettingValue>,
    ) -> Result<SettingUpdate, SettingError> {
        let value = self.validate(key, candidate)?;
        let i = self.index[key];
        let previous = self.entries[i].1.replace_current(value.clone());
        Ok(SettingUpdate {
            changed: previous != value,
            value,
        })
    }

    /// Restore every setting to its default. Returns `true` when any value changed.
    pub fn reset_to_defaults(&mut self) -> bool {
        let mut changed = false;
        for (_, d) in &mut self.entries {
            let default = d.default_value().clone();
            changed |= d.replace_current(default.clone()) != default;
        }
        changed
    }

    /// Live value of `key`.
    pub fn value(&self, key: &str) -> Option<&SettingValue> {
        self.get(key).map(SettingDescriptor::current)
    }

    /// Live value of a `number` setting.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.value(key)? {
            SettingValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Live value of a `range` setting.
    pub fn range(&self, key: &str) -> Option<[f64; 2]> {
        match self.value(key)? {
            SettingValue::Range(v) => Some(*v),
            _ => None,
        }
    }

    /// Live value of a `boolean` setting.
    pub fn boolean(&self, key: &str) -> Option<bool> {
        match self.value(key)? {
            SettingValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Live value of a `color` setting.
    pub fn color(&self, key: &str) -> Option<Color> {
        match self.value(key)? {
            SettingValue::Color(v) => Some(*v),
            _ => None,
        }
    }

    /// Live value of an `image` setting, if one is loaded.
    pub fn image(&self, key: &str) -> Option<&ImageHandle> {
        match self.value(key)? {
            SettingValue::Image(v) => v.as_ref(),
            _ => None,
        }
    }

    /// Live value of an `audio` setting, if one is provided.
    pub fn audio(&self, key: &str) -> Option<&AudioBands> {
        match self.value(key)? {
            SettingValue::Audio(v) => v.as_ref(),
            _ => None,
        }
    }

    /// Panel-facing description of every setting, in declaration order.
    ///
    /// Each entry has `type`, `label`, `value` and, depending on the kind, `description`,
    /// `range` + `step` (numeric kinds) or `interval` + `duration` + `bands` (audio).
    pub fn describe(&self) -> Value {
        let mut out = Map::new();
        for (key, d) in self.iter() {
            let mut e = Map::new();
            e.insert("type".to_owned(), json!(d.kind()));
            e.insert("label".to_owned(), json!(d.label()));
            if let Some(desc) = d.description() {
                e.insert("description".to_owned(), json!(desc));
            }
            match d.spec() {
                SettingSpec::Number(c) | SettingSpec::Range(c) => {
                    e.insert("range".to_owned(), json!([c.min(), c.max()]));
                    e.insert("step".to_owned(), json!(c.step()));
                }
                SettingSpec::Audio(c) => {
                    e.insert("interval".to_owned(), json!(c.sample_interval_secs()));
                    e.insert("duration".to_owned(), json!(c.duration_secs()));
                    e.insert("bands".to_owned(), json!(c.band_count()));
                }
                SettingSpec::Boolean | SettingSpec::Color | SettingSpec::Image => {}
            }
            e.insert("value".to_owned(), d.current().to_json());
            out.insert(key.to_owned(), Value::Object(e));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/settings/schema.rs"]
mod tests;
