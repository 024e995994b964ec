use std::collections::BTreeMap;

use crate::foundation::error::{EaselError, EaselResult, SettingError};
use crate::settings::descriptor::{SettingKind, SettingValue};
use crate::settings::schema::SettingsSchema;

/// Serialized settings values, keyed by setting key.
///
/// Produced by [`SettingsSchema::snapshot`] and consumed by [`SettingsSchema::restore`]. Restored
/// snapshots are treated as untrusted input.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SettingsSnapshot {
    /// Raw JSON value per key.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl SettingsSnapshot {
    /// Parse a snapshot from JSON text.
    pub fn from_json_str(s: &str) -> EaselResult<Self> {
        serde_json::from_str(s).map_err(|e| EaselError::serde(e.to_string()))
    }

    /// Serialize to pretty JSON text.
    pub fn to_json_string(&self) -> EaselResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EaselError::serde(e.to_string()))
    }

    /// Read a snapshot file.
    pub fn load(path: impl AsRef<std::path::Path>) -> EaselResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EaselError::serde(format!("failed to read settings '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Write a snapshot file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> EaselResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json_string()?).map_err(|e| {
            EaselError::serde(format!("failed to write settings '{}': {e}", path.display()))
        })
    }

    /// Set one raw value.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }
}

/// What happened to each entry of a restored snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Keys whose validated value was stored.
    pub applied: Vec<String>,
    /// Entries that failed shape or constraint checks; their settings keep the prior value.
    pub rejected: Vec<SettingError>,
    /// Keys not declared by the schema.
    pub unknown: Vec<String>,
    /// Whether any stored value actually changed.
    pub changed: bool,
}

impl SettingsSchema {
    /// Current values as a serializable snapshot.
    pub fn snapshot(&self) -> SettingsSnapshot {
        let values = self
            .iter()
            .map(|(k, d)| (k.to_owned(), d.current().to_json()))
            .collect();
        SettingsSnapshot { values }
    }

    /// Apply a snapshot through the same validation path as any other write.
    ///
    /// `null` image entries are skipped, since snapshots cannot carry decoded images.
    pub fn restore(&mut self, snapshot: &SettingsSnapshot) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (key, raw) in &snapshot.values {
            let Some(descriptor) = self.get(key) else {
                report.unknown.push(key.clone());
                continue;
            };
            let spec = *descriptor.spec();
            // decoded images are never persisted; a null entry leaves the live one alone
            if spec.kind() == SettingKind::Image && raw.is_null() {
                continue;
            }
            let applied = SettingValue::from_json(key, &spec, raw).and_then(|v| self.set(key, v));
            match applied {
                Ok(update) => {
                    report.changed |= update.changed;
                    report.applied.push(key.clone());
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "rejected restored setting");
                    report.rejected.push(e);
                }
            }
        }
        report
    }
}

#[cfg(test)]
#[path = "../../tests/unit/settings/persist.rs"]
mod tests;
