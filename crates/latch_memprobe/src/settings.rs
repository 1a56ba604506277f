//! Probe settings

use latch_memory::Alignment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("`sizes` must contain at least one non-zero size")]
    NoSizes,
}

/// What the probe allocates and what it expects back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Byte sizes passed to every single-object and array entry point.
    pub sizes: Vec<usize>,
    /// Element count for the `AlignedArray` pass.
    pub array_len: usize,
    /// Every probed composite must resolve to at least this alignment.
    pub min_alignment: Alignment,
    /// Print allocation counters as JSON when done.
    pub report_json: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            sizes: vec![1, 16, 4096],
            array_len: 256,
            min_alignment: Alignment::SIMD,
            report_json: false,
        }
    }
}

impl ProbeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: ProbeSettings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.sizes.iter().all(|&s| s == 0) {
            return Err(SettingsError::NoSizes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let settings = ProbeSettings::from_json("{}").unwrap();
        assert_eq!(settings.sizes, vec![1, 16, 4096]);
        assert_eq!(settings.min_alignment, Alignment::SIMD);
        assert!(!settings.report_json);
    }

    #[test]
    fn overrides_are_applied() {
        let settings =
            ProbeSettings::from_json(r#"{ "sizes": [64], "min_alignment": 64, "report_json": true }"#)
                .unwrap();
        assert_eq!(settings.sizes, vec![64]);
        assert_eq!(settings.min_alignment.get(), 64);
        assert_eq!(settings.array_len, 256);
        assert!(settings.report_json);
    }

    #[test]
    fn invalid_alignment_is_rejected() {
        let err = ProbeSettings::from_json(r#"{ "min_alignment": 48 }"#).unwrap_err();
        assert!(err.to_string().contains("power of two"), "{err}");

        let err = ProbeSettings::from_json(r#"{ "min_alignment": 8192 }"#).unwrap_err();
        assert!(err.to_string().contains("ceiling"), "{err}");
    }

    #[test]
    fn zero_only_sizes_are_rejected() {
        assert!(matches!(
            ProbeSettings::from_json(r#"{ "sizes": [0, 0] }"#),
            Err(SettingsError::NoSizes)
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ProbeSettings::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
