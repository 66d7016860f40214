//! Voice profile resolution
//!
//! Maps a language code to a piper model, its companion `.onnx.json`
//! config, and the sample rate the model emits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Language used when a requested code is not recognized
pub const DEFAULT_LANGUAGE: &str = "en";

/// Sample rate assumed when the model config does not declare one
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Model files shipped with the toy
const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("en", "piper-model-english.onnx"),
    ("de", "piper-model-german.onnx"),
];

/// Resolved voice for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    /// Normalized language code
    pub language: String,

    /// Path to the `.onnx` model
    pub model_path: PathBuf,

    /// Path to the companion JSON config
    pub config_path: PathBuf,

    /// Sample rate of the raw audio the model emits
    pub sample_rate: u32,
}

/// Known voices keyed by language code
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    models: BTreeMap<String, PathBuf>,
}

impl VoiceCatalog {
    /// Create an empty catalog
    #[must_use]
    pub const fn new() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    /// Catalog of the built-in English and German voices under `models_dir`
    #[must_use]
    pub fn with_defaults(models_dir: &Path) -> Self {
        let mut catalog = Self::new();
        for (language, file) in BUILTIN_MODELS {
            catalog.insert(language, models_dir.join(file));
        }
        catalog
    }

    /// Register (or replace) the model for a language
    pub fn insert(&mut self, language: &str, model_path: impl Into<PathBuf>) {
        self.models.insert(base_code(language), model_path.into());
    }

    /// Recognized language codes
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Whether a language code (after normalization of case and region) is known
    #[must_use]
    pub fn is_known(&self, code: &str) -> bool {
        self.models.contains_key(&base_code(code))
    }

    /// Normalize a requested language to a recognized code
    ///
    /// Lower-cases, strips any region suffix (`en-US`, `de_AT`), and maps
    /// unknown or empty codes to [`DEFAULT_LANGUAGE`]. Never fails.
    #[must_use]
    pub fn normalize(&self, code: &str) -> String {
        let base = base_code(code);
        if self.models.contains_key(&base) {
            base
        } else {
            if !base.is_empty() {
                tracing::debug!(requested = %code, fallback = DEFAULT_LANGUAGE, "unrecognized language");
            }
            DEFAULT_LANGUAGE.to_string()
        }
    }

    /// Resolve the profile for a normalized language code
    ///
    /// # Errors
    ///
    /// Returns error if the language has no configured model, or if the
    /// model or its companion config is missing on disk
    pub fn resolve(&self, language: &str) -> Result<VoiceProfile> {
        let model_path = self
            .models
            .get(language)
            .ok_or_else(|| Error::VoiceProfile(format!("no voice configured for '{language}'")))?;

        let config_path = companion_config(model_path);

        if !model_path.exists() {
            return Err(Error::VoiceProfile(format!(
                "model for '{language}' not found: {}",
                model_path.display()
            )));
        }
        if !config_path.exists() {
            return Err(Error::VoiceProfile(format!(
                "model config for '{language}' not found: {}",
                config_path.display()
            )));
        }

        let sample_rate = read_sample_rate(&config_path);

        Ok(VoiceProfile {
            language: language.to_string(),
            model_path: model_path.clone(),
            config_path,
            sample_rate,
        })
    }
}

/// Lower-case a language code and strip its region suffix
#[must_use]
pub fn base_code(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Companion config path: the model path with `.json` appended
#[must_use]
pub fn companion_config(model_path: &Path) -> PathBuf {
    let mut path = model_path.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// Read the sample rate declared in a piper model config
///
/// Accepts a top-level `sample_rate` or the nested `audio.sample_rate`
/// piper writes; falls back to [`DEFAULT_SAMPLE_RATE`].
#[must_use]
pub fn read_sample_rate(config_path: &Path) -> u32 {
    #[derive(Deserialize)]
    struct AudioSection {
        sample_rate: Option<u32>,
    }

    #[derive(Deserialize)]
    struct ModelConfig {
        sample_rate: Option<u32>,
        audio: Option<AudioSection>,
    }

    let parsed = std::fs::read_to_string(config_path)
        .map_err(Error::from)
        .and_then(|content| serde_json::from_str::<ModelConfig>(&content).map_err(Error::from));

    match parsed {
        Ok(cfg) => cfg
            .sample_rate
            .or_else(|| cfg.audio.and_then(|a| a.sample_rate))
            .unwrap_or(DEFAULT_SAMPLE_RATE),
        Err(e) => {
            tracing::warn!(
                path = %config_path.display(),
                error = %e,
                "could not read sample rate, using default"
            );
            DEFAULT_SAMPLE_RATE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_voice(dir: &Path, file: &str, config: &str) -> PathBuf {
        let model = dir.join(file);
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(companion_config(&model), config).unwrap();
        model
    }

    #[test]
    fn test_base_code() {
        assert_eq!(base_code("en-US"), "en");
        assert_eq!(base_code("DE_at"), "de");
        assert_eq!(base_code("  En "), "en");
        assert_eq!(base_code(""), "");
    }

    #[test]
    fn test_normalize_falls_back_to_default() {
        let catalog = VoiceCatalog::with_defaults(Path::new("/models"));

        assert_eq!(catalog.normalize("de-DE"), "de");
        assert_eq!(catalog.normalize("EN"), "en");
        assert_eq!(catalog.normalize("fr"), "en");
        assert_eq!(catalog.normalize(""), "en");
    }

    #[test]
    fn test_companion_config_appends_json() {
        assert_eq!(
            companion_config(Path::new("/m/voice.onnx")),
            PathBuf::from("/m/voice.onnx.json")
        );
    }

    #[test]
    fn test_resolve_reads_nested_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_voice(dir.path(), "en.onnx", r#"{"audio": {"sample_rate": 16000}}"#);

        let mut catalog = VoiceCatalog::new();
        catalog.insert("en", &model);

        let profile = catalog.resolve("en").unwrap();
        assert_eq!(profile.sample_rate, 16000);
        assert_eq!(profile.model_path, model);
        assert_eq!(profile.config_path, companion_config(&model));
    }

    #[test]
    fn test_resolve_prefers_top_level_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_voice(
            dir.path(),
            "de.onnx",
            r#"{"sample_rate": 24000, "audio": {"sample_rate": 16000}}"#,
        );

        let mut catalog = VoiceCatalog::new();
        catalog.insert("de", &model);

        assert_eq!(catalog.resolve("de").unwrap().sample_rate, 24000);
    }

    #[test]
    fn test_unreadable_config_uses_default_rate() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_voice(dir.path(), "en.onnx", "not json");

        let mut catalog = VoiceCatalog::new();
        catalog.insert("en", &model);

        assert_eq!(catalog.resolve("en").unwrap().sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_resolve_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("en.onnx");
        std::fs::write(&model, b"onnx").unwrap();

        let mut catalog = VoiceCatalog::new();
        catalog.insert("en", &model);

        assert!(matches!(catalog.resolve("en"), Err(Error::VoiceProfile(_))));
        assert!(matches!(catalog.resolve("de"), Err(Error::VoiceProfile(_))));
    }
}
