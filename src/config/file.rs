//! TOML configuration file loading
//!
//! Supports `~/.config/toy-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ToyConfigFile {
    /// Daemon socket configuration
    #[serde(default)]
    pub daemon: DaemonFileConfig,

    /// Speech synthesis engine configuration
    #[serde(default)]
    pub synth: SynthFileConfig,

    /// Audio player configuration
    #[serde(default)]
    pub player: PlayerFileConfig,

    /// Voice model locations
    #[serde(default)]
    pub voices: VoicesFileConfig,

    /// Conversation loop configuration
    #[serde(default)]
    pub conversation: ConversationFileConfig,
}

/// Daemon socket configuration
#[derive(Debug, Default, Deserialize)]
pub struct DaemonFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,

    /// Never fall back to one-shot synthesis when the daemon is unreachable
    pub required: Option<bool>,

    /// Language to pre-warm at daemon startup
    pub prestart_language: Option<String>,
}

/// Synthesis engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthFileConfig {
    /// Path to the piper binary
    pub binary: Option<String>,

    /// Worker thread hint passed to the engine
    pub threads: Option<usize>,

    pub sentence_silence: Option<f32>,
    pub length_scale: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_w: Option<f32>,
}

/// Audio player configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlayerFileConfig {
    /// Path to the raw PCM player (aplay)
    pub binary: Option<String>,

    /// ALSA device name
    pub device: Option<String>,

    /// Play through sox with a short fade-in
    pub fade: Option<bool>,

    /// Fade duration in milliseconds
    pub fade_ms: Option<f64>,

    /// Sink kind override ("pipe" or "callback")
    pub sink: Option<String>,
}

/// Voice model locations
#[derive(Debug, Default, Deserialize)]
pub struct VoicesFileConfig {
    /// Directory relative model paths are resolved against
    pub models_dir: Option<String>,

    /// Language code to model file
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

/// Conversation loop configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Upstream LLM endpoint
    pub llm_url: Option<String>,

    /// Directory holding per-session memory files
    pub memory_dir: Option<String>,

    /// Maximum retained entries per session
    pub max_turns: Option<usize>,

    /// Words the safety filter refuses
    pub blocked_words: Option<Vec<String>>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ToyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ToyConfigFile {
    config_file_path().map_or_else(ToyConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
pub fn load_config_file_from(path: &Path) -> ToyConfigFile {
    if !path.exists() {
        return ToyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ToyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ToyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/toy-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("toy-voice").join("config.toml"))
}
