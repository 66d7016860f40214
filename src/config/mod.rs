//! Configuration management for the toy voice pipeline
//!
//! Values are resolved env > toml > default.

pub mod file;

use std::path::PathBuf;

use crate::voice::{SinkKind, VoiceCatalog};

use self::file::ToyConfigFile;

/// Default daemon host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default daemon port
pub const DEFAULT_PORT: u16 = 50051;

/// Toy voice configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Daemon socket configuration
    pub daemon: DaemonConfig,

    /// Speech synthesis engine
    pub synth: SynthConfig,

    /// Audio output
    pub player: PlayerConfig,

    /// Known voices
    pub voices: VoiceCatalog,

    /// Conversation loop
    pub conversation: ConversationConfig,
}

/// Daemon socket configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,

    /// Report failure instead of falling back to one-shot synthesis
    pub required: bool,

    /// Language to pre-warm at startup
    pub prestart_language: Option<String>,
}

impl DaemonConfig {
    /// `host:port` address string
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Speech synthesis engine configuration
#[derive(Debug, Clone)]
pub struct SynthConfig {
    /// Path to the piper binary
    pub binary: PathBuf,

    /// Worker thread hint exported to the engine
    pub threads: usize,

    /// Pause between sentences in seconds
    pub sentence_silence: Option<f32>,

    /// Speaking speed (lower is faster)
    pub length_scale: Option<f32>,

    pub noise_scale: Option<f32>,
    pub noise_w: Option<f32>,
}

/// Audio output configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Path to the raw PCM player
    pub binary: PathBuf,

    /// ALSA device name
    pub device: String,

    /// Play through sox with a fade-in instead of aplay
    pub fade: bool,

    /// Fade duration in milliseconds
    pub fade_ms: f64,

    /// How synthesized audio reaches the speaker
    pub sink: SinkKind,
}

/// Conversation loop configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Upstream LLM endpoint
    pub llm_url: String,

    /// Data directory (settings, session id, transcript)
    pub data_dir: PathBuf,

    /// Directory holding per-session memory files
    pub memory_dir: PathBuf,

    /// Maximum retained entries per session
    pub max_turns: usize,

    /// Words the safety filter refuses
    pub blocked_words: Vec<String>,
}

/// Built-in blocked words for the safety filter
const DEFAULT_BLOCKED_WORDS: &[&str] = &["kill", "weapon", "gun", "drugs", "suicide"];

impl Config {
    /// Load configuration from the process environment and the config file
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_sources(|key| std::env::var(key).ok(), fc)
    }

    /// Build configuration from an environment lookup and a parsed config file
    #[must_use]
    pub fn from_sources(env: impl Fn(&str) -> Option<String>, fc: ToyConfigFile) -> Self {
        let env_flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let daemon = DaemonConfig {
            host: env("TTS_DAEMON_HOST")
                .or(fc.daemon.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: env("TTS_DAEMON_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.daemon.port)
                .unwrap_or(DEFAULT_PORT),
            required: env_flag("TTS_DAEMON_ONLY")
                .or(fc.daemon.required)
                .unwrap_or(false),
            prestart_language: env("PRESTART_LANG")
                .or(fc.daemon.prestart_language)
                .filter(|s| !s.trim().is_empty()),
        };

        let synth = SynthConfig {
            binary: env("PIPER_BIN")
                .or(fc.synth.binary)
                .map_or_else(|| PathBuf::from("/usr/bin/piper"), PathBuf::from),
            threads: env("OMP_NUM_THREADS")
                .and_then(|s| s.parse().ok())
                .or(fc.synth.threads)
                .unwrap_or(2),
            sentence_silence: fc.synth.sentence_silence.or(Some(0.1)),
            length_scale: fc.synth.length_scale.or(Some(0.98)),
            noise_scale: fc.synth.noise_scale,
            noise_w: fc.synth.noise_w,
        };

        let sink = env("TTS_SINK")
            .or(fc.player.sink)
            .and_then(|s| match s.parse::<SinkKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring sink override");
                    None
                }
            })
            .unwrap_or_else(SinkKind::for_target);

        let player = PlayerConfig {
            binary: env("APLAY_BIN")
                .or(fc.player.binary)
                .map_or_else(|| PathBuf::from("aplay"), PathBuf::from),
            device: env("ALSA_DEVICE")
                .or(fc.player.device)
                .unwrap_or_else(|| "default".to_string()),
            fade: env_flag("USE_SOX_FADE").or(fc.player.fade).unwrap_or(false),
            fade_ms: env("FADE_MS")
                .and_then(|s| s.parse().ok())
                .or(fc.player.fade_ms)
                .unwrap_or(12.0),
            sink,
        };

        let models_dir = env("TTS_MODELS_DIR")
            .or(fc.voices.models_dir)
            .map_or_else(|| PathBuf::from("tts_models"), PathBuf::from);
        let mut voices = VoiceCatalog::with_defaults(&models_dir);
        for (language, model) in fc.voices.models {
            voices.insert(&language, models_dir.join(model));
        }

        // Data directory (~/.local/share/toy-voice on Linux)
        let data_dir = directories::BaseDirs::new()
            .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("toy-voice"));

        let conversation = ConversationConfig {
            llm_url: env("LLM_SERVER_URL")
                .or(fc.conversation.llm_url)
                .unwrap_or_else(|| "http://127.0.0.1:5000/talk".to_string()),
            memory_dir: env("TOY_MEMORY_DIR")
                .or(fc.conversation.memory_dir)
                .map_or_else(|| data_dir.join("memory"), PathBuf::from),
            data_dir,
            max_turns: fc.conversation.max_turns.unwrap_or(20),
            blocked_words: fc.conversation.blocked_words.unwrap_or_else(|| {
                DEFAULT_BLOCKED_WORDS
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            }),
        };

        Self {
            daemon,
            synth,
            player,
            voices,
            conversation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(env_of(&[]), ToyConfigFile::default());

        assert_eq!(config.daemon.addr(), "127.0.0.1:50051");
        assert!(!config.daemon.required);
        assert!(config.daemon.prestart_language.is_none());
        assert_eq!(config.synth.binary, PathBuf::from("/usr/bin/piper"));
        assert_eq!(config.synth.threads, 2);
        assert_eq!(config.player.binary, PathBuf::from("aplay"));
        assert_eq!(config.player.device, "default");
        assert!(!config.player.fade);
        assert_eq!(config.player.sink, SinkKind::for_target());
        assert!(config.voices.is_known("en"));
        assert!(config.voices.is_known("de"));
        assert_eq!(config.conversation.max_turns, 20);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: ToyConfigFile = toml::from_str(
            r#"
            [daemon]
            port = 6000
            host = "0.0.0.0"

            [player]
            fade = false
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            env_of(&[
                ("TTS_DAEMON_PORT", "7000"),
                ("USE_SOX_FADE", "1"),
                ("TTS_DAEMON_ONLY", "true"),
                ("PRESTART_LANG", "de"),
            ]),
            fc,
        );

        assert_eq!(config.daemon.port, 7000);
        assert_eq!(config.daemon.host, "0.0.0.0");
        assert!(config.player.fade);
        assert!(config.daemon.required);
        assert_eq!(config.daemon.prestart_language.as_deref(), Some("de"));
    }

    #[test]
    fn test_bad_port_falls_through() {
        let config = Config::from_sources(env_of(&[("TTS_DAEMON_PORT", "nope")]), ToyConfigFile::default());
        assert_eq!(config.daemon.port, DEFAULT_PORT);
    }

    #[test]
    fn test_extra_voices_from_file() {
        let fc: ToyConfigFile = toml::from_str(
            r#"
            [voices]
            models_dir = "/opt/voices"

            [voices.models]
            fr = "french.onnx"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(env_of(&[]), fc);
        assert!(config.voices.is_known("fr-FR"));
        assert_eq!(config.voices.normalize("fr-FR"), "fr");
    }

    #[test]
    fn test_sink_override() {
        let config = Config::from_sources(env_of(&[("TTS_SINK", "callback")]), ToyConfigFile::default());
        assert_eq!(config.player.sink, SinkKind::Callback);

        let config = Config::from_sources(env_of(&[("TTS_SINK", "bogus")]), ToyConfigFile::default());
        assert_eq!(config.player.sink, SinkKind::for_target());
    }
}
