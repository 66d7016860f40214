//! Shared test utilities
//!
//! Builds a sandbox with a fake synthesizer and player. The synthesizer
//! echoes its input as "audio" (or copies a prepared WAV when asked for a
//! file) and the player appends whatever it receives to `audio.out`.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use toy_voice::PipelineManager;
use toy_voice::config::{PlayerConfig, SynthConfig};
use toy_voice::voice::{OneShotSynth, SinkKind, VoiceCatalog};

pub const SAMPLE_RATE: u32 = 16000;

/// Temporary directory with fake binaries and voice models
pub struct Sandbox {
    pub dir: TempDir,
    pub synth: PathBuf,
    pub player: PathBuf,
    pub models: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create sandbox");
        let root = dir.path();

        let models = root.join("models");
        fs::create_dir_all(&models).unwrap();
        for file in ["piper-model-english.onnx", "piper-model-german.onnx"] {
            install_model(&models.join(file));
        }

        let sample = root.join("sample.wav");
        write_wav(&sample);

        let synth = root.join("fake-piper");
        write_script(
            &synth,
            &format!(
                r#"#!/bin/sh
if [ "$1" = "--help" ]; then
  echo "usage: piper -m MODEL -c CONFIG -f FILE"
  exit 0
fi
echo "$@" >> "{args}"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -f) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ -n "$out" ]; then
  cat >> "{text}"
  cp "{sample}" "$out"
else
  exec cat
fi
"#,
                args = root.join("synth.args").display(),
                text = root.join("synth.text").display(),
                sample = sample.display(),
            ),
        );

        let player = root.join("fake-aplay");
        write_script(
            &player,
            &format!(
                r#"#!/bin/sh
last=""
for a in "$@"; do last="$a"; done
if [ -f "$last" ]; then
  cat "$last" >> "{out}"
else
  exec cat >> "{out}"
fi
"#,
                out = root.join("audio.out").display(),
            ),
        );

        Self {
            dir,
            synth,
            player,
            models,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn synth_config(&self) -> SynthConfig {
        SynthConfig {
            binary: self.synth.clone(),
            threads: 1,
            sentence_silence: Some(0.1),
            length_scale: None,
            noise_scale: None,
            noise_w: None,
        }
    }

    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            binary: self.player.clone(),
            device: "default".to_string(),
            fade: false,
            fade_ms: 12.0,
            sink: SinkKind::Pipe,
        }
    }

    pub fn voices(&self) -> VoiceCatalog {
        VoiceCatalog::with_defaults(&self.models)
    }

    pub fn manager(&self) -> PipelineManager {
        PipelineManager::with_parts(self.synth_config(), self.player_config(), self.voices())
    }

    /// Manager running other synthesizer and player binaries
    pub fn manager_with(&self, synth: &Path, player: &Path) -> PipelineManager {
        let mut synth_config = self.synth_config();
        synth_config.binary = synth.to_path_buf();
        let mut player_config = self.player_config();
        player_config.binary = player.to_path_buf();
        PipelineManager::with_parts(synth_config, player_config, self.voices())
    }

    pub fn oneshot(&self) -> OneShotSynth {
        OneShotSynth::with_parts(self.synth_config(), self.player_config(), self.voices())
    }

    /// One-shot synthesizer running another synthesizer binary
    pub fn oneshot_with(&self, synth: &Path) -> OneShotSynth {
        let mut synth_config = self.synth_config();
        synth_config.binary = synth.to_path_buf();
        OneShotSynth::with_parts(synth_config, self.player_config(), self.voices())
    }

    /// Write an executable script into the sandbox
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        write_script(&path, body);
        path
    }

    /// Allow or forbid running a sandbox binary
    pub fn set_executable(&self, path: &Path, executable: bool) {
        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    /// Delete the German model so its profile no longer resolves
    pub fn remove_german(&self) {
        fs::remove_file(self.models.join("piper-model-german.onnx")).unwrap();
    }

    /// Delete the English model so its profile no longer resolves
    pub fn remove_english(&self) {
        fs::remove_file(self.models.join("piper-model-english.onnx")).unwrap();
    }

    /// Everything the fake player has played so far
    pub fn audio(&self) -> String {
        fs::read(self.path().join("audio.out"))
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }

    /// Argument lines the fake synthesizer was started with
    pub fn synth_invocations(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("synth.args"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Text the fake synthesizer received in file mode
    pub fn synth_text(&self) -> String {
        fs::read_to_string(self.path().join("synth.text")).unwrap_or_default()
    }

    /// Poll until the player has received `needle`
    pub fn wait_for_audio(&self, needle: &str) -> bool {
        wait_until(Duration::from_secs(5), || self.audio().contains(needle))
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn install_model(model: &Path) {
    fs::write(model, b"onnx").unwrap();
    let config = format!(r#"{{"audio": {{"sample_rate": {SAMPLE_RATE}}}}}"#);
    fs::write(toy_voice::voice::companion_config(model), config).unwrap();
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn write_wav(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..SAMPLE_RATE / 10 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}
