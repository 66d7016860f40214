//! One-shot synthesis used when the daemon is unreachable
//!
//! Synthesizes to a temporary WAV file and plays it. The file is removed
//! on every exit path.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::process;
use super::{CallbackSink, SinkKind, VoiceCatalog, VoiceProfile};
use crate::config::{Config, PlayerConfig, SynthConfig};
use crate::{Error, Result};

/// Longest a one-shot synthesis may run
const SYNTH_TIMEOUT: Duration = Duration::from_secs(40);

/// Longest `--help` may take while detecting the flag style
const HELP_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line flag spelling the synthesizer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStyle {
    /// `-m MODEL -c CONFIG -f FILE`
    Short,
    /// `--model MODEL --config CONFIG --output_file FILE`
    Long,
    /// Help text named neither; try short, then long
    Unknown,
}

impl FlagStyle {
    /// Classify the synthesizer's `--help` output
    #[must_use]
    pub fn from_help(help: &str) -> Self {
        let has = |flag: &str| {
            help.split(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']' | '|' | '='))
                .any(|token| token == flag)
        };

        if has("-m") && has("-f") {
            Self::Short
        } else if has("--model") && has("--output_file") {
            Self::Long
        } else {
            Self::Unknown
        }
    }

    /// Run `<binary> --help` and classify what it prints
    fn detect(binary: &Path) -> Self {
        let help = match run_help(binary) {
            Ok(help) => help,
            Err(e) => {
                tracing::debug!(error = %e, "could not read synthesizer help");
                return Self::Unknown;
            }
        };

        let style = Self::from_help(&help);
        tracing::debug!(?style, binary = %binary.display(), "detected synthesizer flags");
        style
    }
}

/// Flag names for the model, config and output file
struct Flags {
    model: &'static str,
    config: &'static str,
    output: &'static str,
}

const SHORT_FLAGS: Flags = Flags {
    model: "-m",
    config: "-c",
    output: "-f",
};

const LONG_FLAGS: Flags = Flags {
    model: "--model",
    config: "--config",
    output: "--output_file",
};

/// Cold-path synthesizer: spawn, synthesize, play, clean up
#[derive(Debug, Clone)]
pub struct OneShotSynth {
    synth: SynthConfig,
    player: PlayerConfig,
    voices: VoiceCatalog,
    flag_style: OnceLock<FlagStyle>,
}

impl OneShotSynth {
    /// Create from configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_parts(config.synth.clone(), config.player.clone(), config.voices.clone())
    }

    /// Create from parts
    #[must_use]
    pub const fn with_parts(synth: SynthConfig, player: PlayerConfig, voices: VoiceCatalog) -> Self {
        Self {
            synth,
            player,
            voices,
            flag_style: OnceLock::new(),
        }
    }

    /// Flag style of the configured synthesizer, detected on first use
    fn flag_style(&self, binary: &Path) -> FlagStyle {
        *self.flag_style.get_or_init(|| FlagStyle::detect(binary))
    }

    /// Synthesize `text` and play it, blocking until playback ends
    ///
    /// Uses the same language normalization as the daemon. Empty text is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// Returns error if a binary or voice model is missing, synthesis fails
    /// or times out, or playback fails
    pub fn speak(&self, text: &str, language: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let synth_bin = require_binary(&self.synth.binary, "synthesizer")?;
        let language = self.voices.normalize(language);
        let profile = self.voices.resolve(&language)?;

        let wav = tempfile::Builder::new()
            .prefix("tts_")
            .suffix(".wav")
            .tempfile()?;

        tracing::debug!(language = %language, path = %wav.path().display(), "one-shot synthesis");

        match self.flag_style(&synth_bin) {
            FlagStyle::Short => synthesize(&synth_bin, &SHORT_FLAGS, &profile, text, wav.path())?,
            FlagStyle::Long => synthesize(&synth_bin, &LONG_FLAGS, &profile, text, wav.path())?,
            FlagStyle::Unknown => {
                if let Err(e) = synthesize(&synth_bin, &SHORT_FLAGS, &profile, text, wav.path()) {
                    tracing::debug!(error = %e, "short flags failed, retrying with long flags");
                    synthesize(&synth_bin, &LONG_FLAGS, &profile, text, wav.path())?;
                }
            }
        }

        self.play(wav.path())
    }

    fn play(&self, wav: &Path) -> Result<()> {
        match self.player.sink {
            SinkKind::Pipe => {
                let player = require_binary(&self.player.binary, "player")?;
                let output = Command::new(player)
                    .arg("-q")
                    .arg(wav)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .output()?;

                if output.status.success() {
                    Ok(())
                } else {
                    Err(Error::Process(format!(
                        "player failed ({}): {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )))
                }
            }
            SinkKind::Callback => play_wav_stream(wav),
        }
    }
}

/// Locate an executable, by path or on `PATH`
fn require_binary(binary: &Path, what: &str) -> Result<PathBuf> {
    which::which(binary)
        .map_err(|_| Error::Config(format!("{what} not found at '{}'", binary.display())))
}

/// Capture everything `<binary> --help` prints on stdout and stderr
fn run_help(binary: &Path) -> Result<String> {
    let mut child = Command::new(binary)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(read_all);
    let stderr = child.stderr.take().map(read_all);

    if process::wait_timeout(&mut child, HELP_TIMEOUT)?.is_none() {
        process::terminate(&mut child, "synth", Duration::ZERO);
    }

    let mut help = String::new();
    for handle in [stdout, stderr].into_iter().flatten() {
        help.push_str(&handle.join().unwrap_or_default());
        help.push('\n');
    }
    Ok(help)
}

fn read_all<R: Read + Send + 'static>(mut source: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = source.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// Run the synthesizer once, writing a WAV file to `out`
fn synthesize(
    binary: &Path,
    flags: &Flags,
    profile: &VoiceProfile,
    text: &str,
    out: &Path,
) -> Result<()> {
    let mut child = Command::new(binary)
        .arg(flags.model)
        .arg(&profile.model_path)
        .arg(flags.config)
        .arg(&profile.config_path)
        .arg(flags.output)
        .arg(out)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Process(format!("failed to start synthesizer: {e}")))?;

    let stderr = child.stderr.take().map(|s| process::collect_stderr("synth", s));

    if let Some(mut stdin) = child.stdin.take()
        && let Err(e) = stdin.write_all(text.as_bytes())
    {
        drop(stdin);
        process::terminate(&mut child, "synth", Duration::ZERO);
        if let Some(handle) = stderr {
            let _ = handle.join();
        }
        return Err(Error::Process(format!("failed to send text to synthesizer: {e}")));
    }

    let Some(status) = process::wait_timeout(&mut child, SYNTH_TIMEOUT)? else {
        process::terminate(&mut child, "synth", Duration::ZERO);
        return Err(Error::Process(format!(
            "synthesizer timed out after {}s",
            SYNTH_TIMEOUT.as_secs()
        )));
    };

    let stderr = stderr
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    if status.success() {
        Ok(())
    } else {
        let detail = if stderr.trim().is_empty() {
            "(no error text)"
        } else {
            stderr.trim()
        };
        Err(Error::Process(format!("synthesizer failed ({status}): {detail}")))
    }
}

/// Decode a WAV file and play it through the default output stream
fn play_wav_stream(wav: &Path) -> Result<()> {
    let mut reader = hound::WavReader::open(wav)
        .map_err(|e| Error::Audio(format!("failed to read {}: {e}", wav.display())))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>(),
    }
    .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;

    let samples = downmix(&interleaved, spec.channels);
    if samples.is_empty() {
        return Ok(());
    }

    let sink = CallbackSink::open(spec.sample_rate)?;
    sink.push_samples(&samples)?;

    let duration_ms = u64::try_from(samples.len()).unwrap_or(u64::MAX).saturating_mul(1000)
        / u64::from(spec.sample_rate.max(1));
    sink.drain(Duration::from_millis(duration_ms + 500));

    // Let the device flush its last buffer
    thread::sleep(Duration::from_millis(100));
    Ok(())
}

/// Average interleaved frames down to mono
fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(usize::from(channels))
        .map(|frame| frame.iter().sum::<f32>() / f32::from(channels))
        .collect()
}
