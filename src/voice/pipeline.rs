//! Pipeline manager - keeps one synthesizer and audio sink hot
//!
//! Owns the active {synthesizer, sink} pair for a single language. Speaking
//! in the active language only writes a line to the synthesizer; a new
//! language tears the pipeline down and builds a fresh one.
//!
//! ```text
//!  speak(text, lang)
//!        │
//!        ▼
//!  Idle ──ensure(L)──▶ Active(L) ──ensure(L')──▶ Active(L')
//!   ▲                     │
//!   └────shutdown()───────┘
//! ```
//!
//! Not internally synchronized: callers serialize access (the daemon holds
//! a mutex across each `speak`).

use std::io::Write;
use std::process::{Child, ChildStdin, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::process::{self, player_command, synth_command};
use super::{AudioSink, CallbackSink, Feeder, PipeSink, SinkKind, VoiceCatalog, VoiceProfile};
use crate::config::{Config, PlayerConfig, SynthConfig};
use crate::{Error, Result};

/// Grace period before the synthesizer is killed during teardown
const SYNTH_GRACE: Duration = Duration::from_secs(1);

/// Bounded wait for the feeder thread to stop
const FEEDER_JOIN: Duration = Duration::from_secs(1);

/// Longest a write to the synthesizer may block
pub const FEED_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the synthesizer's audio goes
enum Output {
    /// Player subprocess reading the synthesizer's stdout directly
    Pipe(PipeSink),
    /// Feeder thread copying stdout into an output stream
    Callback(Feeder),
}

/// One running synthesizer + sink for a language
struct Pipeline {
    profile: VoiceProfile,
    synth: Child,
    stdin: Option<ChildStdin>,
    output: Output,
    json_input: bool,
}

impl Pipeline {
    fn start(synth_cfg: &SynthConfig, player_cfg: &PlayerConfig, profile: VoiceProfile) -> Result<Self> {
        let json_input = player_cfg.sink == SinkKind::Callback;

        let mut synth_cmd = synth_command(synth_cfg, &profile, json_input);
        let player_cmd = player_command(player_cfg, profile.sample_rate);

        tracing::info!(
            language = %profile.language,
            sample_rate = profile.sample_rate,
            sink = %player_cfg.sink,
            synth = ?synth_cmd,
            player = ?player_cmd,
            "starting pipeline"
        );

        let mut synth = synth_cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Process(format!(
                    "failed to start synthesizer {}: {e}",
                    synth_cfg.binary.display()
                ))
            })?;

        if let Some(stderr) = synth.stderr.take() {
            process::drain_stderr("synth", stderr);
        }

        let stdin = synth.stdin.take();
        let Some(stdout) = synth.stdout.take() else {
            process::terminate(&mut synth, "synth", Duration::ZERO);
            return Err(Error::Process("synthesizer stdout unavailable".to_string()));
        };

        let output = match player_cfg.sink {
            SinkKind::Pipe => PipeSink::wired(player_cmd, stdout).map(Output::Pipe),
            SinkKind::Callback => {
                let sample_rate = profile.sample_rate;
                Feeder::spawn(stdout, move || CallbackSink::open(sample_rate)).map(Output::Callback)
            }
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                drop(stdin);
                process::terminate(&mut synth, "synth", SYNTH_GRACE);
                return Err(e);
            }
        };

        tracing::info!(
            language = %profile.language,
            pid = synth.id(),
            "pipeline started (hot)"
        );

        Ok(Self {
            profile,
            synth,
            stdin,
            output,
            json_input,
        })
    }

    fn language(&self) -> &str {
        &self.profile.language
    }

    /// Synthesizer and sink are both still running
    fn is_alive(&mut self) -> bool {
        if !matches!(self.synth.try_wait(), Ok(None)) {
            return false;
        }
        match &mut self.output {
            Output::Pipe(player) => player.is_running(),
            Output::Callback(feeder) => feeder.is_running(),
        }
    }

    /// Write one line to the synthesizer, giving up after `timeout`
    ///
    /// The write runs on a helper thread that owns stdin while it blocks.
    /// On timeout stdin stays with that thread, so the pipeline can only be
    /// torn down; killing the synthesizer unblocks the write.
    fn feed(&mut self, text: &str, timeout: Duration) -> Result<()> {
        if let Some(status) = self.synth.try_wait()? {
            return Err(Error::Process(format!("synthesizer exited with {status}")));
        }

        let line = encode_line(text, self.json_input)?;
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| Error::Process("synthesizer input closed".to_string()))?;

        let (done_tx, done_rx) = mpsc::channel();
        thread::Builder::new()
            .name("tts-writer".to_string())
            .spawn(move || {
                let result = stdin
                    .write_all(line.as_bytes())
                    .and_then(|()| stdin.flush());
                let _ = done_tx.send((stdin, result));
            })?;

        match done_rx.recv_timeout(timeout) {
            Ok((stdin, Ok(()))) => {
                self.stdin = Some(stdin);
                Ok(())
            }
            Ok((_, Err(e))) => Err(Error::Process(format!("synthesizer stdin: {e}"))),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Process(format!(
                "synthesizer stopped accepting input for {}ms",
                timeout.as_millis()
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::Process("synthesizer writer thread died".to_string()))
            }
        }
    }

    /// Release every resource: synthesizer first, then the sink
    fn teardown(mut self) {
        tracing::info!(language = %self.profile.language, "stopping pipeline");

        drop(self.stdin.take());
        process::terminate(&mut self.synth, "synth", SYNTH_GRACE);

        match &mut self.output {
            Output::Pipe(player) => player.close(),
            Output::Callback(feeder) => {
                feeder.stop(FEEDER_JOIN);
            }
        }
    }
}

/// Encode one utterance as a synthesizer input line
///
/// Raw mode sends the text itself; JSON mode wraps it as `{"text": ...}`.
/// Embedded newlines are folded so one request stays one utterance.
fn encode_line(text: &str, json_input: bool) -> Result<String> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if json_input {
        let mut line = serde_json::to_string(&serde_json::json!({ "text": text }))?;
        line.push('\n');
        Ok(line)
    } else {
        Ok(format!("{text}\n"))
    }
}

/// Owns the single active pipeline
pub struct PipelineManager {
    synth: SynthConfig,
    player: PlayerConfig,
    voices: VoiceCatalog,
    active: Option<Pipeline>,
    started: u64,
    feed_timeout: Duration,
}

impl PipelineManager {
    /// Create an idle manager from configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_parts(config.synth.clone(), config.player.clone(), config.voices.clone())
    }

    /// Create an idle manager from its parts
    #[must_use]
    pub const fn with_parts(synth: SynthConfig, player: PlayerConfig, voices: VoiceCatalog) -> Self {
        Self {
            synth,
            player,
            voices,
            active: None,
            started: 0,
            feed_timeout: FEED_TIMEOUT,
        }
    }

    /// Override how long a write to the synthesizer may block
    #[must_use]
    pub const fn feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout = timeout;
        self
    }

    /// Language of the active pipeline, if any
    #[must_use]
    pub fn active_language(&self) -> Option<&str> {
        self.active.as_ref().map(Pipeline::language)
    }

    /// Process id of the active synthesizer
    #[must_use]
    pub fn synth_pid(&self) -> Option<u32> {
        self.active.as_ref().map(|p| p.synth.id())
    }

    /// Number of pipelines started over the manager's lifetime
    #[must_use]
    pub const fn pipelines_started(&self) -> u64 {
        self.started
    }

    /// Known voices
    #[must_use]
    pub const fn voices(&self) -> &VoiceCatalog {
        &self.voices
    }

    /// Make sure a live pipeline for `language` is running
    ///
    /// Reuses the active pipeline when it matches and is alive; a dead one is
    /// dropped right away. Otherwise the voice profile is resolved first, so
    /// a language with missing model files fails without disturbing a live
    /// pipeline; only then is the old pipeline torn down and a new one
    /// started. A spawn failure after teardown leaves the manager idle.
    ///
    /// # Errors
    ///
    /// Returns error if the voice profile is unusable or a process fails to start
    pub fn ensure_pipeline(&mut self, language: &str) -> Result<()> {
        if let Some(active) = self.active.as_mut()
            && active.language() == language
        {
            if active.is_alive() {
                return Ok(());
            }
            tracing::warn!(language, "active pipeline died, rebuilding");
            self.teardown();
        }

        let profile = self.voices.resolve(language).inspect_err(|e| {
            tracing::error!(language, error = %e, "cannot start pipeline");
        })?;

        self.teardown();

        let pipeline = Pipeline::start(&self.synth, &self.player, profile).inspect_err(|e| {
            tracing::error!(language, error = %e, "failed to start pipeline");
        })?;

        self.started += 1;
        self.active = Some(pipeline);
        Ok(())
    }

    /// Write one utterance to the active synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if no pipeline is active, the synthesizer has exited,
    /// or the write fails or stalls past the feed timeout
    pub fn feed(&mut self, text: &str) -> Result<()> {
        let timeout = self.feed_timeout;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::Process("no active pipeline".to_string()))?;
        active.feed(text, timeout)
    }

    /// Speak `text` in `language`
    ///
    /// Unrecognized languages fall back to the default voice. A failed or
    /// stalled write tears the pipeline down so the next call rebuilds it.
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be started or fed
    pub fn speak(&mut self, text: &str, language: &str) -> Result<()> {
        let language = self.voices.normalize(language);
        self.ensure_pipeline(&language)?;

        if let Err(e) = self.feed(text) {
            tracing::warn!(language = %language, error = %e, "feed failed, dropping pipeline");
            self.teardown();
            return Err(e);
        }

        tracing::debug!(language = %language, chars = text.len(), "utterance queued");
        Ok(())
    }

    /// Tear down the active pipeline and return to idle. Idempotent.
    pub fn shutdown(&mut self) {
        if self.active.is_some() {
            self.teardown();
            tracing::info!("pipeline manager idle");
        }
    }

    fn teardown(&mut self) {
        if let Some(pipeline) = self.active.take() {
            pipeline.teardown();
        }
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
