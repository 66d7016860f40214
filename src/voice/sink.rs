//! Audio sinks for synthesized PCM
//!
//! Two variants share the [`AudioSink`] contract:
//! - [`PipeSink`]: an audio player subprocess (aplay/sox). In the daemon its
//!   stdin is the synthesizer's stdout, so the kernel moves the bytes.
//! - [`CallbackSink`]: a cpal output stream pulling from a sample queue that
//!   a feeder thread fills.
//!
//! Raw audio framing is signed 16-bit little-endian mono at the voice
//! profile's sample rate.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::process;
use crate::{Error, Result};

/// Grace period before a player process is killed
const PLAYER_GRACE: Duration = Duration::from_secs(1);

/// How synthesized audio reaches the speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Synthesizer stdout wired into a player subprocess
    Pipe,
    /// Feeder thread writing into a streaming output device
    Callback,
}

impl SinkKind {
    /// Sink used by default on the build target
    #[must_use]
    pub const fn for_target() -> Self {
        if cfg!(windows) { Self::Callback } else { Self::Pipe }
    }
}

impl FromStr for SinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pipe" => Ok(Self::Pipe),
            "callback" | "stream" => Ok(Self::Callback),
            other => Err(Error::Config(format!("unknown sink kind: {other}"))),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => write!(f, "pipe"),
            Self::Callback => write!(f, "callback"),
        }
    }
}

/// Destination for raw PCM chunks
pub trait AudioSink {
    /// Queue a chunk of S16_LE bytes for playback
    ///
    /// # Errors
    ///
    /// Returns error if the sink can no longer accept audio
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Stop playback and release the device. Idempotent.
    fn close(&mut self);
}

/// Audio player subprocess
pub struct PipeSink {
    child: Child,
    stdin: Option<ChildStdin>,
    closed: bool,
}

impl PipeSink {
    /// Start a player whose stdin is the synthesizer's stdout
    ///
    /// Writes through [`AudioSink::write`] are rejected; audio flows
    /// through the kernel pipe.
    ///
    /// # Errors
    ///
    /// Returns error if the player cannot be spawned
    pub fn wired(cmd: Command, upstream: ChildStdout) -> Result<Self> {
        Self::start(cmd, Stdio::from(upstream))
    }

    /// Start a player that reads audio written through this sink
    ///
    /// # Errors
    ///
    /// Returns error if the player cannot be spawned
    pub fn spawn(cmd: Command) -> Result<Self> {
        Self::start(cmd, Stdio::piped())
    }

    fn start(mut cmd: Command, stdin: Stdio) -> Result<Self> {
        let mut child = cmd
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Process(format!(
                    "failed to start player {}: {e}",
                    cmd.get_program().to_string_lossy()
                ))
            })?;

        if let Some(stderr) = child.stderr.take() {
            process::drain_stderr("player", stderr);
        }

        tracing::debug!(pid = child.id(), "player started");

        let stdin = child.stdin.take();
        Ok(Self {
            child,
            stdin,
            closed: false,
        })
    }

    /// OS process id of the player
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Whether the player process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl AudioSink for PipeSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Audio("player input is wired to the synthesizer".to_string()))?;
        stdin.write_all(chunk)?;
        stdin.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        drop(self.stdin.take());
        process::terminate(&mut self.child, "player", PLAYER_GRACE);
    }
}

impl Drop for PipeSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shared queue between the writer and the device callback
type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Streaming output device fed from a sample queue
///
/// The cpal stream is not `Send` on every host, so a `CallbackSink` lives
/// on the thread that opened it.
pub struct CallbackSink {
    stream: Option<cpal::Stream>,
    queue: SampleQueue,
    sample_rate: u32,
    carry: Option<u8>,
}

impl CallbackSink {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no device or suitable config is available
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
                && c.sample_format() == cpal::SampleFormat::F32
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: stereo, mono duplicated into both channels
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();
        let channels = usize::from(config.channels);

        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let callback_queue = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = callback_queue.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio output stream error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "output stream opened"
        );

        Ok(Self {
            stream: Some(stream),
            queue,
            sample_rate,
            carry: None,
        })
    }

    /// Queue decoded samples
    ///
    /// # Errors
    ///
    /// Returns error if the stream was closed
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("output stream closed".to_string()));
        }
        let mut queue = self
            .queue
            .lock()
            .map_err(|e| Error::Audio(format!("sample queue poisoned: {e}")))?;
        queue.extend(samples);
        Ok(())
    }

    /// Samples waiting to be played
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.queue.lock().map_or(0, |q| q.len())
    }

    /// Block until queued audio has played, or `timeout` passes
    pub fn drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.buffered() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Sample rate the stream was opened at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioSink for CallbackSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let samples = decode_s16le(&mut self.carry, chunk);
        self.push_samples(&samples)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if let Ok(mut queue) = self.queue.lock() {
                queue.clear();
            }
            tracing::debug!("output stream closed");
        }
    }
}

impl Drop for CallbackSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decode S16_LE bytes to f32 samples
///
/// A trailing odd byte is kept in `carry` and joined with the next chunk,
/// since pipe reads do not respect sample boundaries.
pub fn decode_s16le(carry: &mut Option<u8>, chunk: &[u8]) -> Vec<f32> {
    let mut bytes = chunk;
    let mut samples = Vec::with_capacity(chunk.len() / 2 + 1);

    if let Some(low) = carry.take() {
        match bytes.split_first() {
            Some((&high, rest)) => {
                samples.push(f32::from(i16::from_le_bytes([low, high])) / 32768.0);
                bytes = rest;
            }
            None => {
                *carry = Some(low);
                return samples;
            }
        }
    }

    let mut pairs = bytes.chunks_exact(2);
    samples.extend(
        pairs
            .by_ref()
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0),
    );
    *carry = pairs.remainder().first().copied();

    samples
}
