//! Speech client - sends speak requests to the daemon
//!
//! Falls back to one-shot synthesis when the daemon is unreachable, unless
//! daemon-only mode is set.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::daemon::{Reply, SpeakRequest};
use crate::voice::OneShotSynth;
use crate::{Config, Error, Result};

/// How long to wait for the daemon to accept a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the daemon's reply
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the TTS daemon
#[derive(Debug, Clone)]
pub struct SpeechClient {
    addr: String,
    daemon_only: bool,
    fallback: OneShotSynth,
}

impl SpeechClient {
    /// Create a client from configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            config.daemon.addr(),
            config.daemon.required,
            OneShotSynth::new(config),
        )
    }

    /// Create a client from parts
    #[must_use]
    pub fn with_parts(addr: impl Into<String>, daemon_only: bool, fallback: OneShotSynth) -> Self {
        Self {
            addr: addr.into(),
            daemon_only,
            fallback,
        }
    }

    /// Refuse to fall back when the daemon is unreachable
    #[must_use]
    pub const fn daemon_only(mut self, daemon_only: bool) -> Self {
        self.daemon_only = daemon_only;
        self
    }

    /// Speak `text` in `language`
    ///
    /// Empty text succeeds without contacting anything.
    ///
    /// # Errors
    ///
    /// Returns error if the daemon rejects the request, the daemon is
    /// unreachable in daemon-only mode, or the fallback synthesis fails
    pub async fn speak(&self, text: &str, language: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(e) if self.daemon_only => {
                return Err(Error::Daemon(format!(
                    "daemon unreachable at {}: {e}",
                    self.addr
                )));
            }
            Err(e) => {
                tracing::warn!(addr = %self.addr, error = %e, "daemon unreachable, using one-shot synthesis");
                return self.speak_direct(text, language).await;
            }
        };

        let reply = Self::exchange(stream, &SpeakRequest::new(text, language)).await?;
        if reply.ok {
            Ok(())
        } else {
            let code = reply
                .error
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            Err(Error::Daemon(format!("daemon refused request: {code}")))
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::Daemon("connect timed out".to_string()))?
            .map_err(Error::from)
    }

    async fn exchange(mut stream: TcpStream, request: &SpeakRequest) -> Result<Reply> {
        let line = request.to_line()?;

        let exchange = async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await?;

            let mut reader = BufReader::new(stream);
            let mut reply = String::new();
            reader.read_line(&mut reply).await?;
            Ok::<_, Error>(reply)
        };

        let reply = tokio::time::timeout(REPLY_TIMEOUT, exchange)
            .await
            .map_err(|_| Error::Daemon("timed out waiting for reply".to_string()))??;

        if reply.trim().is_empty() {
            return Err(Error::Daemon("daemon closed without replying".to_string()));
        }
        Reply::parse(&reply)
    }

    async fn speak_direct(&self, text: &str, language: &str) -> Result<()> {
        let fallback = self.fallback.clone();
        let text = text.to_string();
        let language = language.to_string();

        tokio::task::spawn_blocking(move || fallback.speak(&text, &language))
            .await
            .map_err(|e| Error::Process(format!("one-shot synthesis task failed: {e}")))?
    }
}
