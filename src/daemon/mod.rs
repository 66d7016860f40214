//! TTS daemon - serves speak requests over a local TCP socket
//!
//! Each connection gets its own task. All tasks funnel into one
//! [`Speaker`] behind a mutex, so pipeline switches never interleave.

pub mod protocol;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::voice::PipelineManager;
use crate::{Config, Error, Result};

pub use protocol::{ErrorCode, MAX_REQUEST_BYTES, Reply, SpeakRequest, Utterance};

/// Per-connection read timeout
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection write timeout
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can speak text in a language
///
/// Implemented by [`PipelineManager`]; tests plug in their own.
pub trait Speaker: Send + 'static {
    /// Speak `text` in `language`
    ///
    /// # Errors
    ///
    /// Returns error if the text could not be handed to the audio pipeline
    fn speak(&mut self, text: &str, language: &str) -> Result<()>;

    /// Get ready to speak `language` without saying anything
    ///
    /// # Errors
    ///
    /// Returns error if the language cannot be prepared
    fn prepare(&mut self, language: &str) -> Result<()>;

    /// Release every resource
    fn shutdown(&mut self);
}

impl Speaker for PipelineManager {
    fn speak(&mut self, text: &str, language: &str) -> Result<()> {
        Self::speak(self, text, language)
    }

    fn prepare(&mut self, language: &str) -> Result<()> {
        let language = self.voices().normalize(language);
        self.ensure_pipeline(&language)
    }

    fn shutdown(&mut self) {
        Self::shutdown(self);
    }
}

/// Speaker shared by every connection task
pub type SharedSpeaker<S> = Arc<Mutex<S>>;

fn lock<S>(speaker: &Mutex<S>) -> MutexGuard<'_, S> {
    speaker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The TTS daemon
pub struct Daemon<S: Speaker = PipelineManager> {
    speaker: SharedSpeaker<S>,
    addr: String,
    prestart: Option<String>,
}

impl Daemon {
    /// Create a daemon around a fresh pipeline manager
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_speaker(PipelineManager::new(config), config.daemon.addr())
            .prestart(config.daemon.prestart_language.clone())
    }
}

impl<S: Speaker> Daemon<S> {
    /// Create a daemon around any speaker
    #[must_use]
    pub fn with_speaker(speaker: S, addr: impl Into<String>) -> Self {
        Self {
            speaker: Arc::new(Mutex::new(speaker)),
            addr: addr.into(),
            prestart: None,
        }
    }

    /// Language to warm up before accepting connections
    #[must_use]
    pub fn prestart(mut self, language: Option<String>) -> Self {
        self.prestart = language.filter(|l| !l.trim().is_empty());
        self
    }

    /// Handle to the shared speaker
    #[must_use]
    pub fn speaker(&self) -> SharedSpeaker<S> {
        Arc::clone(&self.speaker)
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| Error::Daemon(format!("failed to bind {}: {e}", self.addr)))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve connections on `listener` until `shutdown` resolves
    ///
    /// The active pipeline is torn down before this returns.
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let local = listener.local_addr()?;

        if let Some(language) = self.prestart.clone() {
            self.warm_up(language).await;
        }

        tracing::info!(addr = %local, "tts daemon listening");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "connection accepted");
                        let speaker = Arc::clone(&self.speaker);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, speaker).await {
                                tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }

        let speaker = Arc::clone(&self.speaker);
        if tokio::task::spawn_blocking(move || lock(&speaker).shutdown())
            .await
            .is_err()
        {
            tracing::warn!("speaker shutdown panicked");
        }

        tracing::info!("tts daemon stopped");
        Ok(())
    }

    async fn warm_up(&self, language: String) {
        tracing::info!(language = %language, "pre-warming pipeline");

        let speaker = Arc::clone(&self.speaker);
        let result = tokio::task::spawn_blocking(move || lock(&speaker).prepare(&language)).await;

        match result {
            Ok(Ok(())) => tracing::info!("pipeline pre-warmed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "pre-warm failed, continuing"),
            Err(e) => tracing::warn!(error = %e, "pre-warm task failed, continuing"),
        }
    }
}

/// Serve one request on a connection
///
/// Reads a single line, speaks it and writes one reply. A peer that closes
/// without sending anything gets no reply.
///
/// # Errors
///
/// Returns error if the reply cannot be written
pub async fn handle_connection<IO, S>(mut stream: IO, speaker: SharedSpeaker<S>) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: Speaker,
{
    let reply = match tokio::time::timeout(READ_TIMEOUT, protocol::read_line(&mut stream)).await {
        Ok(Ok(None)) => return Ok(()),
        Ok(Ok(Some(line))) => respond(&line, speaker).await,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to read request");
            Reply::err(ErrorCode::Internal)
        }
        Err(_) => {
            tracing::warn!("request read timed out");
            Reply::err(ErrorCode::Internal)
        }
    };

    let line = reply.to_line();
    tokio::time::timeout(WRITE_TIMEOUT, async {
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| Error::Daemon("reply write timed out".to_string()))??;

    Ok(())
}

async fn respond<S: Speaker>(line: &[u8], speaker: SharedSpeaker<S>) -> Reply {
    let Utterance { text, language } = match protocol::decode(line) {
        Ok(utterance) => utterance,
        Err(code) => {
            tracing::debug!(code = %code, "rejected request");
            return Reply::err(code);
        }
    };

    tracing::info!(language = %language, chars = text.len(), "speak request");

    let result = tokio::task::spawn_blocking(move || lock(&speaker).speak(&text, &language)).await;

    match result {
        Ok(Ok(())) => Reply::ok(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "speak failed");
            Reply::err(ErrorCode::SpeakFailed)
        }
        Err(e) => {
            tracing::error!(error = %e, "speak task failed");
            Reply::err(ErrorCode::Internal)
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
