//! Line-delimited JSON protocol spoken on the daemon socket
//!
//! Request: `{"text": "...", "language": "en"}\n`
//! Reply:   `{"ok": true}\n` or `{"ok": false, "error": "no_text"}\n`

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// Largest request line accepted
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Bytes pulled from the socket per read
const READ_CHUNK: usize = 4096;

/// Language assumed when a request does not name one
const DEFAULT_REQUEST_LANGUAGE: &str = "en";

/// Speak request as sent on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl SpeakRequest {
    /// Build a request
    #[must_use]
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            language: Some(language.into()),
        }
    }

    /// Encode as one protocol line
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Failure codes carried in a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Nothing but whitespace before the newline
    Empty,
    /// Request had no text to speak
    NoText,
    /// The pipeline could not speak the text
    SpeakFailed,
    /// Malformed request or server-side failure
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Empty => "empty",
            Self::NoText => "no_text",
            Self::SpeakFailed => "speak_failed",
            Self::Internal => "internal",
        };
        f.write_str(code)
    }
}

/// Reply sent for every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl Reply {
    /// Success reply
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    /// Failure reply
    #[must_use]
    pub const fn err(code: ErrorCode) -> Self {
        Self {
            ok: false,
            error: Some(code),
        }
    }

    /// Encode as one protocol line
    #[must_use]
    pub fn to_line(&self) -> String {
        // Two plain fields; serialization cannot fail
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"internal"}"#.to_string());
        line.push('\n');
        line
    }

    /// Parse a reply line
    ///
    /// # Errors
    ///
    /// Returns error if the line is not a valid reply
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Protocol(format!("invalid reply {:?}: {e}", line.trim())))
    }
}

/// A validated speak request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
}

/// Read bytes until a newline or end of stream
///
/// Returns `None` when the peer closed without sending anything. Bytes
/// after the first newline are discarded.
///
/// # Errors
///
/// Returns error on I/O failure or when the line exceeds [`MAX_REQUEST_BYTES`]
pub async fn read_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        data.extend_from_slice(&chunk[..n]);

        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            data.truncate(pos);
            return Ok(Some(data));
        }

        if data.len() > MAX_REQUEST_BYTES {
            return Err(Error::Protocol(format!(
                "request exceeds {MAX_REQUEST_BYTES} bytes"
            )));
        }
    }

    if data.is_empty() { Ok(None) } else { Ok(Some(data)) }
}

/// Validate a request line
///
/// # Errors
///
/// Returns the failure code to reply with
pub fn decode(line: &[u8]) -> std::result::Result<Utterance, ErrorCode> {
    let msg = String::from_utf8_lossy(line);
    let msg = msg.trim();
    if msg.is_empty() {
        return Err(ErrorCode::Empty);
    }

    let request: SpeakRequest = serde_json::from_str(msg).map_err(|e| {
        tracing::debug!(error = %e, "malformed request");
        ErrorCode::Internal
    })?;

    let text = request.text.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err(ErrorCode::NoText);
    }

    let language = request
        .language
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_REQUEST_LANGUAGE.to_string());

    Ok(Utterance { text, language })
}
