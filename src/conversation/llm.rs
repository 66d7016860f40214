//! HTTP client for the upstream language-model server

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Request timeout for one model turn
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body posted to the model server
#[derive(Debug, Clone, Serialize)]
pub struct TalkRequest<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<&'a str>,
    pub reset: bool,
}

/// Model server reply
#[derive(Debug, Clone, Deserialize)]
pub struct TalkReply {
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Client for the `/talk` endpoint
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    url: String,
}

impl LlmClient {
    /// Create a client for `url`
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            url: url.into(),
        }
    }

    /// Endpoint this client posts to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one user turn and return the model's reply
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, the server answers with a
    /// non-success status, or the body is not a valid reply
    pub async fn talk(&self, request: &TalkRequest<'_>) -> Result<TalkReply> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request to {} failed: {e}", self.url)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("server returned {status}: {body}")));
        }

        let mut reply: TalkReply = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("invalid reply: {e}")))?;

        reply.reply = reply.reply.trim().to_string();
        Ok(reply)
    }
}

/// Minimal one-request HTTP server for tests
#[cfg(test)]
pub(crate) mod testing {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one response with `status` and a JSON `body`; returns the URL
    pub(crate) async fn http_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/talk", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // Request bodies are JSON objects; read until the closing brace
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.ends_with(b"}") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        url
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::testing::http_once;
    use super::*;

    fn request() -> TalkRequest<'static> {
        TalkRequest {
            text: "hello",
            language: "en",
            session_id: "abc",
            user_name: None,
            reset: false,
        }
    }

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["reset"], false);
        assert!(json.get("user_name").is_none());
    }

    #[test]
    fn test_reply_tolerates_missing_fields() {
        let reply: TalkReply = serde_json::from_str("{}").unwrap();
        assert!(reply.reply.is_empty());
        assert!(reply.session_id.is_none());
    }

    #[tokio::test]
    async fn test_talk_success() {
        let url = http_once("200 OK", r#"{"reply":"  hi there ","session_id":"abc"}"#).await;
        let reply = LlmClient::new(url).talk(&request()).await.unwrap();

        assert_eq!(reply.reply, "hi there");
        assert_eq!(reply.session_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_talk_server_error() {
        let url = http_once("503 Service Unavailable", r#"{"reply":"down"}"#).await;
        let err = LlmClient::new(url).talk(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Llm(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_talk_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/talk", listener.local_addr().unwrap());
        drop(listener);

        assert!(matches!(
            LlmClient::new(url).talk(&request()).await,
            Err(Error::Llm(_))
        ));
    }
}
