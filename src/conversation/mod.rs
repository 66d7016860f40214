//! Conversation loop - listen, ask the model, speak the reply
//!
//! The loop is generic over where speech comes from ([`Transcriber`]) and
//! where replies go ([`Voice`]), so the push-to-talk hardware and the
//! recognizer stay outside this crate.

mod llm;
mod memory;
mod safety;
mod settings;
mod transcript;

use std::future::Future;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub use llm::{LlmClient, TalkReply, TalkRequest};
pub use memory::{MemoryEntry, Role, SessionStore};
pub use safety::{SafetyFilter, refusal};
pub use settings::{Settings, SettingsStore};
pub use transcript::{Transcript, TranscriptLine};

use crate::config::ConversationConfig;
use crate::{Result, SpeechClient};

/// Source of recognized speech
pub trait Transcriber: Send {
    /// Wait for the next utterance
    ///
    /// `Ok(None)` means input has ended; an empty string means nothing
    /// was heard.
    fn listen(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Sink for spoken replies
pub trait Voice: Send + Sync {
    fn say(&self, text: &str, language: &str) -> impl Future<Output = Result<()>> + Send;
}

impl Voice for SpeechClient {
    fn say(&self, text: &str, language: &str) -> impl Future<Output = Result<()>> + Send {
        self.speak(text, language)
    }
}

/// Reads one utterance per line from standard input
pub struct StdinTranscriber {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinTranscriber {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for StdinTranscriber {
    async fn listen(&mut self) -> Result<Option<String>> {
        let line = self.lines.next_line().await?;
        Ok(line.map(|l| l.trim().to_string()))
    }
}

/// Language named in a spoken answer, if any
#[must_use]
pub fn detect_language_word(text: &str) -> Option<&'static str> {
    let text = text.trim().to_lowercase();
    if ["german", "deutsch"].iter().any(|w| text.contains(w)) {
        Some("de")
    } else if ["english", "englisch"].iter().any(|w| text.contains(w)) {
        Some("en")
    } else {
        None
    }
}

fn apology(language: &str) -> &'static str {
    match language {
        "de" => "Entschuldigung, ich konnte den KI-Server nicht erreichen.",
        _ => "Sorry, I couldn't reach the AI server.",
    }
}

const LANGUAGE_PROMPT: &str = "Hello! What language should I use: German or English?";
const HEARD_NOTHING: &str = "I didn't hear anything. Please try again and say German or English.";
const NOT_UNDERSTOOD: &str = "Sorry, I didn't understand. Please say German or English.";

fn language_confirmation(language: &str) -> &'static str {
    match language {
        "de" => "Okay, dann spreche ich nun Deutsch.",
        _ => "Okay, I will continue to speak English.",
    }
}

/// One child's conversation with the toy
pub struct Conversation<T, V> {
    transcriber: T,
    voice: V,
    llm: LlmClient,
    memory: SessionStore,
    safety: SafetyFilter,
    settings_store: SettingsStore,
    settings: Settings,
    transcript: Transcript,
    session_id: String,
    reset_pending: bool,
}

impl<T: Transcriber, V: Voice> Conversation<T, V> {
    /// Set up a conversation from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the blocked word list is invalid or the session id
    /// cannot be created
    pub fn new(config: &ConversationConfig, transcriber: T, voice: V) -> Result<Self> {
        let settings_store = SettingsStore::new(&config.data_dir);
        let settings = settings_store.load();
        let session_id = settings_store.session_id()?;

        tracing::debug!(
            session = %session_id,
            language = ?settings.language,
            llm = %config.llm_url,
            "conversation ready"
        );

        Ok(Self {
            transcriber,
            voice,
            llm: LlmClient::new(config.llm_url.clone()),
            memory: SessionStore::new(&config.memory_dir, config.max_turns),
            safety: SafetyFilter::new(&config.blocked_words)?,
            settings_store,
            settings,
            transcript: Transcript::new(config.data_dir.join("conversation_log.jsonl")),
            session_id,
            reset_pending: false,
        })
    }

    /// Language replies are spoken in
    #[must_use]
    pub fn language(&self) -> &str {
        self.settings
            .language
            .as_deref()
            .unwrap_or(crate::voice::DEFAULT_LANGUAGE)
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ask until the child names a language; `None` if input ends first
    ///
    /// # Errors
    ///
    /// Returns error if listening fails or the choice cannot be saved
    pub async fn choose_language(&mut self) -> Result<Option<&'static str>> {
        self.say(LANGUAGE_PROMPT, "en").await;

        loop {
            let Some(heard) = self.transcriber.listen().await? else {
                return Ok(None);
            };

            if heard.trim().is_empty() {
                self.say(HEARD_NOTHING, "en").await;
                continue;
            }

            let Some(language) = detect_language_word(&heard) else {
                self.say(NOT_UNDERSTOOD, "en").await;
                continue;
            };

            self.say(language_confirmation(language), language).await;

            self.settings.language = Some(language.to_string());
            self.settings_store.save(&self.settings)?;
            tracing::info!(language, "language selected");
            return Ok(Some(language));
        }
    }

    /// Start a fresh session; the next model request asks for a reset
    ///
    /// # Errors
    ///
    /// Returns error if the new session id cannot be stored
    pub fn reset(&mut self) -> Result<()> {
        self.memory.clear(&self.session_id)?;
        self.session_id = self.settings_store.new_session()?;
        self.reset_pending = true;
        Ok(())
    }

    /// Handle one user utterance and return what was spoken back
    ///
    /// Model failures produce a spoken apology rather than an error.
    ///
    /// # Errors
    ///
    /// Returns error if memory or the transcript cannot be written
    pub async fn turn(&mut self, text: &str) -> Result<String> {
        let language = self.language().to_string();

        let reply = if let Some(word) = self.safety.find(text) {
            tracing::info!(word, "blocked user input");
            refusal(&language).to_string()
        } else {
            self.memory
                .append(&self.session_id, &MemoryEntry::now(Role::User, text, &language))?;

            let reply = self.ask(text, &language).await;

            if let Some(word) = self.safety.find(&reply) {
                tracing::info!(word, "blocked model reply");
                refusal(&language).to_string()
            } else {
                reply
            }
        };

        if !reply.is_empty() {
            self.memory.append(
                &self.session_id,
                &MemoryEntry::now(Role::Assistant, &reply, &language),
            )?;
            self.say(&reply, &language).await;
        }

        self.transcript.record(&TranscriptLine {
            lang: language,
            input: text.to_string(),
            reply: reply.clone(),
        })?;

        Ok(reply)
    }

    /// Run until input ends
    ///
    /// # Errors
    ///
    /// Returns error if listening fails or state cannot be persisted
    pub async fn run(&mut self) -> Result<()> {
        if self.settings.language.is_none() && self.choose_language().await?.is_none() {
            return Ok(());
        }

        tracing::info!(language = %self.language(), "conversation started");

        while let Some(heard) = self.transcriber.listen().await? {
            if heard.trim().is_empty() {
                tracing::debug!("no speech detected");
                continue;
            }

            tracing::info!(input = %heard, "heard");
            let reply = self.turn(&heard).await?;
            tracing::info!(reply = %reply, "replied");
        }

        tracing::info!("input ended");
        Ok(())
    }

    async fn ask(&mut self, text: &str, language: &str) -> String {
        let request = TalkRequest {
            text,
            language,
            session_id: &self.session_id,
            user_name: self.settings.user_name.as_deref(),
            reset: self.reset_pending,
        };

        match self.llm.talk(&request).await {
            Ok(reply) => {
                self.reset_pending = false;
                if let Some(id) = reply.session_id
                    && !id.is_empty()
                    && id != self.session_id
                {
                    tracing::debug!(session = %id, "server assigned session");
                    if let Err(e) = self.settings_store.save_session(&id) {
                        tracing::warn!(error = %e, "failed to persist session id");
                    }
                    self.session_id = id;
                }
                reply.reply
            }
            Err(e) => {
                tracing::error!(error = %e, "model request failed");
                apology(language).to_string()
            }
        }
    }

    async fn say(&self, text: &str, language: &str) {
        if let Err(e) = self.voice.say(text, language).await {
            tracing::error!(error = %e, "failed to speak");
        }
    }
}
