//! Toy Voice - speech pipeline for a talking toy
//!
//! This library provides:
//! - A persistent TTS daemon that keeps a synthesizer and audio sink hot
//!   per language
//! - A client that talks to the daemon, with a one-shot fallback
//! - The conversation loop (model client, session memory, safety filter)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │        Conversation  │  `toyvoice say`        │
//! └──────────────────────┬────────────────────────┘
//!                        │ SpeechClient
//! ┌──────────────────────▼────────────────────────┐
//! │   Daemon (TCP, line JSON) ─▶ PipelineManager  │
//! └──────────────────────┬────────────────────────┘
//!                        │
//! ┌──────────────────────▼────────────────────────┐
//! │   piper ─▶ aplay/sox   or   piper ─▶ cpal     │
//! └───────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod voice;

pub use client::SpeechClient;
pub use config::Config;
pub use conversation::{Conversation, StdinTranscriber, Transcriber, Voice};
pub use daemon::{Daemon, Speaker};
pub use error::{Error, Result};
pub use voice::{OneShotSynth, PipelineManager, VoiceCatalog, VoiceProfile};
