//! Voice synthesis and playback
//!
//! The [`PipelineManager`] keeps a piper process and an audio sink hot for
//! the active language. [`OneShotSynth`] is the cold path used when the
//! daemon is unreachable.

mod feeder;
mod oneshot;
mod pipeline;
pub mod process;
mod profile;
mod sink;

pub use feeder::{CHUNK_SIZE, Feeder};
pub use oneshot::{FlagStyle, OneShotSynth};
pub use pipeline::{FEED_TIMEOUT, PipelineManager};
pub use profile::{
    DEFAULT_LANGUAGE, DEFAULT_SAMPLE_RATE, VoiceCatalog, VoiceProfile, base_code,
    companion_config, read_sample_rate,
};
pub use sink::{AudioSink, CallbackSink, PipeSink, SinkKind, decode_s16le};
