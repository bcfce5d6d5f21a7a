//! Audio output host abstraction. The synth itself is host-agnostic;
//! anything implementing [AudioOutput] can drive it (§4.2 "Audio host").

#[cfg(feature = "cpal")]
pub mod cpal_host;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to query default output config: {0}")]
    ConfigQuery(String),
    #[error("failed to build output stream: {0}")]
    StreamBuild(String),
    #[error("failed to start output stream: {0}")]
    StreamStart(String),
}

/// A running audio output stream. Dropping it stops playback.
pub trait AudioOutput: Send {
    fn sample_rate(&self) -> u32;
    fn pause(&mut self) -> Result<(), HostError>;
    fn resume(&mut self) -> Result<(), HostError>;
}
