//! The Intuition Engine sound chip: a four-channel polyphonic
//! softsynth with ADSR envelopes, per-channel and global state-variable
//! filters, Schroeder reverb, soft-clip overdrive and PWM.
//!
//! Chip-specific register front ends (PSG, SID, POKEY, TED, AHX) live
//! in `ie-peripherals` and translate legacy register writes into calls
//! against the [synth::SoundChip] and [channel::SoundChannel] types
//! defined here.

pub mod channel;
pub mod envelope;
pub mod filter;
pub mod host;
pub mod reverb;
pub mod synth;
pub mod wave;
