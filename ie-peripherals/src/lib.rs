//! Register-level chip engines translating legacy sound chip writes
//! into Intuition Engine [ie_audio::synth::SoundChip] channel state.

pub mod ahx;
pub mod engine;
pub mod pokey;
pub mod psg;
pub mod sid;
pub mod ted;
