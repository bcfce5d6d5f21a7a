//! Complementary runtime helpers for the Intuition Engine emulation
//! substrate, kept separate from `ie-core` so the core stays
//! backend-agnostic (§2 "Runtime Helpers").
//!
//! Three concerns live here: [runner] maps a [ie_core::chip::CpuKind] to
//! a factory that produces a fresh [ie_core::chip::GuestCpu] instance
//! (real decoders are external collaborators; this crate only holds the
//! registry a front end populates them into), and [reload] provides the
//! closure-based "read from a lazily acquired source" convention used
//! when a program or chiptune file is reloaded without re-deriving its
//! path.

pub mod reload;
pub mod runner;
