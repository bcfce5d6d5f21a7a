//! Intuition Engine: a cycle-oriented emulation substrate integrating
//! heterogeneous guest CPUs against a shared memory-mapped bus carrying
//! audio chips, video chips, chiptune players, coprocessor workers and
//! a program loader (§1, §2).
//!
//! This crate is the top-level facade: it wires the building blocks
//! defined in `ie-core` (bus, chip/video traits, compositor),
//! `ie-audio` (the softsynth), `ie-formats` (file-type/header parsing)
//! and `ie-peripherals` (the legacy chip register front ends) into one
//! [Machine] struct, replacing the `chip` benchmark global and the
//! `activeFrontend` global the original carried (Design Notes §9
//! "Global mutable state"). A front end constructs one [Machine],
//! registers whatever real CPU decoders it links in with
//! [Machine::runner_factory], and drives it from there; tests construct
//! their own instances freely.

#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "peripherals")]
pub mod exec;
#[cfg(feature = "peripherals")]
pub mod mmio;
#[cfg(feature = "peripherals")]
pub mod player;
#[cfg(feature = "peripherals")]
pub mod worker;

#[cfg(feature = "peripherals")]
mod machine;

#[cfg(feature = "peripherals")]
pub use machine::{Machine, MachineConfig, MachineError, PlayerRegsSnapshot};

pub use ie_core::bus::{BusError, MachineBus};
pub use ie_core::chip::{CpuKind, GuestCpu};
pub use ie_core::clock::ByteOrderMode;
