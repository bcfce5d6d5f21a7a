//! MMIO register map for the default machine layout (§6).
//!
//! These addresses are a convention this crate's [crate::Machine] wires
//! up by default, not something [ie_core::bus::MachineBus] enforces —
//! a front end is free to map its chip engines at different offsets.

/// POKEY registers, 10 bytes.
pub const POKEY_BASE: u32 = 0xF0D00;
pub const POKEY_END: u32 = 0xF0D0A;
/// POKEY player control block (ptr, len, ctrl, status, subsong).
pub const POKEY_PLAYER_BASE: u32 = 0xF0D10;
pub const POKEY_PLAYER_END: u32 = 0xF0D1E;

/// SID registers, 29 bytes.
pub const SID_BASE: u32 = 0xF0E00;
pub const SID_END: u32 = 0xF0E1D;
pub const SID_PLAYER_BASE: u32 = 0xF0E20;
pub const SID_PLAYER_END: u32 = 0xF0E2E;

/// TED audio registers, 6 bytes.
pub const TED_BASE: u32 = 0xF0F00;
pub const TED_END: u32 = 0xF0F06;
pub const TED_PLAYER_BASE: u32 = 0xF0F10;
pub const TED_PLAYER_END: u32 = 0xF0F20;
/// TED video registers (4-byte aligned), not owned by this core (§1
/// Out of scope): reserved here only so the address range is not
/// accidentally reused by another region.
pub const TED_VIDEO_BASE: u32 = 0xF0F20;
pub const TED_VIDEO_END: u32 = 0xF0F60;

/// ANTIC/GTIA registers (4-byte aligned); reserved, out of scope.
pub const ANTIC_GTIA_BASE: u32 = 0xF2100;
pub const ANTIC_GTIA_END: u32 = 0xF2140;

/// Program executor control block.
pub const EXEC_BASE: u32 = 0xF2320;
pub const EXEC_END: u32 = 0xF2340;

/// Coprocessor mailbox, shared between the main CPU and every worker,
/// 4 KiB.
pub const MAILBOX_BASE: u32 = 0xF4000;
pub const MAILBOX_SIZE: u32 = 0x1000;
/// Guest-side address the mailbox window appears at inside a worker's
/// own 16-bit address space (§4.5 "default `$2000-$3FFF`").
pub const MAILBOX_GUEST_BASE: u32 = 0x2000;
pub const MAILBOX_GUEST_SIZE: u32 = 0x2000;

/// Per-family worker memory windows on the main bus.
///
/// 6502 and Z80 are windowed through a [ie_core::bus::CoprocessorBusAdapter]
/// (§4.5): their 16-bit guest address space is translated 1:1 onto these
/// ranges, so each window is a full 64 KiB even though the guest binary
/// itself is usually far smaller. IE32/IE64/M68K/X86 address the main
/// bus directly (32-bit, no adapter), so their window only needs to be
/// as large as the largest guest binary this workspace loads.
pub const WORKER_MOS6502_BASE: u32 = 0xF5000;
pub const WORKER_MOS6502_SIZE: u32 = 0x10000;
pub const WORKER_Z80_BASE: u32 = 0x105000;
pub const WORKER_Z80_SIZE: u32 = 0x10000;
pub const WORKER_IE32_BASE: u32 = 0x115000;
pub const WORKER_IE32_SIZE: u32 = 0x8000;

/// Byte offsets, relative to a player's base address, shared by every
/// `*_PLAYER_*` control block (§6 "Control protocol for music-player
/// MMIO").
pub mod player_offset {
    pub const PTR: u32 = 0x00;
    pub const LEN: u32 = 0x04;
    pub const CTRL: u32 = 0x08;
    pub const STATUS: u32 = 0x09;
    pub const SUBSONG: u32 = 0x0A;
}

/// Bits of `*_PLAY_CTRL`.
pub mod play_ctrl_bits {
    pub const START: u8 = 0b001;
    pub const STOP: u8 = 0b010;
    pub const FORCE_LOOP: u8 = 0b100;
}

/// Bits of `*_PLAY_STATUS`.
pub mod play_status_bits {
    pub const BUSY: u8 = 0b01;
    pub const ERROR: u8 = 0b10;
}

/// Byte offsets, relative to [EXEC_BASE], of the Program Executor's
/// registers (§4.6).
pub mod exec_offset {
    pub const NAME_PTR: u32 = 0x00;
    pub const CTRL: u32 = 0x04;
    pub const STATUS: u32 = 0x05;
    pub const TYPE: u32 = 0x06;
    pub const ERROR: u32 = 0x07;
    pub const SESSION: u32 = 0x08;
}
