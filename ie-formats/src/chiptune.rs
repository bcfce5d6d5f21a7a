//! The chiptune header contract consumed by the Music Player (§4.4).
//!
//! Byte-level parsing of SAP/SNDH/TED/AHX containers is an external
//! collaborator (§1 Out of scope: "we specify only what they produce");
//! this module is that specification. [ChiptuneHeader] is the metadata
//! shape every format-specific parser in this crate produces, and
//! [ChiptuneFormat::detect] is the only piece every loader needs before
//! handing bytes to the matching parser.

use thiserror::Error;

/// The chiptune container families the Music Player can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChiptuneFormat {
    Sid,
    Sap,
    Sndh,
    Ted,
    Ahx,
}

impl ChiptuneFormat {
    /// Sniffs a format from leading magic bytes. Order matters only in
    /// that SID's four-byte magic is checked first since it is the
    /// cheapest and most common case in this workspace's own tests.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() >= 4 && (&data[0..4] == b"PSID" || &data[0..4] == b"RSID") {
            return Some(ChiptuneFormat::Sid);
        }
        if data.len() >= 4 && &data[0..4] == b"SAP\r" {
            return Some(ChiptuneFormat::Sap);
        }
        if memchr::memmem::find(&data[..data.len().min(16)], b"SNDH").is_some() {
            return Some(ChiptuneFormat::Sndh);
        }
        if data.len() >= 4 && &data[0..4] == b"TMC1" {
            return Some(ChiptuneFormat::Ted);
        }
        if data.len() >= 3 && &data[0..3] == b"THX" {
            return Some(ChiptuneFormat::Ahx);
        }
        None
    }
}

/// PAL/NTSC tick rate policy for chip engines that have no authoritative
/// timer value of their own (Design Notes §9, "CIA timer in SID"). This
/// is a declared default, not a derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickRate {
    Pal,
    Ntsc,
}

impl TickRate {
    pub fn hz(self) -> f64 {
        match self {
            TickRate::Pal => 50.0,
            TickRate::Ntsc => 60.0,
        }
    }
}

/// The metadata a chiptune format parser hands to the Music Player's
/// load path (§4.4 "Load path").
#[derive(Clone, Debug)]
pub struct ChiptuneHeader {
    pub format: ChiptuneFormat,
    /// Address the embedded binary is copied to before INIT runs.
    pub load_address: u16,
    pub init_address: u16,
    /// `0` means the format has no explicit PLAY entry and relies on
    /// interrupt-mode playback instead (§4.4 render loop, step 2).
    pub play_address: u16,
    pub songs: u16,
    pub start_song: u16,
    pub tick_rate: TickRate,
    pub name: String,
    pub author: String,
    pub released: String,
    /// Byte offset in the source file where the embedded binary begins.
    pub data_offset: usize,
}

/// Failures a format-specific parser can raise while reading a header.
///
/// Surfaced by the Music Player's load path as `InvalidFile` (§4.4).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    #[error("file is too short to contain a {0:?} header")]
    Truncated(ChiptuneFormat),
    #[error("magic bytes do not match a known chiptune container")]
    UnknownMagic,
    #[error("{field} is out of range in a {format:?} header")]
    OutOfRange { format: ChiptuneFormat, field: &'static str },
    #[error("header string at offset {offset} is not valid UTF-8/Latin-1 text")]
    InvalidString { offset: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_psid_and_rsid_magic() {
        assert_eq!(ChiptuneFormat::detect(b"PSIDxxxx"), Some(ChiptuneFormat::Sid));
        assert_eq!(ChiptuneFormat::detect(b"RSIDxxxx"), Some(ChiptuneFormat::Sid));
    }

    #[test]
    fn unknown_magic_detects_nothing() {
        assert_eq!(ChiptuneFormat::detect(b"\0\0\0\0\0\0\0\0"), None);
    }

    #[test]
    fn tick_rate_hz_matches_broadcast_standards() {
        assert_eq!(TickRate::Pal.hz(), 50.0);
        assert_eq!(TickRate::Ntsc.hz(), 60.0);
    }
}
