//! File-type detection for the Intuition Engine emulation substrate.
//!
//! Two concerns live here: [exec_format] maps a guest executable's file
//! extension to the [ie_core::chip::CpuKind] the Program Executor should
//! launch (§4.6), and [chiptune] plus its per-format modules specify the
//! metadata a chiptune container parser hands to the Music Player's load
//! path (§4.4). Deep byte-level parsing of every chiptune container is
//! explicitly out of scope (§1); SID is parsed to full fidelity because
//! it is exercised by this workspace's own tests, the rest to the
//! simplified shape the spec asks for.

pub mod ahx_file;
pub mod chiptune;
pub mod exec_format;
pub mod sap_file;
pub mod sid_file;
pub mod sndh_file;
pub mod ted_file;

use chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError};

/// Detects a chiptune container's format and parses its header in one
/// step. The synchronous portion of the Music Player's load path (§4.4
/// "Load path") calls exactly this.
pub fn parse_chiptune(data: &[u8]) -> Result<ChiptuneHeader, FormatError> {
    match ChiptuneFormat::detect(data).ok_or(FormatError::UnknownMagic)? {
        ChiptuneFormat::Sid => sid_file::parse(data),
        ChiptuneFormat::Sap => sap_file::parse(data),
        ChiptuneFormat::Sndh => sndh_file::parse(data),
        ChiptuneFormat::Ted => ted_file::parse(data),
        ChiptuneFormat::Ahx => ahx_file::parse(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_to_the_matching_format_parser() {
        let mut psid = vec![0u8; 0x76];
        psid[0..4].copy_from_slice(b"PSID");
        psid[14..16].copy_from_slice(&1u16.to_be_bytes());
        psid[16..18].copy_from_slice(&1u16.to_be_bytes());
        let header = parse_chiptune(&psid).unwrap();
        assert_eq!(header.format, ChiptuneFormat::Sid);
    }

    #[test]
    fn unrecognised_bytes_return_unknown_magic() {
        assert!(matches!(parse_chiptune(b"not a chiptune"), Err(FormatError::UnknownMagic)));
    }
}
