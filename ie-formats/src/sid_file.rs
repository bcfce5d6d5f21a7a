//! PSID/RSID header parsing.
//!
//! SID is the one chiptune container this workspace parses to real
//! fidelity: it is the format exercised end to end by the Music Player's
//! own tests (§8 scenario 6, "SID6502Player INIT"). The field layout
//! below follows the well-known PSID v2NG header used across the SID
//! tooling ecosystem.

use nom::bytes::complete::tag;
use nom::combinator::map;
use nom::number::complete::{be_u16, be_u32};
use nom::sequence::tuple;
use nom::IResult;

use crate::chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError, TickRate};

const HEADER_LEN_V1: usize = 0x76;
const NAME_FIELD_LEN: usize = 32;

fn magic(input: &[u8]) -> IResult<&[u8], bool> {
    map(nom::branch::alt((tag("PSID"), tag("RSID"))), |m: &[u8]| m == b"RSID")(input)
}

fn fixed_string(field: &[u8]) -> Result<String, FormatError> {
    let end = memchr::memchr(0, field).unwrap_or(field.len());
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

/// Parses a PSID or RSID file header.
///
/// Returns [FormatError::Truncated] if `data` is shorter than the fixed
/// v1 header; version-2-and-later fields beyond that are best-effort and
/// fall back to their v1 defaults when absent.
pub fn parse(data: &[u8]) -> Result<ChiptuneHeader, FormatError> {
    if data.len() < HEADER_LEN_V1 {
        return Err(FormatError::Truncated(ChiptuneFormat::Sid));
    }

    let (rest, is_rsid) =
        magic(data).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| FormatError::UnknownMagic)?;

    let (rest, (_version, data_offset, load_address, init_address, play_address, songs, start_song, speed)): (
        &[u8],
        (u16, u16, u16, u16, u16, u16, u16, u32),
    ) = tuple((be_u16, be_u16, be_u16, be_u16, be_u16, be_u16, be_u16, be_u32))(rest)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| FormatError::Truncated(ChiptuneFormat::Sid))?;

    if rest.len() < NAME_FIELD_LEN * 3 {
        return Err(FormatError::Truncated(ChiptuneFormat::Sid));
    }
    let name = fixed_string(&rest[0..NAME_FIELD_LEN])?;
    let author = fixed_string(&rest[NAME_FIELD_LEN..NAME_FIELD_LEN * 2])?;
    let released = fixed_string(&rest[NAME_FIELD_LEN * 2..NAME_FIELD_LEN * 3])?;

    if songs == 0 || start_song == 0 || start_song > songs {
        return Err(FormatError::OutOfRange { format: ChiptuneFormat::Sid, field: "start_song" });
    }

    // The speed bitfield covers only the first 32 songs; bit = 0 selects
    // vertical-blank (PAL 50 Hz) timing, bit = 1 selects CIA (NTSC 60 Hz)
    // timing for that song (Design Notes §9, "CIA timer in SID" policy).
    let song_bit = (start_song - 1).min(31);
    let tick_rate = if speed & (1 << song_bit) != 0 { TickRate::Ntsc } else { TickRate::Pal };

    // is_rsid is reserved for real-C64-environment (RSID) playback
    // policy; this substrate always runs the synthetic INIT/PLAY
    // convention (§4.4) regardless, so it is not surfaced on the header.
    let _ = is_rsid;

    Ok(ChiptuneHeader {
        format: ChiptuneFormat::Sid,
        load_address,
        init_address,
        play_address,
        songs,
        start_song,
        tick_rate,
        name,
        author,
        released,
        data_offset: data_offset as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(magic: &[u8; 4], speed: u32) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN_V1];
        buf[0..4].copy_from_slice(magic);
        buf[4..6].copy_from_slice(&2u16.to_be_bytes()); // version
        buf[6..8].copy_from_slice(&(HEADER_LEN_V1 as u16).to_be_bytes()); // data_offset
        buf[8..10].copy_from_slice(&0u16.to_be_bytes()); // load_address
        buf[10..12].copy_from_slice(&0xA000u16.to_be_bytes()); // init_address
        buf[12..14].copy_from_slice(&0xA010u16.to_be_bytes()); // play_address
        buf[14..16].copy_from_slice(&1u16.to_be_bytes()); // songs
        buf[16..18].copy_from_slice(&1u16.to_be_bytes()); // start_song
        buf[18..22].copy_from_slice(&speed.to_be_bytes());
        let name = b"Test Tune\0";
        buf[22..22 + name.len()].copy_from_slice(name);
        buf
    }

    #[test]
    fn parses_init_and_play_addresses() {
        let buf = minimal_header(b"PSID", 0);
        let header = parse(&buf).unwrap();
        assert_eq!(header.init_address, 0xA000);
        assert_eq!(header.play_address, 0xA010);
        assert_eq!(header.name, "Test Tune");
    }

    #[test]
    fn speed_bit_zero_selects_pal() {
        let buf = minimal_header(b"PSID", 0);
        let header = parse(&buf).unwrap();
        assert_eq!(header.tick_rate, TickRate::Pal);
    }

    #[test]
    fn speed_bit_one_selects_ntsc() {
        let buf = minimal_header(b"RSID", 1);
        let header = parse(&buf).unwrap();
        assert_eq!(header.tick_rate, TickRate::Ntsc);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let buf = vec![0u8; 10];
        assert!(matches!(parse(&buf), Err(FormatError::Truncated(ChiptuneFormat::Sid))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = minimal_header(b"PSID", 0);
        buf[0] = b'X';
        assert!(matches!(parse(&buf), Err(FormatError::UnknownMagic)));
    }
}
