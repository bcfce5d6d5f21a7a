//! TED music container header parsing.
//!
//! Commodore 264-series tunes do not share a single dominant file format
//! the way SID tunes do; this workspace defines a small self-contained
//! container (`TMC1`) shaped like PSID's header but sized for TED's
//! simpler register set, so the Music Player can be exercised against
//! TED without depending on any one community format's exact byte
//! layout (out of scope per §1: "we specify only what they produce").

use crate::chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError, TickRate};

const MAGIC: &[u8; 4] = b"TMC1";
const HEADER_LEN: usize = 4 + 2 + 2 + 2 + 2 + 2 + 1 + 32 + 32;
const NAME_FIELD_LEN: usize = 32;

fn fixed_string(field: &[u8]) -> String {
    let end = memchr::memchr(0, field).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Parses a `TMC1` TED music container header.
pub fn parse(data: &[u8]) -> Result<ChiptuneHeader, FormatError> {
    if data.len() < HEADER_LEN {
        return Err(FormatError::Truncated(ChiptuneFormat::Ted));
    }
    if &data[0..4] != MAGIC {
        return Err(FormatError::UnknownMagic);
    }

    let init_address = u16::from_be_bytes([data[4], data[5]]);
    let play_address = u16::from_be_bytes([data[6], data[7]]);
    let songs = u16::from_be_bytes([data[8], data[9]]);
    let start_song = u16::from_be_bytes([data[10], data[11]]);
    let tick_rate = if data[12] != 0 { TickRate::Ntsc } else { TickRate::Pal };

    let name_start = 13;
    let author_start = name_start + NAME_FIELD_LEN;
    let name = fixed_string(&data[name_start..name_start + NAME_FIELD_LEN]);
    let author = fixed_string(&data[author_start..author_start + NAME_FIELD_LEN]);

    if songs == 0 || start_song == 0 || start_song > songs {
        return Err(FormatError::OutOfRange { format: ChiptuneFormat::Ted, field: "start_song" });
    }

    Ok(ChiptuneHeader {
        format: ChiptuneFormat::Ted,
        load_address: 0,
        init_address,
        play_address,
        songs,
        start_song,
        tick_rate,
        name,
        author,
        released: String::new(),
        data_offset: HEADER_LEN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&0x1000u16.to_be_bytes());
        buf[6..8].copy_from_slice(&0x1003u16.to_be_bytes());
        buf[8..10].copy_from_slice(&1u16.to_be_bytes());
        buf[10..12].copy_from_slice(&1u16.to_be_bytes());
        buf[12] = 0;
        let name = b"Test\0";
        buf[13..13 + name.len()].copy_from_slice(name);
        buf
    }

    #[test]
    fn parses_addresses_and_name() {
        let header = parse(&sample()).unwrap();
        assert_eq!(header.init_address, 0x1000);
        assert_eq!(header.play_address, 0x1003);
        assert_eq!(header.name, "Test");
        assert_eq!(header.tick_rate, TickRate::Pal);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = sample();
        buf[0] = b'X';
        assert!(matches!(parse(&buf), Err(FormatError::UnknownMagic)));
    }

    #[test]
    fn truncated_file_is_rejected() {
        assert!(matches!(parse(&[0u8; 4]), Err(FormatError::Truncated(ChiptuneFormat::Ted))));
    }
}
