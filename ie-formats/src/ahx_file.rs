//! AHX (Abyss' Highest eXperience) header parsing.
//!
//! Unlike SID/SAP/SNDH, a real AHX module carries no embedded replay
//! code at all -- it is pure pattern/instrument data played by a
//! well-known fixed replay routine. That maps cleanly onto the render
//! loop's "or just PLAY + implicit interrupt mode" alternative (§4.4
//! step 2): this parser always reports `init_address = 0` and
//! `play_address = 0` so the Music Player knows to drive the chip
//! engine's `tick_sample` directly off the tick rate rather than vector
//! a CPU into the file.

use crate::chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError, TickRate};

const MAGIC: &[u8; 3] = b"THX";
const FIXED_HEADER_LEN: usize = 8;

/// Parses an AHX module header.
pub fn parse(data: &[u8]) -> Result<ChiptuneHeader, FormatError> {
    if data.len() < FIXED_HEADER_LEN {
        return Err(FormatError::Truncated(ChiptuneFormat::Ahx));
    }
    if &data[0..3] != MAGIC {
        return Err(FormatError::UnknownMagic);
    }

    let tempo = data[4];
    let songs = (data[5] as u16).max(1);
    let start_song = (data[6] as u16) + 1;
    let name_len = data[7] as usize;

    if FIXED_HEADER_LEN + name_len > data.len() {
        return Err(FormatError::Truncated(ChiptuneFormat::Ahx));
    }
    let name =
        String::from_utf8_lossy(&data[FIXED_HEADER_LEN..FIXED_HEADER_LEN + name_len]).into_owned();

    if start_song > songs {
        return Err(FormatError::OutOfRange { format: ChiptuneFormat::Ahx, field: "start_song" });
    }

    Ok(ChiptuneHeader {
        format: ChiptuneFormat::Ahx,
        load_address: 0,
        init_address: 0,
        play_address: 0,
        songs,
        start_song,
        tick_rate: if tempo >= 60 { TickRate::Ntsc } else { TickRate::Pal },
        name,
        author: String::new(),
        released: String::new(),
        data_offset: FIXED_HEADER_LEN + name_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut buf = vec![b'T', b'H', b'X', 0, 50, 2, 0, 4];
        buf.extend_from_slice(b"Test");
        buf
    }

    #[test]
    fn parses_subsong_count_and_name() {
        let header = parse(&sample()).unwrap();
        assert_eq!(header.songs, 2);
        assert_eq!(header.start_song, 1);
        assert_eq!(header.name, "Test");
    }

    #[test]
    fn playback_is_interrupt_mode_only() {
        let header = parse(&sample()).unwrap();
        assert_eq!(header.init_address, 0);
        assert_eq!(header.play_address, 0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(parse(b"XXXXXXXX"), Err(FormatError::UnknownMagic)));
    }
}
