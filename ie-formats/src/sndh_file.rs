//! SNDH (Atari ST) header parsing.
//!
//! Real SNDH modules are a 68K binary preceded by a tag-chunk header
//! (`SNDH` ... `HDNS`) rather than a fixed-offset struct; there is no
//! separate INIT/PLAY address pair; the single entry point at the start
//! of the code is called with a mode selector in D0 (0 = init, 1 =
//! unload, 2+ = play). This parser extracts the tags this workspace's
//! metadata contract cares about and folds the init/play distinction
//! into one address, leaving the D0 dispatch to the 68K coprocessor
//! worker that ends up driving it.

use crate::chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError, TickRate};

const SNDH_LOAD_ADDRESS: u16 = 0x8000;

fn read_cstring(data: &[u8], start: usize) -> (String, usize) {
    let end = memchr::memchr(0, &data[start..]).map(|i| start + i).unwrap_or(data.len());
    (String::from_utf8_lossy(&data[start..end]).into_owned(), end + 1)
}

/// Parses an SNDH header, locating the `SNDH` magic within the leading
/// 68K branch-over preamble and walking tag chunks until `HDNS`.
pub fn parse(data: &[u8]) -> Result<ChiptuneHeader, FormatError> {
    let search_window = data.len().min(16);
    let magic_at = memchr::memmem::find(&data[..search_window], b"SNDH")
        .ok_or(FormatError::UnknownMagic)?;

    let mut cursor = magic_at + 4;
    let mut name = String::new();
    let mut author = String::new();
    let mut tick_rate = TickRate::Pal;

    while cursor + 4 <= data.len() {
        let tag = &data[cursor..cursor + 4];
        if tag == b"HDNS" {
            cursor += 4;
            break;
        }
        match tag {
            b"TITL" => {
                let (s, next) = read_cstring(data, cursor + 4);
                name = s;
                cursor = next;
            }
            b"COMM" => {
                let (s, next) = read_cstring(data, cursor + 4);
                author = s;
                cursor = next;
            }
            _ if tag[0] == b'T' && matches!(tag[1], b'A' | b'B' | b'C') => {
                let digits = std::str::from_utf8(&tag[2..4]).unwrap_or("50");
                if let Ok(hz) = digits.parse::<u32>() {
                    tick_rate = if hz >= 58 { TickRate::Ntsc } else { TickRate::Pal };
                }
                cursor += 4;
            }
            _ => cursor += 4,
        }
        if cursor >= data.len() {
            return Err(FormatError::Truncated(ChiptuneFormat::Sndh));
        }
    }

    // Chunk headers are word-aligned; round up to the next even offset.
    let code_offset = cursor + (cursor % 2);
    let init_address = SNDH_LOAD_ADDRESS.wrapping_add(code_offset as u16);

    Ok(ChiptuneHeader {
        format: ChiptuneFormat::Sndh,
        load_address: SNDH_LOAD_ADDRESS,
        init_address,
        play_address: init_address,
        songs: 1,
        start_song: 1,
        tick_rate,
        name,
        author,
        released: String::new(),
        data_offset: code_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut buf = vec![0x60, 0x1a, 0x00, 0x00]; // fake 68K branch-over
        buf.extend_from_slice(b"SNDH");
        buf.extend_from_slice(b"TITL");
        buf.extend_from_slice(b"Test\0");
        buf.extend_from_slice(b"COMM");
        buf.extend_from_slice(b"Author\0");
        buf.extend_from_slice(b"TC50");
        buf.extend_from_slice(b"HDNS");
        buf
    }

    #[test]
    fn extracts_title_and_composer() {
        let header = parse(&sample()).unwrap();
        assert_eq!(header.name, "Test");
        assert_eq!(header.author, "Author");
    }

    #[test]
    fn timer_tag_selects_pal_at_fifty_hz() {
        let header = parse(&sample()).unwrap();
        assert_eq!(header.tick_rate, TickRate::Pal);
    }

    #[test]
    fn init_and_play_share_the_single_entry_point() {
        let header = parse(&sample()).unwrap();
        assert_eq!(header.init_address, header.play_address);
    }

    #[test]
    fn missing_magic_is_rejected() {
        assert!(matches!(parse(b"not an sndh file"), Err(FormatError::UnknownMagic)));
    }
}
