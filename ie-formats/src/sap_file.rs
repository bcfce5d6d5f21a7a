//! SAP (Slight Atari Player) header parsing.
//!
//! Unlike SID's binary header, SAP's is line-oriented ASCII text: a
//! magic line followed by `TAG value` lines, terminated by a blank line
//! before the embedded POKEY-driving binary. Tags not used by this
//! substrate (STEREO, TYPE's duration sub-fields) are accepted and
//! ignored rather than rejected, matching the spec's framing of file
//! parsers as producers of a fixed metadata shape rather than strict
//! validators.

use crate::chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError, TickRate};

const MAGIC: &[u8] = b"SAP\r\n";

fn parse_hex_u16(s: &str) -> Option<u16> {
    u16::from_str_radix(s.trim(), 16).ok()
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

/// Parses a SAP file header.
pub fn parse(data: &[u8]) -> Result<ChiptuneHeader, FormatError> {
    if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
        return Err(FormatError::UnknownMagic);
    }

    let mut name = String::new();
    let mut author = String::new();
    let mut released = String::new();
    let mut init_address: Option<u16> = None;
    let mut play_address: u16 = 0;
    let mut songs: u16 = 1;
    let mut start_song: u16 = 1;
    let mut tick_rate = TickRate::Pal;

    let mut offset = MAGIC.len();
    loop {
        let line_end = memchr::memchr(b'\n', &data[offset..]).map(|i| offset + i);
        let line_end = match line_end {
            Some(i) => i,
            None => return Err(FormatError::Truncated(ChiptuneFormat::Sap)),
        };
        let raw_line = &data[offset..line_end];
        let line = std::str::from_utf8(raw_line)
            .map_err(|_| FormatError::InvalidString { offset })?
            .trim_end_matches('\r');
        offset = line_end + 1;

        if line.is_empty() {
            break;
        }

        let (tag, value) = match line.find(' ') {
            Some(i) => (&line[..i], line[i + 1..].trim()),
            None => (line, ""),
        };

        match tag {
            "AUTHOR" => author = unquote(value),
            "NAME" => name = unquote(value),
            "DATE" => released = unquote(value),
            "NTSC" => tick_rate = TickRate::Ntsc,
            "INIT" => {
                init_address = value.split_whitespace().next().and_then(parse_hex_u16);
            }
            "PLAYER" | "PLAY" => {
                play_address = value.split_whitespace().next().and_then(parse_hex_u16).unwrap_or(0);
            }
            "SONGS" => songs = value.parse().unwrap_or(1),
            "DEFSONG" => {
                // SAP's DEFSONG is zero-based; this header's start_song is one-based.
                start_song = value.parse::<u16>().unwrap_or(0) + 1;
            }
            _ => {}
        }

        if offset >= data.len() {
            return Err(FormatError::Truncated(ChiptuneFormat::Sap));
        }
    }

    let init_address =
        init_address.ok_or(FormatError::OutOfRange { format: ChiptuneFormat::Sap, field: "INIT" })?;

    if start_song == 0 || start_song > songs {
        start_song = 1;
    }

    Ok(ChiptuneHeader {
        format: ChiptuneFormat::Sap,
        load_address: 0,
        init_address,
        play_address,
        songs,
        start_song,
        tick_rate,
        name,
        author,
        released,
        data_offset: offset,
    })
}
