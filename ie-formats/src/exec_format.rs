//! Executable file-type detection for the Program Executor (§4.6).
//!
//! The executor never sniffs file contents for this decision: the guest
//! supplies a filename, and the extension alone picks the [CpuKind] to
//! launch. `.iex` is kept as a legacy alias for `.ie32`.

use ie_core::chip::CpuKind;
use std::path::Path;

/// Maps a path's extension to the guest CPU family that should run it.
///
/// Returns `None` for an unknown or missing extension; the executor
/// surfaces that as `UNSUPPORTED` (§4.6).
pub fn detect_type<P: AsRef<Path>>(path: P) -> Option<CpuKind> {
    let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "iex" | "ie32" => Some(CpuKind::Ie32),
        "ie64" => Some(CpuKind::Ie64),
        "ie65" => Some(CpuKind::Mos6502),
        "ie68" => Some(CpuKind::M68k),
        "ie80" => Some(CpuKind::Z80),
        "ie86" => Some(CpuKind::X86),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_extension_maps_to_its_family() {
        assert_eq!(detect_type("game.ie32"), Some(CpuKind::Ie32));
        assert_eq!(detect_type("game.iex"), Some(CpuKind::Ie32));
        assert_eq!(detect_type("game.ie64"), Some(CpuKind::Ie64));
        assert_eq!(detect_type("game.ie65"), Some(CpuKind::Mos6502));
        assert_eq!(detect_type("game.ie68"), Some(CpuKind::M68k));
        assert_eq!(detect_type("game.ie80"), Some(CpuKind::Z80));
        assert_eq!(detect_type("game.ie86"), Some(CpuKind::X86));
    }

    #[test]
    fn unknown_extension_returns_none() {
        assert_eq!(detect_type("game.exe"), None);
        assert_eq!(detect_type("game"), None);
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert_eq!(detect_type("GAME.IE64"), Some(CpuKind::Ie64));
    }
}
