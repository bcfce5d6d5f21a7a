//! Extension-to-family mapping and a guest CPU runner factory (§2, §4.6).
//!
//! Real instruction decoders live outside this workspace (§1 "Out of
//! scope"); this module only specifies how a front end registers one
//! per [CpuKind] and looks it up again, by file extension or directly.

use std::collections::HashMap;
use std::path::Path;

use ie_core::chip::{CpuKind, GuestCpu};
use ie_formats::exec_format;

/// A boxed constructor producing a fresh [GuestCpu] instance for one
/// [CpuKind]. Registered once per family by the front end that links in
/// a real decoder. The built CPU must be `Send`: coprocessor workers and
/// the program executor each run it on a dedicated thread.
pub type CpuBuilder = Box<dyn Fn() -> Box<dyn GuestCpu + Send> + Send + Sync>;

/// Maps a path's extension to the [CpuKind] that should run it (§4.6
/// "detect file type by extension").
///
/// Thin re-export of [ie_formats::exec_format::detect_type] under the
/// name this crate's callers expect; kept here so front ends depend on
/// one runtime-helpers crate rather than reaching into `ie-formats`
/// directly for this single call.
pub fn mode_for_path<P: AsRef<Path>>(path: P) -> Option<CpuKind> {
    exec_format::detect_type(path)
}

/// A registry of [CpuBuilder]s, one per supported [CpuKind].
///
/// The Program Executor and Coprocessor Workers both need "construct me
/// a CPU for this family" without depending on every decoder crate
/// directly; a front end populates this once at startup with whichever
/// decoders it has linked in.
#[derive(Default)]
pub struct RunnerFactory {
    builders: HashMap<CpuKind, CpuBuilder>,
}

/// Raised when the factory has no builder registered for a requested
/// family (§4.6 `UNSUPPORTED`).
#[derive(Debug, thiserror::Error)]
#[error("no guest CPU runner registered for {0}")]
pub struct UnsupportedCpuKind(pub CpuKind);

impl RunnerFactory {
    pub fn new() -> Self {
        RunnerFactory { builders: HashMap::new() }
    }

    /// Registers (or replaces) the builder for `kind`.
    pub fn register(&mut self, kind: CpuKind, builder: CpuBuilder) {
        self.builders.insert(kind, builder);
    }

    pub fn is_registered(&self, kind: CpuKind) -> bool {
        self.builders.contains_key(&kind)
    }

    /// Builds a fresh [GuestCpu] for `kind`.
    pub fn build(&self, kind: CpuKind) -> Result<Box<dyn GuestCpu + Send>, UnsupportedCpuKind> {
        self.builders.get(&kind).map(|b| b()).ok_or(UnsupportedCpuKind(kind))
    }

    /// Convenience combining [mode_for_path] and [RunnerFactory::build]
    /// for the Program Executor's launch path.
    pub fn build_for_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Box<dyn GuestCpu + Send>, RunnerLookupError> {
        let kind = mode_for_path(&path).ok_or(RunnerLookupError::UnknownExtension)?;
        self.build(kind).map_err(RunnerLookupError::Unsupported)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerLookupError {
    #[error("file extension does not map to a known guest CPU family")]
    UnknownExtension,
    #[error(transparent)]
    Unsupported(#[from] UnsupportedCpuKind),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_core::chip::StubCpu;

    #[test]
    fn extension_mapping_round_trips_every_family() {
        assert_eq!(mode_for_path("game.ie32"), Some(CpuKind::Ie32));
        assert_eq!(mode_for_path("game.ie80"), Some(CpuKind::Z80));
        assert_eq!(mode_for_path("game.bin"), None);
    }

    #[test]
    fn factory_builds_only_registered_kinds() {
        let mut factory = RunnerFactory::new();
        factory.register(CpuKind::Ie64, Box::new(|| Box::new(StubCpu::new())));
        assert!(factory.build(CpuKind::Ie64).is_ok());
        assert!(matches!(factory.build(CpuKind::Z80), Err(UnsupportedCpuKind(CpuKind::Z80))));
    }

    #[test]
    fn build_for_path_reports_unknown_extension_distinctly() {
        let factory = RunnerFactory::new();
        let err = factory.build_for_path("game.bin").unwrap_err();
        assert!(matches!(err, RunnerLookupError::UnknownExtension));
    }
}
