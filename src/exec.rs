//! Program Executor (§4.6): the MMIO-triggered loader that detects a
//! guest binary's type by extension, sanitises its path, loads its
//! bytes into the matching CPU family's memory window and starts the
//! matching runner.
//!
//! The synchronous gate (path validation, file-type detection, session
//! bump) runs under [ProgramExecutor]'s own mutex, same as the Music
//! Player's load path (§4.4); the actual file read and CPU launch run
//! on a background thread, gated by the same session-generation check
//! so a superseding request always wins (§4.6 "Session-generation check
//! prevents stale writes after a superseding request").

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use ie_core::bus::MachineBus;
use ie_core::chip::CpuKind;
use ie_core::clock::ByteOrderMode;
use ie_utils::runner::RunnerFactory;

/// Failure codes surfaced through `EXEC_ERROR` (§4.6 "Failure codes").
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("path is absolute, contains '..', or escapes the base directory")]
    PathInvalid,
    #[error("no guest CPU runner registered for this file's extension")]
    Unsupported,
    #[error("file not found")]
    NotFound,
    #[error("failed to load the binary into its memory window: {0}")]
    LoadFailed(String),
}

/// Polled via `EXEC_STATUS` (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecStatus {
    Idle,
    Loading,
    Running,
    Error,
}

/// Where in the guest address space a given [CpuKind]'s binary is loaded
/// and run from. The program executor owns no opinion about *why* these
/// addresses were chosen -- that is [crate::mmio]'s job -- only that
/// loading writes here and the launched CPU starts here.
#[derive(Clone, Copy, Debug)]
pub struct LaunchWindow {
    pub base: u32,
    pub size: u32,
    pub entry: u32,
}

struct ExecShared {
    status: ExecStatus,
    error: Option<ExecError>,
    cpu_type: Option<CpuKind>,
    session: u64,
}

/// Callback invoked once a guest CPU has been built and its memory
/// window loaded, so the owning [crate::Machine] can install it as the
/// running program (swap it in for the default CPU, wire its bus,
/// etc.). Runs on the async load thread, after the session check has
/// already passed (§4.6 "Async phase").
pub type LaunchedHook = Box<dyn Fn(CpuKind, Box<dyn ie_core::chip::GuestCpu + Send>) + Send>;

/// The Program Executor: `EXEC_NAME_PTR` / `EXEC_CTRL` / `EXEC_STATUS` /
/// `EXEC_TYPE` / `EXEC_ERROR` / `EXEC_SESSION` MMIO surface (§4.6, §6).
pub struct ProgramExecutor {
    base_dir: PathBuf,
    factory: Arc<RunnerFactory>,
    shared: Arc<Mutex<ExecShared>>,
    session_counter: Arc<AtomicU64>,
    windows: Vec<(CpuKind, LaunchWindow)>,
}

impl ProgramExecutor {
    pub fn new(base_dir: impl Into<PathBuf>, factory: Arc<RunnerFactory>) -> Self {
        ProgramExecutor {
            base_dir: base_dir.into(),
            factory,
            shared: Arc::new(Mutex::new(ExecShared {
                status: ExecStatus::Idle,
                error: None,
                cpu_type: None,
                session: 0,
            })),
            session_counter: Arc::new(AtomicU64::new(0)),
            windows: Vec::new(),
        }
    }

    /// Registers the memory window a [CpuKind]'s binaries are loaded
    /// into and launched from.
    pub fn register_window(&mut self, kind: CpuKind, window: LaunchWindow) {
        self.windows.retain(|(k, _)| *k != kind);
        self.windows.push((kind, window));
    }

    pub fn status(&self) -> ExecStatus {
        self.shared.lock().unwrap().status
    }

    pub fn last_error(&self) -> Option<ExecError> {
        self.shared.lock().unwrap().error.clone()
    }

    pub fn cpu_type(&self) -> Option<CpuKind> {
        self.shared.lock().unwrap().cpu_type
    }

    pub fn session(&self) -> u64 {
        self.session_counter.load(Ordering::SeqCst)
    }

    /// Rejects an absolute path, any `..` component, or a path that
    /// resolves outside [ProgramExecutor::base_dir] (§4.6 "Synchronous
    /// gate").
    fn sanitize(&self, name: &str) -> Result<PathBuf, ExecError> {
        let requested = Path::new(name);
        if requested.is_absolute() || requested.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(ExecError::PathInvalid);
        }
        let candidate = self.base_dir.join(requested);
        let relative = candidate.strip_prefix(&self.base_dir).map_err(|_| ExecError::PathInvalid)?;
        if relative.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(ExecError::PathInvalid);
        }
        Ok(candidate)
    }

    /// Synchronous gate: sanitises `name`, detects its [CpuKind] by
    /// extension, confirms the file exists, bumps the session counter
    /// and sets status to `Loading`. Returns the new session id so a
    /// caller (or test) can confirm which load is in flight.
    ///
    /// On success, spawns the async phase on a background thread:
    /// reads the file, builds the CPU via the [RunnerFactory], loads
    /// its bytes into the registered [LaunchWindow], flips the bus
    /// byte order for the family (M68K big-endian, everyone else
    /// little, §4.6), and -- only if this session is still current --
    /// installs the result through `on_launched` and marks `Running`.
    pub fn execute(
        &self,
        name: &str,
        bus: Arc<Mutex<MachineBus>>,
        on_launched: LaunchedHook,
    ) -> Result<u64, ExecError> {
        let path = self.sanitize(name)?;
        let kind = ie_utils::runner::mode_for_path(&path).ok_or(ExecError::Unsupported)?;
        if !self.factory.is_registered(kind) {
            return Err(ExecError::Unsupported);
        }
        if fs::metadata(&path).is_err() {
            return Err(ExecError::NotFound);
        }
        let window = self
            .windows
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, w)| *w)
            .ok_or(ExecError::Unsupported)?;

        let my_session = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut shared = self.shared.lock().unwrap();
            shared.status = ExecStatus::Loading;
            shared.error = None;
            shared.cpu_type = Some(kind);
            shared.session = my_session;
        }

        let factory = Arc::clone(&self.factory);
        let shared = Arc::clone(&self.shared);
        let session_counter = Arc::clone(&self.session_counter);

        thread::spawn(move || {
            let outcome = fs::read(&path)
                .map_err(|_| ExecError::NotFound)
                .and_then(|bytes| {
                    if bytes.len() as u32 > window.size {
                        return Err(ExecError::LoadFailed(format!(
                            "binary ({} bytes) does not fit window ({} bytes)",
                            bytes.len(),
                            window.size
                        )));
                    }
                    let mut cpu = factory.build(kind).map_err(|e| ExecError::LoadFailed(e.to_string()))?;
                    {
                        let mut bus = bus.lock().unwrap();
                        bus.set_byte_order(ByteOrderMode::for_cpu(kind));
                        bus.load_bytes(window.base, &bytes);
                    }
                    cpu.reset();
                    cpu.set_pc(window.entry);
                    Ok(cpu)
                });

            if session_counter.load(Ordering::SeqCst) != my_session {
                log::debug!("program executor: load for session {} superseded, dropping", my_session);
                return;
            }

            let mut shared = shared.lock().unwrap();
            match outcome {
                Ok(cpu) => {
                    shared.status = ExecStatus::Running;
                    shared.error = None;
                    drop(shared);
                    on_launched(kind, cpu);
                }
                Err(err) => {
                    log::warn!("program executor: load failed: {}", err);
                    shared.status = ExecStatus::Error;
                    shared.error = Some(err);
                }
            }
        });

        Ok(my_session)
    }
}
