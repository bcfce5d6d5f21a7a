//! Coprocessor Workers (§4.5): a secondary guest CPU running in its own
//! memory window, with the main bus otherwise untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ie_core::bus::MachineBus;
use ie_core::chip::{CpuKind, GuestCpu};
use ie_utils::runner::{RunnerFactory, UnsupportedCpuKind};

/// A worker's mailbox window: a guest-visible range that is routed to a
/// shared region of the main bus (§4.5 "default `$2000-$3FFF`").
#[derive(Clone, Copy, Debug)]
pub struct MailboxWindow {
    pub guest_base: u32,
    pub bus_base: u32,
    pub size: u32,
}

/// Describes the memory window a worker's CPU runs in.
#[derive(Clone, Copy, Debug)]
pub struct WorkerWindow {
    pub bank_base: u32,
    pub bank_size: u32,
    pub mailbox: Option<MailboxWindow>,
}

/// Errors raised while setting up or running a coprocessor worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("guest binary ({binary_len} bytes) does not fit the worker window ({window_size} bytes)")]
    BinaryTooLarge { binary_len: usize, window_size: u32 },
    #[error(transparent)]
    UnsupportedFamily(#[from] UnsupportedCpuKind),
}

/// A [Worker]'s lifecycle state, polled by a front end instead of
/// inferred from side effects (§4.5 SUPPLEMENT).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// A coprocessor worker: a [GuestCpu] driven on a dedicated thread
/// inside its own memory window (§4.5).
pub struct Worker {
    cpu: Arc<Mutex<Box<dyn GuestCpu + Send>>>,
    status: Arc<Mutex<WorkerStatus>>,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn status(&self) -> WorkerStatus {
        *self.status.lock().unwrap()
    }

    /// Spawns the dedicated thread running the CPU until stopped (§4.5
    /// "Lifecycle").
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.cpu.lock().unwrap().set_running(true);
        *self.status.lock().unwrap() = WorkerStatus::Running;

        let cpu = Arc::clone(&self.cpu);
        let stop_requested = Arc::clone(&self.stop_requested);
        self.handle = Some(thread::spawn(move || {
            while !stop_requested.load(Ordering::SeqCst) {
                let running = {
                    let mut guard = cpu.lock().unwrap();
                    if guard.running() {
                        guard.step();
                        true
                    } else {
                        false
                    }
                };
                if !running {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }));
    }

    /// Freezes the CPU by dropping its own `running` flag, routed
    /// through the same mechanism `stop` uses, rather than a separate
    /// worker-level flag (§4.5 "pause/resume route through the debug
    /// adapter").
    pub fn pause(&self) {
        self.cpu.lock().unwrap().set_running(false);
        *self.status.lock().unwrap() = WorkerStatus::Paused;
    }

    pub fn resume(&self) {
        self.cpu.lock().unwrap().set_running(true);
        *self.status.lock().unwrap() = WorkerStatus::Running;
    }

    /// Clears the running flag and waits for the worker thread to exit
    /// (§4.5 "waits on a done signal").
    pub fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cpu.lock().unwrap().set_running(false);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        *self.status.lock().unwrap() = WorkerStatus::Stopped;
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Sets up a coprocessor worker: zeroes `window`, copies `binary` into
/// it, seeds the 6502 reset vector if `kind` is [CpuKind::Mos6502], and
/// builds a CPU for `kind` via `factory` (§4.5 "Setup").
///
/// Coprocessor workers never reset the main bus; only the bytes inside
/// `window` are touched.
pub fn create_worker(
    factory: &RunnerFactory,
    kind: CpuKind,
    bus: &mut MachineBus,
    window: WorkerWindow,
    binary: &[u8],
    entry_point: u32,
) -> Result<Worker, WorkerError> {
    if binary.len() as u32 > window.bank_size {
        return Err(WorkerError::BinaryTooLarge { binary_len: binary.len(), window_size: window.bank_size });
    }

    let start = window.bank_base as usize;
    let end = (start + window.bank_size as usize).min(bus.len());
    bus.ram_mut()[start..end].iter_mut().for_each(|b| *b = 0);
    bus.load_bytes(window.bank_base, binary);

    if kind == CpuKind::Mos6502 {
        // $FFFC/$FFFD hold the reset vector in a 6502's address space;
        // routed 1:1 through the bank window (§4.5 "reset vector
        // initialised to the entry point").
        let vector_addr = window.bank_base + 0xFFFC;
        bus.write16(vector_addr, entry_point as u16);
    }

    let mut cpu = factory.build(kind)?;
    cpu.reset();
    cpu.set_pc(entry_point);

    log::info!("coprocessor worker ready: {} at {:#x}..{:#x}", kind, window.bank_base, end);

    Ok(Worker {
        cpu: Arc::new(Mutex::new(cpu)),
        status: Arc::new(Mutex::new(WorkerStatus::Idle)),
        stop_requested: Arc::new(AtomicBool::new(false)),
        handle: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_core::chip::StubCpu;
    use std::time::Duration;

    fn factory_with_stub() -> RunnerFactory {
        let mut factory = RunnerFactory::new();
        factory.register(CpuKind::Mos6502, Box::new(|| Box::new(StubCpu::new())));
        factory
    }

    #[test]
    fn binary_larger_than_window_is_rejected() {
        let factory = factory_with_stub();
        let mut bus = MachineBus::new(0);
        let window = WorkerWindow { bank_base: 0x9000, bank_size: 4, mailbox: None };
        let err = create_worker(&factory, CpuKind::Mos6502, &mut bus, window, &[0u8; 100], 0xA000).unwrap_err();
        assert!(matches!(err, WorkerError::BinaryTooLarge { .. }));
    }

    #[test]
    fn reset_vector_is_seeded_for_6502() {
        let factory = factory_with_stub();
        let mut bus = MachineBus::new(0);
        let window = WorkerWindow { bank_base: 0x9000, bank_size: 0x10000, mailbox: None };
        create_worker(&factory, CpuKind::Mos6502, &mut bus, window, &[0xEA, 0xEA], 0xA000).unwrap();
        assert_eq!(bus.read16(0x9000 + 0xFFFC), 0xA000);
    }

    #[test]
    fn pause_clears_the_cpus_own_running_flag_not_a_separate_one() {
        let factory = factory_with_stub();
        let mut bus = MachineBus::new(0);
        let window = WorkerWindow { bank_base: 0x9000, bank_size: 0x10000, mailbox: None };
        let mut worker = create_worker(&factory, CpuKind::Mos6502, &mut bus, window, &[], 0xA000).unwrap();
        worker.start();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(worker.status(), WorkerStatus::Running);
        assert!(worker.cpu.lock().unwrap().running());

        worker.pause();
        assert_eq!(worker.status(), WorkerStatus::Paused);
        assert!(!worker.cpu.lock().unwrap().running());

        worker.resume();
        assert!(worker.cpu.lock().unwrap().running());

        worker.stop();
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }
}
