//! Closure-based reload helpers (§2 "reload closures").
//!
//! The Program Executor and Music Player both swap in new content after
//! the machine is already running: re-reading the same path every frame
//! would be wasteful and racy against a file being replaced on disk.
//! Instead, callers pass a closure that is invoked exactly once, at the
//! moment a reload is actually needed, and that produces a fresh byte
//! source -- the same "acquire a reader lazily" shape the teacher
//! workspace uses for its tape-loading helpers.

use std::io::{self, Read};

/// Invokes `acquire` to obtain a reader, then reads it to exhaustion.
///
/// Returns `Ok(bytes)` on success. `acquire` is only called when a
/// reload is actually requested, so a front end can defer file I/O (or
/// skip it entirely if the reload never fires) by wrapping its source
/// in a closure instead of opening it eagerly.
pub fn reload_bytes<F, R>(acquire: F) -> io::Result<Vec<u8>>
where
    F: FnOnce() -> io::Result<R>,
    R: Read,
{
    let mut reader = acquire()?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reload_bytes_reads_the_lazily_acquired_source_fully() {
        let data = reload_bytes(|| Ok::<_, io::Error>(Cursor::new(vec![1u8, 2, 3]))).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn reload_bytes_propagates_acquire_errors() {
        let result =
            reload_bytes(|| Err::<Cursor<Vec<u8>>, _>(io::Error::new(io::ErrorKind::NotFound, "gone")));
        assert!(result.is_err());
    }

    #[test]
    fn acquire_closure_is_not_called_until_invoked() {
        use std::cell::Cell;
        let called = Cell::new(false);
        let closure = || {
            called.set(true);
            Ok::<_, io::Error>(Cursor::new(Vec::<u8>::new()))
        };
        assert!(!called.get());
        let _ = reload_bytes(closure);
        assert!(called.get());
    }
}
