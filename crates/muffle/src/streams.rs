//! Process-wide logical streams.
//!
//! Library and test code writes through [`stdout()`], [`stderr()`] and reads
//! through [`stdin()`]. Each of the three streams has exactly one *active
//! destination* at a time. Stream-level capture units swap their substitute
//! into the slot on start and put the previous destination back when
//! suspended or done; nothing else mutates the slots.
//!
//! With no capture active every destination is the real process handle, so
//! the logical streams behave like `std::io::stdout()` and friends except
//! that every write is flushed immediately.

use std::fmt;
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::STDIN_CAPTURED;
use crate::target::CaptureTarget;

/// Growable byte buffer shared between a unit and the stream slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryBuffer(Arc<Mutex<Vec<u8>>>);

impl MemoryBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self, data: &[u8]) {
        self.lock().extend_from_slice(data);
    }

    /// Return everything buffered so far and leave the buffer empty.
    pub(crate) fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Where a logical stream currently sends (or takes) its bytes.
#[derive(Clone)]
pub(crate) enum Destination {
    /// The real process handle for the stream.
    Real(CaptureTarget),
    Memory(MemoryBuffer),
    /// Buffer every write and forward it to `original` as well.
    Tee {
        buffer: MemoryBuffer,
        original: Box<Destination>,
    },
    /// Backing file of a descriptor-level unit.
    File(Arc<File>),
    /// Input placeholder that refuses to be read.
    RefuseInput,
}

impl Destination {
    pub(crate) fn write_all(&self, data: &[u8]) -> io::Result<()> {
        match self {
            Destination::Real(CaptureTarget::Output) => {
                let mut out = io::stdout().lock();
                out.write_all(data)?;
                out.flush()
            }
            Destination::Real(CaptureTarget::Error) => {
                let mut err = io::stderr().lock();
                err.write_all(data)?;
                err.flush()
            }
            Destination::Memory(buffer) => {
                buffer.write(data);
                Ok(())
            }
            Destination::Tee { buffer, original } => {
                buffer.write(data);
                original.write_all(data)
            }
            Destination::File(file) => (&**file).write_all(data),
            Destination::Real(CaptureTarget::Input) | Destination::RefuseInput => Err(
                io::Error::new(io::ErrorKind::Unsupported, "stdin is not writable"),
            ),
        }
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Destination::Real(CaptureTarget::Input) => io::stdin().read(buf),
            Destination::RefuseInput => Err(io::Error::other(STDIN_CAPTURED)),
            Destination::File(file) => (&**file).read(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "output stream is not readable",
            )),
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            Destination::Real(CaptureTarget::Input) => io::stdin().is_terminal(),
            Destination::Real(CaptureTarget::Output) => io::stdout().is_terminal(),
            Destination::Real(CaptureTarget::Error) => io::stderr().is_terminal(),
            Destination::Tee { original, .. } => original.is_terminal(),
            _ => false,
        }
    }

    fn raw_fd(&self) -> io::Result<RawFd> {
        match self {
            Destination::Real(target) => Ok(target.fd()),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "redirected stream is a pseudofile and has no file descriptor",
            )),
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Real(target) => write!(f, "<{target}>"),
            Destination::Memory(buffer) => write!(f, "<memory len={}>", buffer.len()),
            Destination::Tee { buffer, original } => {
                write!(f, "<tee len={} to {:?}>", buffer.len(), original)
            }
            Destination::File(file) => {
                use std::os::fd::AsRawFd;
                write!(f, "<file fd={}>", file.as_raw_fd())
            }
            Destination::RefuseInput => f.write_str("<refuse-input>"),
        }
    }
}

static SLOTS: [Mutex<Destination>; 3] = [
    Mutex::new(Destination::Real(CaptureTarget::Input)),
    Mutex::new(Destination::Real(CaptureTarget::Output)),
    Mutex::new(Destination::Real(CaptureTarget::Error)),
];

fn slot(target: CaptureTarget) -> MutexGuard<'static, Destination> {
    SLOTS[target.index()]
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Make `destination` active for `target`, returning the one it replaced.
pub(crate) fn install(target: CaptureTarget, destination: Destination) -> Destination {
    std::mem::replace(&mut *slot(target), destination)
}

/// The active destination. Cloned so no lock is held while writing.
pub(crate) fn current(target: CaptureTarget) -> Destination {
    slot(target).clone()
}

/// Whether the logical stream for `target` is currently diverted by a capture.
pub fn is_captured(target: CaptureTarget) -> bool {
    !matches!(*slot(target), Destination::Real(_))
}

/// Flush Rust's buffered standard handles before the first capture starts.
///
/// Anything still sitting in `std::io::stdout()`'s line buffer would
/// otherwise be written into the first capture instead of the terminal.
pub fn prepare_environment() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Flush Rust's own handle for `target` before its descriptor is switched.
pub(crate) fn flush_std(target: CaptureTarget) {
    let _ = match target {
        CaptureTarget::Output => io::stdout().flush(),
        CaptureTarget::Error => io::stderr().flush(),
        CaptureTarget::Input => Ok(()),
    };
}

/// Logical standard output.
pub fn stdout() -> LogicalOutput {
    LogicalOutput {
        target: CaptureTarget::Output,
    }
}

/// Logical standard error.
pub fn stderr() -> LogicalOutput {
    LogicalOutput {
        target: CaptureTarget::Error,
    }
}

/// Logical standard input.
pub fn stdin() -> LogicalInput {
    LogicalInput
}

/// Writer for a logical output stream. Cheap to create; holds no lock.
#[derive(Debug, Clone, Copy)]
pub struct LogicalOutput {
    target: CaptureTarget,
}

impl LogicalOutput {
    pub fn target(&self) -> CaptureTarget {
        self.target
    }

    pub fn is_terminal(&self) -> bool {
        current(self.target).is_terminal()
    }
}

impl Write for LogicalOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        current(self.target).write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader for the logical input stream.
#[derive(Debug, Clone, Copy)]
pub struct LogicalInput;

impl LogicalInput {
    /// False whenever input is captured.
    pub fn is_terminal(&self) -> bool {
        current(CaptureTarget::Input).is_terminal()
    }

    /// The descriptor behind the stream, if it has one.
    pub fn raw_fd(&self) -> io::Result<RawFd> {
        current(CaptureTarget::Input).raw_fd()
    }
}

impl Read for LogicalInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        current(CaptureTarget::Input).read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_install_returns_previous_and_restores() {
        let buffer = MemoryBuffer::default();
        let previous = install(CaptureTarget::Error, Destination::Memory(buffer.clone()));
        assert!(matches!(previous, Destination::Real(CaptureTarget::Error)));
        assert!(is_captured(CaptureTarget::Error));

        write!(stderr(), "diverted").unwrap();
        install(CaptureTarget::Error, previous);

        assert!(!is_captured(CaptureTarget::Error));
        assert_eq!(buffer.take(), b"diverted");
        assert!(buffer.take().is_empty());
    }

    #[test]
    #[serial]
    fn test_refuse_input() {
        let previous = install(CaptureTarget::Input, Destination::RefuseInput);
        let mut buf = [0u8; 4];
        let err = stdin().read(&mut buf).unwrap_err();
        let is_terminal = stdin().is_terminal();
        let fd = stdin().raw_fd();
        install(CaptureTarget::Input, previous);

        assert_eq!(err.to_string(), STDIN_CAPTURED);
        assert!(!is_terminal);
        assert_eq!(fd.unwrap_err().kind(), io::ErrorKind::Unsupported);
        assert_eq!(stdin().raw_fd().unwrap(), 0);
    }

    #[test]
    #[serial]
    fn test_tee_writes_both() {
        let outer = MemoryBuffer::default();
        let inner = MemoryBuffer::default();
        let previous = install(CaptureTarget::Output, Destination::Memory(outer.clone()));
        let tee = Destination::Tee {
            buffer: inner.clone(),
            original: Box::new(current(CaptureTarget::Output)),
        };
        let memory = install(CaptureTarget::Output, tee);

        stdout().write_all(b"x").unwrap();

        install(CaptureTarget::Output, memory);
        install(CaptureTarget::Output, previous);
        assert_eq!(inner.take(), b"x");
        assert_eq!(outer.take(), b"x");
    }

    #[test]
    fn test_output_slot_is_not_readable() {
        let err = Destination::Memory(MemoryBuffer::default())
            .read(&mut [0u8; 1])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
