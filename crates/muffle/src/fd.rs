//! Descriptor-level capture: redirect descriptor 0, 1 or 2 itself.
//!
//! Capturing at this level sees everything written to the descriptor: Rust
//! code, C libraries, and child processes that inherit it. The scheme:
//!
//! 1. If the target descriptor is closed, point it at `/dev/null` first so
//!    the rest of the scheme does not depend on outside state.
//! 2. Duplicate the target (the *saved* descriptor) for restoring later.
//! 3. Create an unnamed temporary file and `dup2` it onto the target.
//!    The logical stream for the target writes into the same file.
//!
//! Suspend and resume just `dup2` the saved descriptor or the temporary
//! file back onto the target.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::capture::Capture;
use crate::encoding::Encoding;
use crate::error::{CaptureError, Result};
use crate::state::{CaptureState, ACTIVE, ANY, START};
use crate::streams;
use crate::sys::SysCapture;
use crate::target::CaptureTarget;

/// Resources held between `start` and `done`.
struct Redirect {
    /// Duplicate of the target taken at start; restored by `done`.
    saved: File,
    /// `/dev/null` descriptor opened because the target was closed.
    null_substitute: Option<RawFd>,
    tmpfile: Arc<File>,
    stream: SysCapture<Vec<u8>>,
}

/// Captures one standard descriptor into a temporary file.
pub struct FdCapture<E> {
    target: CaptureTarget,
    state: CaptureState,
    redirect: Option<Redirect>,
    _encoding: PhantomData<fn() -> E>,
}

impl<E: Encoding> FdCapture<E> {
    pub fn new(target: CaptureTarget) -> Self {
        Self {
            target,
            state: CaptureState::Initialized,
            redirect: None,
            _encoding: PhantomData,
        }
    }

    /// The saved copy of the original descriptor, while capturing.
    pub fn saved_fd(&self) -> Option<RawFd> {
        self.redirect.as_ref().map(|r| r.saved.as_raw_fd())
    }

    fn fd(&self) -> RawFd {
        self.target.fd()
    }

    fn open_redirect(&self) -> Result<Redirect> {
        let fd = self.fd();

        let null_substitute = if fd_is_valid(fd) {
            None
        } else {
            let null = OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/null")
                .map_err(|source| CaptureError::Os {
                    op: "open /dev/null",
                    fd,
                    source,
                })?
                .into_raw_fd();
            if let Err(e) = dup2(null, fd) {
                let _ = close(null);
                return Err(e);
            }
            Some(null)
        };

        let (saved, tmpfile) = match self.open_saved_and_backing() {
            Ok(opened) => opened,
            Err(e) => {
                if let Some(null) = null_substitute {
                    if let Err(close_err) = close_null_substitute(null, fd) {
                        warn!(fd, error = %close_err, "failed to close /dev/null substitute");
                    }
                }
                return Err(e);
            }
        };
        let tmpfile = Arc::new(tmpfile);

        Ok(Redirect {
            saved: File::from(saved),
            null_substitute,
            stream: SysCapture::with_file(self.target, tmpfile.clone()),
            tmpfile,
        })
    }

    fn open_saved_and_backing(&self) -> Result<(OwnedFd, File)> {
        let fd = self.fd();
        // SAFETY: `fd` is open: it was valid or has just been pointed at /dev/null.
        let saved = unsafe { BorrowedFd::borrow_raw(fd) }
            .try_clone_to_owned()
            .map_err(|source| CaptureError::Os {
                op: "dup",
                fd,
                source,
            })?;

        let tmpfile = match self.target {
            CaptureTarget::Input => File::open("/dev/null"),
            _ => tempfile::tempfile(),
        }
        .map_err(|source| CaptureError::Os {
            op: "create backing file",
            fd,
            source,
        })?;
        Ok((saved, tmpfile))
    }
}

impl<E: Encoding> Capture for FdCapture<E> {
    type Output = E;

    fn target(&self) -> CaptureTarget {
        self.target
    }

    fn state(&self) -> CaptureState {
        self.state
    }

    fn start(&mut self) -> Result<()> {
        self.state.check("start", START)?;
        let mut redirect = self.open_redirect()?;

        streams::flush_std(self.target);
        dup2(redirect.tmpfile.as_raw_fd(), self.fd())?;
        redirect.stream.start()?;

        debug!(
            fd = self.fd(),
            saved = redirect.saved.as_raw_fd(),
            "descriptor capture started"
        );
        self.redirect = Some(redirect);
        self.state = CaptureState::Started;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.state.check("suspend", ACTIVE)?;
        if self.state == CaptureState::Suspended {
            return Ok(());
        }
        if let Some(redirect) = &mut self.redirect {
            redirect.stream.suspend()?;
            streams::flush_std(self.target);
            dup2(redirect.saved.as_raw_fd(), self.target.fd())?;
        }
        self.state = CaptureState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.state.check("resume", ACTIVE)?;
        if self.state == CaptureState::Started {
            return Ok(());
        }
        if let Some(redirect) = &mut self.redirect {
            redirect.stream.resume()?;
            streams::flush_std(self.target);
            dup2(redirect.tmpfile.as_raw_fd(), self.target.fd())?;
        }
        self.state = CaptureState::Started;
        Ok(())
    }

    fn snap(&mut self) -> Result<E> {
        self.state.check("snap", ACTIVE)?;
        if self.target == CaptureTarget::Input {
            return Ok(E::default());
        }
        streams::flush_std(self.target);
        let bytes = match &self.redirect {
            Some(redirect) => drain_file(&redirect.tmpfile)?,
            None => Vec::new(),
        };
        Ok(E::decode(bytes))
    }

    fn done(&mut self) -> Result<()> {
        self.state.check("done", ANY)?;
        if self.state == CaptureState::Done {
            return Ok(());
        }
        let fd = self.fd();
        if let Some(redirect) = &self.redirect {
            streams::flush_std(self.target);
            dup2(redirect.saved.as_raw_fd(), fd)?;
        }
        if let Some(mut redirect) = self.redirect.take() {
            drop(redirect.saved);
            if let Some(null) = redirect.null_substitute {
                close_null_substitute(null, fd)?;
            }
            redirect.stream.done()?;
        }
        self.state = CaptureState::Done;
        debug!(fd, "descriptor capture done");
        Ok(())
    }

    fn write_original(&mut self, data: &E) -> Result<()> {
        self.state.check("write_original", ACTIVE)?;
        if let Some(redirect) = &self.redirect {
            (&redirect.saved)
                .write_all(data.as_bytes())
                .map_err(|source| CaptureError::Os {
                    op: "write",
                    fd: redirect.saved.as_raw_fd(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl<E> fmt::Debug for FdCapture<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redirect = self.redirect.as_ref();
        f.debug_struct("FdCapture")
            .field("fd", &self.target.fd())
            .field("saved", &redirect.map(|r| r.saved.as_raw_fd()))
            .field("state", &self.state)
            .field("tmpfile", &redirect.map(|r| r.tmpfile.as_raw_fd()))
            .finish()
    }
}

impl<E> Drop for FdCapture<E> {
    fn drop(&mut self) {
        let Some(redirect) = self.redirect.take() else {
            return;
        };
        let fd = self.target.fd();
        warn!(fd, "descriptor capture dropped while active, restoring");
        if let Err(e) = dup2(redirect.saved.as_raw_fd(), fd) {
            warn!(error = %e, "failed to restore descriptor");
        }
        if let Some(null) = redirect.null_substitute {
            let _ = close_null_substitute(null, fd);
        }
    }
}

/// Read everything in `file`, then empty it. The next write lands at offset 0.
pub(crate) fn drain_file(file: &File) -> io::Result<Vec<u8>> {
    let mut reader = file;
    reader.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    reader.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    Ok(bytes)
}

fn fd_is_valid(fd: RawFd) -> bool {
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat only writes into the provided buffer.
    unsafe { libc::fstat(fd, stat.as_mut_ptr()) == 0 }
}

fn dup2(src: RawFd, dst: RawFd) -> Result<()> {
    // SAFETY: plain descriptor syscall; failure is reported through errno.
    if unsafe { libc::dup2(src, dst) } == -1 {
        return Err(CaptureError::last_os("dup2", dst));
    }
    Ok(())
}

fn close(fd: RawFd) -> Result<()> {
    // SAFETY: only called on descriptors this module opened or redirected.
    if unsafe { libc::close(fd) } == -1 {
        return Err(CaptureError::last_os("close", fd));
    }
    Ok(())
}

/// Put a target that was found closed back in that state.
fn close_null_substitute(null: RawFd, fd: RawFd) -> Result<()> {
    if null != fd {
        close(fd)?;
    }
    close(null)
}
