//! Completion-based I/O reactor.
//!
//! Every socket and file-descriptor operation in prise goes through the
//! [`Reactor`]: callers submit work, get back an operation id immediately,
//! and observe the outcome later through a callback invoked from the driver
//! loop. The same completion vocabulary is produced by all backends:
//!
//! - **io_uring** (Linux): operations map one-to-one onto submission queue
//!   entries and the kernel reports true completions.
//! - **kqueue** (macOS): the kernel reports readiness; the backend performs
//!   the actual syscall when the filter fires and synthesizes an
//!   io_uring-shaped completion, so callers never branch on platform.
//! - **mock**: in-memory backend for tests with deterministic completion
//!   injection through the same driver path.
//!
//! ## Ordering contract
//!
//! Within a single operation id there is exactly one completion. Across
//! distinct ids, completions may be observed in any order; callers must not
//! rely on submission order. Callbacks run on the driver thread only. They
//! may re-enter any reactor operation, including submitting further work
//! and cancelling, but they must not block; blocking needs are expressed by
//! submitting another operation.

use std::ffi::c_void;
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use thiserror::Error;
use tracing::{trace, warn};

use crate::error::Result;

pub(crate) mod table;

#[cfg(io_backend = "io_uring")]
mod uring;

#[cfg(io_backend = "kqueue")]
mod kqueue;

mod mock;

use table::{OpKind, OpTable, Pending};

pub use table::OpId;

/// A kernel-level fault translated into the reactor's error vocabulary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// `connect` saw `ECONNREFUSED`; used to detect stale sockets.
    #[error("connection refused")]
    ConnectionRefused,

    /// `EINPROGRESS` or `EAGAIN`. The kqueue backend absorbs this and
    /// re-arms internally; io_uring propagates it to the callback.
    #[error("operation would block")]
    WouldBlock,

    /// Anything else, with the raw errno preserved for logging.
    #[error("os error {0}")]
    Os(i32),
}

impl IoError {
    pub(crate) fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ECONNREFUSED => IoError::ConnectionRefused,
            libc::EINPROGRESS | libc::EAGAIN => IoError::WouldBlock,
            code => IoError::Os(code),
        }
    }
}

/// Describes the outcome of one finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Socket { fd: RawFd },
    Connect,
    Accept { fd: RawFd },
    /// `bytes == 0` means the peer closed the connection.
    Recv { bytes: usize },
    /// Short sends are possible; the caller reissues for the remainder.
    Send { bytes: usize },
    Close,
    Error(IoError),
}

/// Completion callback. Invoked exactly once per operation, from the driver
/// loop. An error returned here propagates out of [`Reactor::run`].
pub type Callback = fn(&mut Reactor, Completion) -> Result<()>;

/// Caller context attached to a submission: an opaque pointer to the
/// caller's own state (never dereferenced by the reactor), a small tag for
/// multiplexing several outstanding operations over one callback, and the
/// callback itself.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub userdata: *mut c_void,
    pub tag: u16,
    pub callback: Callback,
}

impl Context {
    pub fn new(userdata: *mut c_void, tag: u16, callback: Callback) -> Self {
        Self {
            userdata,
            tag,
            callback,
        }
    }
}

/// Record handed to a completion callback. `userdata`, `tag` and `callback`
/// are copied verbatim from the originating [`Context`] so the callback can
/// re-enter its own state machine.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub userdata: *mut c_void,
    pub tag: u16,
    pub callback: Callback,
    pub kind: CompletionKind,
}

/// An owned socket address with a stable in-memory location.
#[derive(Clone)]
pub struct SockAddr {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl SockAddr {
    /// Builds an `AF_UNIX` address for `path`.
    pub fn unix<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let bytes = path.as_ref().as_os_str().as_bytes();
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let base = &storage as *const libc::sockaddr_storage as usize;
        // SAFETY: sockaddr_un fits inside sockaddr_storage by definition.
        let sun = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_un) };
        if bytes.len() >= sun.sun_path.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "socket path too long for sockaddr_un",
            ));
        }
        sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        let path_offset = sun.sun_path.as_ptr() as usize - base;
        let len = (path_offset + bytes.len() + 1) as libc::socklen_t;
        Ok(Self { storage, len })
    }

    pub fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const libc::sockaddr_storage as *const libc::sockaddr
    }

    pub fn len(&self) -> libc::socklen_t {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn family(&self) -> libc::sa_family_t {
        self.storage.ss_family
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SockAddr")
            .field("family", &self.family())
            .field("len", &self.len)
            .finish()
    }
}

/// How long [`Reactor::run`] drives the submit/drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Submit pending work and drain whatever completions are already
    /// available, without waiting. Returns even if nothing completed.
    Once,
    /// Repeat submit/drain, waiting for at least one completion per
    /// iteration, until no operations remain in flight.
    UntilDone,
    /// Like `UntilDone` but with no exit condition; stopped by dropping
    /// the reactor (or by a callback error).
    Forever,
}

enum Backend {
    #[cfg(io_backend = "io_uring")]
    Uring(uring::UringBackend),
    #[cfg(io_backend = "kqueue")]
    Kqueue(kqueue::KqueueBackend),
    Mock(mock::MockBackend),
}

/// The platform-selected reactor.
///
/// One reactor is bound to one thread; it holds raw caller pointers and is
/// deliberately neither `Send` nor `Sync`. Dropping a reactor abandons any
/// in-flight operations: their buffers are not touched and their callbacks
/// are never invoked. Callers that rebuild a reactor (for example after a
/// refused connect) must therefore drop every operation id they were
/// holding, since a fresh reactor restarts id allocation.
pub struct Reactor {
    table: OpTable,
    backend: Backend,
}

impl Reactor {
    /// Creates a reactor on the kernel backend selected at build time.
    pub fn new() -> Result<Self> {
        let backend = {
            #[cfg(io_backend = "io_uring")]
            {
                Backend::Uring(uring::UringBackend::new(crate::config::RING_ENTRIES)?)
            }
            #[cfg(io_backend = "kqueue")]
            {
                Backend::Kqueue(kqueue::KqueueBackend::new()?)
            }
            #[cfg(not(any(io_backend = "io_uring", io_backend = "kqueue")))]
            {
                return Err(crate::Error::Backend(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "no kernel I/O backend on this platform",
                )));
            }
        };
        Ok(Self {
            table: OpTable::new(),
            backend,
        })
    }

    /// Creates a reactor on the deterministic in-memory backend used by
    /// tests. File descriptors are synthesized starting at 3.
    pub fn mock() -> Self {
        Self {
            table: OpTable::new(),
            backend: Backend::Mock(mock::MockBackend::new()),
        }
    }

    /// Number of operations currently in flight.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    /// Opens a socket. Completes with [`CompletionKind::Socket`] carrying
    /// the new fd, which the caller owns from then on.
    pub fn socket(&mut self, domain: i32, ty: i32, protocol: i32, ctx: Context) -> OpId {
        self.submit(OpKind::Socket { domain, ty, protocol }, ctx)
    }

    /// Connects `fd` to `addr`. Completes with [`CompletionKind::Connect`],
    /// or [`IoError::ConnectionRefused`] when nobody is listening.
    pub fn connect(&mut self, fd: RawFd, addr: SockAddr, ctx: Context) -> OpId {
        self.submit(
            OpKind::Connect {
                fd,
                addr: Box::new(addr),
            },
            ctx,
        )
    }

    /// Accepts one connection on the listening `fd`. Completes with
    /// [`CompletionKind::Accept`] carrying the connection fd.
    pub fn accept(&mut self, fd: RawFd, ctx: Context) -> OpId {
        self.submit(OpKind::Accept { fd }, ctx)
    }

    /// Receives into `buf`. Completes with [`CompletionKind::Recv`]; zero
    /// bytes means the peer closed. On error the buffer is untouched.
    ///
    /// # Safety
    ///
    /// `buf` is borrowed by the reactor: it must stay valid, and must not
    /// be read or written elsewhere, until the completion callback for the
    /// returned id has run or the reactor is dropped.
    pub unsafe fn recv(&mut self, fd: RawFd, buf: &mut [u8], ctx: Context) -> OpId {
        self.submit(
            OpKind::Recv {
                fd,
                buf: buf.as_mut_ptr(),
                len: buf.len(),
            },
            ctx,
        )
    }

    /// Sends from `buf`. Completes with [`CompletionKind::Send`]; short
    /// sends are possible and the caller reissues for the remainder. The
    /// reactor never mutates the buffer.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid and unmodified until the completion callback
    /// for the returned id has run or the reactor is dropped.
    pub unsafe fn send(&mut self, fd: RawFd, buf: &[u8], ctx: Context) -> OpId {
        self.submit(
            OpKind::Send {
                fd,
                buf: buf.as_ptr(),
                len: buf.len(),
            },
            ctx,
        )
    }

    /// Closes `fd`. Best-effort: the completion is always
    /// [`CompletionKind::Close`], never an error.
    pub fn close(&mut self, fd: RawFd, ctx: Context) -> OpId {
        self.submit(OpKind::Close { fd }, ctx)
    }

    fn submit(&mut self, kind: OpKind, ctx: Context) -> OpId {
        let id = self.table.allocate();
        let op = Pending { ctx, kind };
        match &mut self.backend {
            #[cfg(io_backend = "io_uring")]
            Backend::Uring(b) => b.prepare(id, &op),
            #[cfg(io_backend = "kqueue")]
            Backend::Kqueue(b) => b.prepare(id, &op),
            Backend::Mock(b) => b.prepare(id, &op),
        }
        trace!(id, kind = ?op.kind, "submitted");
        self.table.store(id, op);
        id
    }

    /// Requests cancellation of an in-flight operation. Best-effort and
    /// immediate: the kernel may already have progressed, in which case the
    /// operation's normal completion still fires and the caller must treat
    /// it as stale. Unknown ids are silently ignored. At most one
    /// completion is delivered for a cancelled id.
    pub fn cancel(&mut self, id: OpId) {
        match &mut self.backend {
            #[cfg(io_backend = "io_uring")]
            Backend::Uring(b) => {
                // The entry stays until the kernel reports the op's fate
                // (real result or -ECANCELED); either is its one completion.
                if self.table.contains(id) {
                    b.cancel(id);
                }
            }
            #[cfg(io_backend = "kqueue")]
            Backend::Kqueue(b) => {
                // The op never reached the kernel; dequeue and forget it.
                if let Some(op) = self.table.get(id) {
                    b.cancel(id, op);
                    self.table.remove(id);
                }
            }
            Backend::Mock(_) => {
                // Modelled as "past the cancellation point": a test hook may
                // still complete the op, exercising the stale-completion
                // tolerance the contract requires of callers.
                trace!(id, "cancel requested; mock op may still complete");
            }
        }
    }

    /// Drives the submit/drain loop. Propagates kernel errors and any error
    /// returned by a completion callback.
    pub fn run(&mut self, mode: RunMode) -> Result<()> {
        match mode {
            RunMode::Once => self.tick(false),
            RunMode::UntilDone => {
                while !self.table.is_empty() {
                    self.tick(true)?;
                }
                Ok(())
            }
            RunMode::Forever => loop {
                self.tick(true)?;
            },
        }
    }

    fn tick(&mut self, wait: bool) -> Result<()> {
        let ready = match &mut self.backend {
            #[cfg(io_backend = "io_uring")]
            Backend::Uring(b) => b.drain(&mut self.table, wait)?,
            #[cfg(io_backend = "kqueue")]
            Backend::Kqueue(b) => b.drain(&mut self.table, wait)?,
            Backend::Mock(b) => b.drain(wait)?,
        };
        for (id, kind) in ready {
            // The entry is removed before the callback runs, so callbacks
            // can resubmit and cancel freely.
            let Some(op) = self.table.remove(id) else {
                trace!(id, "dropping completion for an op no longer tracked");
                continue;
            };
            let completion = Completion {
                userdata: op.ctx.userdata,
                tag: op.ctx.tag,
                callback: op.ctx.callback,
                kind,
            };
            trace!(id, kind = ?kind, "completing");
            (op.ctx.callback)(self, completion)?;
        }
        Ok(())
    }

    /// Mock backend only: succeeds the connect pending on `fd`. The
    /// completion is delivered by the next `run` call.
    pub fn complete_connect(&mut self, fd: RawFd) {
        self.inject(fd, CompletionKind::Connect);
    }

    /// Mock backend only: fails the operation pending on `fd` with `err`.
    pub fn complete_error(&mut self, fd: RawFd, err: IoError) {
        self.inject(fd, CompletionKind::Error(err));
    }

    /// Mock backend only: completes the recv pending on `fd` with `bytes`.
    pub fn complete_recv(&mut self, fd: RawFd, bytes: usize) {
        self.inject(fd, CompletionKind::Recv { bytes });
    }

    /// Mock backend only: completes the send pending on `fd` with `bytes`.
    pub fn complete_send(&mut self, fd: RawFd, bytes: usize) {
        self.inject(fd, CompletionKind::Send { bytes });
    }

    fn inject(&mut self, fd: RawFd, kind: CompletionKind) {
        match &mut self.backend {
            Backend::Mock(b) => b.complete(fd, kind),
            #[allow(unreachable_patterns)]
            _ => warn!(fd, ?kind, "completion injection on a non-mock reactor"),
        }
    }
}
