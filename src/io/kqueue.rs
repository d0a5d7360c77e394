#![cfg(io_backend = "kqueue")]

//! kqueue backend for macOS.
//!
//! kqueue reports readiness rather than completions, so this backend keeps
//! a small per-fd state machine: pending operations queue up per direction,
//! the fd's filter registration tracks which directions are wanted, and the
//! actual syscall runs when the filter fires. The result is translated into
//! the same completion vocabulary the io_uring backend produces, so callers
//! never branch on platform.
//!
//! Readiness is delivered by `mio`, which is kqueue-backed on macOS and
//! maps readable/writable interest onto `EVFILT_READ`/`EVFILT_WRITE`.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use crate::config;
use crate::io::table::{OpKind, OpTable, Pending};
use crate::io::{CompletionKind, IoError, OpId, SockAddr};

#[derive(Default)]
struct FdQueues {
    read: VecDeque<OpId>,
    write: VecDeque<OpId>,
    registered: Option<Interest>,
}

pub(crate) struct KqueueBackend {
    poll: Poll,
    events: Events,
    fds: HashMap<RawFd, FdQueues>,
    /// Synchronously finished ops. Delivery waits for the next run
    /// iteration so callbacks always fire from the driver loop.
    ready: Vec<(OpId, CompletionKind)>,
}

impl KqueueBackend {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        debug!("kqueue backend ready");
        Ok(Self {
            poll,
            events: Events::with_capacity(config::EVENT_CAPACITY),
            fds: HashMap::new(),
            ready: Vec::new(),
        })
    }

    pub fn prepare(&mut self, id: OpId, op: &Pending) {
        match &op.kind {
            OpKind::Socket {
                domain,
                ty,
                protocol,
            } => {
                let kind = match syscall::socket(*domain, *ty, *protocol) {
                    Ok(fd) => CompletionKind::Socket { fd },
                    Err(errno) => CompletionKind::Error(IoError::from_errno(errno)),
                };
                self.ready.push((id, kind));
            }
            OpKind::Connect { fd, addr } => match syscall::connect(*fd, addr) {
                Ok(()) => self.ready.push((id, CompletionKind::Connect)),
                Err(libc::EINPROGRESS) => self.enqueue_write(*fd, id),
                Err(errno) => self
                    .ready
                    .push((id, CompletionKind::Error(IoError::from_errno(errno)))),
            },
            OpKind::Accept { fd } | OpKind::Recv { fd, .. } => self.enqueue_read(*fd, id),
            OpKind::Send { fd, buf, len } => match syscall::send(*fd, *buf, *len) {
                Ok(n) => self.ready.push((id, CompletionKind::Send { bytes: n })),
                Err(libc::EAGAIN) => self.enqueue_write(*fd, id),
                Err(errno) => self
                    .ready
                    .push((id, CompletionKind::Error(IoError::from_errno(errno)))),
            },
            OpKind::Close { fd } => {
                // Close is best-effort and never fails the callback.
                if let Err(errno) = syscall::close(*fd) {
                    warn!(fd = *fd, errno, "close failed");
                }
                self.fds.remove(fd);
                self.ready.push((id, CompletionKind::Close));
            }
        }
    }

    /// Dequeues a not-yet-performed op. Nothing reached the kernel for it,
    /// so no completion will be delivered.
    pub fn cancel(&mut self, id: OpId, op: &Pending) {
        self.ready.retain(|&(ready_id, _)| ready_id != id);
        let Some(fd) = op.kind.fd() else { return };
        if let Some(q) = self.fds.get_mut(&fd) {
            q.read.retain(|&queued| queued != id);
            q.write.retain(|&queued| queued != id);
            let empty = {
                update_interest(&mut self.poll, fd, q);
                q.read.is_empty() && q.write.is_empty()
            };
            if empty {
                self.fds.remove(&fd);
            }
        }
    }

    pub fn drain(
        &mut self,
        table: &mut OpTable,
        wait: bool,
    ) -> io::Result<Vec<(OpId, CompletionKind)>> {
        let mut ready = std::mem::take(&mut self.ready);
        // Only block when nothing is deliverable yet; and never block with
        // no registrations, since no event could ever wake us.
        let block = wait && ready.is_empty();
        if block && self.fds.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no pending readiness to wait for",
            ));
        }
        let timeout = if block { None } else { Some(Duration::ZERO) };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        let fired: Vec<(RawFd, bool, bool)> = self
            .events
            .iter()
            .map(|ev| (ev.token().0 as RawFd, ev.is_readable(), ev.is_writable()))
            .collect();
        for (fd, readable, writable) in fired {
            if readable {
                self.service_read(fd, table, &mut ready);
            }
            if writable {
                self.service_write(fd, table, &mut ready);
            }
        }
        Ok(ready)
    }

    /// Performs the syscalls for ops queued on a now-readable fd. `EAGAIN`
    /// leaves the queue armed: wake-ups can be spurious.
    fn service_read(&mut self, fd: RawFd, table: &mut OpTable, ready: &mut Vec<(OpId, CompletionKind)>) {
        let Some(q) = self.fds.get_mut(&fd) else { return };
        while let Some(&id) = q.read.front() {
            let Some(op) = table.get(id) else {
                q.read.pop_front();
                continue;
            };
            let kind = match &op.kind {
                OpKind::Accept { .. } => match syscall::accept(fd) {
                    Ok(conn) => CompletionKind::Accept { fd: conn },
                    Err(libc::EAGAIN) => break,
                    Err(errno) => CompletionKind::Error(IoError::from_errno(errno)),
                },
                OpKind::Recv { buf, len, .. } => match syscall::recv(fd, *buf, *len) {
                    Ok(n) => CompletionKind::Recv { bytes: n },
                    Err(libc::EAGAIN) => break,
                    Err(errno) => CompletionKind::Error(IoError::from_errno(errno)),
                },
                other => {
                    warn!(fd, kind = ?other, "non-read op queued for readability");
                    CompletionKind::Error(IoError::Os(libc::EINVAL))
                }
            };
            q.read.pop_front();
            ready.push((id, kind));
        }
        let empty = {
            update_interest(&mut self.poll, fd, q);
            q.read.is_empty() && q.write.is_empty()
        };
        if empty {
            self.fds.remove(&fd);
        }
    }

    /// Resolves ops waiting for writability: in-progress connects (checked
    /// through `SO_ERROR`) and backed-up sends.
    fn service_write(&mut self, fd: RawFd, table: &mut OpTable, ready: &mut Vec<(OpId, CompletionKind)>) {
        let Some(q) = self.fds.get_mut(&fd) else { return };
        while let Some(&id) = q.write.front() {
            let Some(op) = table.get(id) else {
                q.write.pop_front();
                continue;
            };
            let kind = match &op.kind {
                OpKind::Connect { .. } => match syscall::so_error(fd) {
                    0 => CompletionKind::Connect,
                    errno => CompletionKind::Error(IoError::from_errno(errno)),
                },
                OpKind::Send { buf, len, .. } => match syscall::send(fd, *buf, *len) {
                    Ok(n) => CompletionKind::Send { bytes: n },
                    Err(libc::EAGAIN) => break,
                    Err(errno) => CompletionKind::Error(IoError::from_errno(errno)),
                },
                other => {
                    warn!(fd, kind = ?other, "non-write op queued for writability");
                    CompletionKind::Error(IoError::Os(libc::EINVAL))
                }
            };
            q.write.pop_front();
            ready.push((id, kind));
        }
        let empty = {
            update_interest(&mut self.poll, fd, q);
            q.read.is_empty() && q.write.is_empty()
        };
        if empty {
            self.fds.remove(&fd);
        }
    }

    fn enqueue_read(&mut self, fd: RawFd, id: OpId) {
        let q = self.fds.entry(fd).or_default();
        q.read.push_back(id);
        update_interest(&mut self.poll, fd, q);
        trace!(fd, id, "armed for readability");
    }

    fn enqueue_write(&mut self, fd: RawFd, id: OpId) {
        let q = self.fds.entry(fd).or_default();
        q.write.push_back(id);
        update_interest(&mut self.poll, fd, q);
        trace!(fd, id, "armed for writability");
    }
}

/// Reconciles the fd's filter registration with what its queues need.
fn update_interest(poll: &mut Poll, fd: RawFd, q: &mut FdQueues) {
    let want = match (!q.read.is_empty(), !q.write.is_empty()) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    };
    if want == q.registered {
        return;
    }
    let mut source = SourceFd(&fd);
    let token = Token(fd as usize);
    let result = match (q.registered, want) {
        (None, Some(interest)) => poll.registry().register(&mut source, token, interest),
        (Some(_), Some(interest)) => poll.registry().reregister(&mut source, token, interest),
        (Some(_), None) => poll.registry().deregister(&mut source),
        (None, None) => Ok(()),
    };
    if let Err(e) = result {
        warn!(fd, error = %e, "kqueue filter registration failed");
    }
    q.registered = want;
}

/// Thin raw-syscall wrappers returning errno on failure.
mod syscall {
    use super::*;

    fn last_errno() -> i32 {
        io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
    }

    fn set_nonblocking(fd: RawFd) {
        // SAFETY: plain fcntl on an fd we just created or accepted.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }

    pub fn socket(domain: i32, ty: i32, protocol: i32) -> Result<RawFd, i32> {
        // SAFETY: socket(2) with caller-supplied family/type/protocol.
        let fd = unsafe { libc::socket(domain, ty, protocol) };
        if fd < 0 {
            return Err(last_errno());
        }
        set_nonblocking(fd);
        Ok(fd)
    }

    pub fn connect(fd: RawFd, addr: &SockAddr) -> Result<(), i32> {
        // SAFETY: the address is owned by the pending op and outlives the call.
        let rc = unsafe { libc::connect(fd, addr.as_ptr(), addr.len()) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(())
    }

    pub fn accept(fd: RawFd) -> Result<RawFd, i32> {
        // SAFETY: the peer address is discarded, so null out-pointers are fine.
        let conn = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if conn < 0 {
            return Err(last_errno());
        }
        set_nonblocking(conn);
        Ok(conn)
    }

    pub fn recv(fd: RawFd, buf: *mut u8, len: usize) -> Result<usize, i32> {
        // SAFETY: the buffer is borrowed from the caller until its
        // completion fires, and is at least `len` bytes.
        let n = unsafe { libc::recv(fd, buf as *mut libc::c_void, len, 0) };
        if n < 0 {
            return Err(last_errno());
        }
        Ok(n as usize)
    }

    pub fn send(fd: RawFd, buf: *const u8, len: usize) -> Result<usize, i32> {
        // SAFETY: as for recv; the reactor never mutates a send buffer.
        let n = unsafe { libc::send(fd, buf as *const libc::c_void, len, 0) };
        if n < 0 {
            return Err(last_errno());
        }
        Ok(n as usize)
    }

    pub fn close(fd: RawFd) -> Result<(), i32> {
        // SAFETY: the caller handed ownership of `fd` to this op.
        let rc = unsafe { libc::close(fd) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(())
    }

    /// Reads and clears the pending socket error after an in-progress
    /// connect resolves.
    pub fn so_error(fd: RawFd) -> i32 {
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: out-parameters sized for a c_int.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc < 0 {
            return last_errno();
        }
        err
    }
}
