//! Pending-operation bookkeeping shared by every backend.
//!
//! Each in-flight operation owns exactly one entry here from submission
//! until the driver loop removes it, immediately before its completion
//! callback runs. Whatever is still in the table when the reactor is
//! dropped is abandoned: buffers are left untouched and callbacks are not
//! invoked.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use super::{Context, SockAddr};

/// Identifies one in-flight operation. Ids are monotonically increasing,
/// never reused during a reactor's lifetime, and never zero (zero is
/// reserved for internal bookkeeping entries on the ring).
pub type OpId = u64;

pub(crate) const FIRST_OP_ID: OpId = 1;

/// What a submitted operation asked the kernel to do.
///
/// Recv/send buffers are raw caller-owned memory; the caller keeps them
/// valid until the completion callback returns.
#[derive(Debug)]
pub(crate) enum OpKind {
    Socket {
        domain: i32,
        ty: i32,
        protocol: i32,
    },
    Connect {
        fd: RawFd,
        // Boxed so the address stays at a stable location while the kernel
        // reads it, even if the table rehashes.
        addr: Box<SockAddr>,
    },
    Accept {
        fd: RawFd,
    },
    Recv {
        fd: RawFd,
        buf: *mut u8,
        len: usize,
    },
    Send {
        fd: RawFd,
        buf: *const u8,
        len: usize,
    },
    Close {
        fd: RawFd,
    },
}

impl OpKind {
    /// The fd the operation targets, if it targets one.
    pub(crate) fn fd(&self) -> Option<RawFd> {
        match *self {
            OpKind::Socket { .. } => None,
            OpKind::Connect { fd, .. }
            | OpKind::Accept { fd }
            | OpKind::Recv { fd, .. }
            | OpKind::Send { fd, .. }
            | OpKind::Close { fd } => Some(fd),
        }
    }
}

/// One in-flight operation: the caller's context plus what was submitted.
#[derive(Debug)]
pub(crate) struct Pending {
    pub ctx: Context,
    pub kind: OpKind,
}

/// Map from operation id to pending operation.
#[derive(Debug)]
pub(crate) struct OpTable {
    next: OpId,
    entries: HashMap<OpId, Pending>,
}

impl OpTable {
    pub fn new() -> Self {
        Self {
            next: FIRST_OP_ID,
            entries: HashMap::new(),
        }
    }

    /// Hands out the next operation id. A u64 counter cannot wrap within a
    /// reactor's lifetime.
    pub fn allocate(&mut self) -> OpId {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn store(&mut self, id: OpId, op: Pending) {
        debug_assert!(!self.entries.contains_key(&id));
        self.entries.insert(id, op);
    }

    pub fn get(&self, id: OpId) -> Option<&Pending> {
        self.entries.get(&id)
    }

    /// Removes and returns the entry for `id`. Removing an id that was
    /// never stored (or already removed) is a silent no-op, which is what
    /// makes cancelling a completed operation safe.
    pub fn remove(&mut self, id: OpId) -> Option<Pending> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
