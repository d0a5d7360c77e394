//! Deterministic in-memory backend for tests.
//!
//! Mirrors the façade exactly: pending operations are tracked per fd, and
//! test hooks on [`Reactor`](crate::io::Reactor) synthesize completions
//! that drain through the normal driver path, so tests exercise the same
//! state machine as production. `socket` and `close` complete on their own;
//! everything else waits for a hook.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;

use tracing::warn;

use crate::io::table::{OpKind, Pending};
use crate::io::{CompletionKind, OpId};

/// First synthesized file descriptor, right after stdio.
const FIRST_MOCK_FD: RawFd = 3;

pub(crate) struct MockBackend {
    ready: VecDeque<(OpId, CompletionKind)>,
    by_fd: HashMap<RawFd, OpId>,
    next_fd: RawFd,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            by_fd: HashMap::new(),
            next_fd: FIRST_MOCK_FD,
        }
    }

    pub fn prepare(&mut self, id: OpId, op: &Pending) {
        match &op.kind {
            OpKind::Socket { .. } => {
                let fd = self.next_fd;
                self.next_fd += 1;
                self.ready.push_back((id, CompletionKind::Socket { fd }));
            }
            OpKind::Close { fd } => {
                self.by_fd.remove(fd);
                self.ready.push_back((id, CompletionKind::Close));
            }
            OpKind::Connect { fd, .. }
            | OpKind::Accept { fd }
            | OpKind::Recv { fd, .. }
            | OpKind::Send { fd, .. } => {
                if let Some(previous) = self.by_fd.insert(*fd, id) {
                    warn!(fd = *fd, previous, "mock: replacing the op pending on fd");
                }
            }
        }
    }

    /// Test hook: completes the op pending on `fd` with `kind`. Delivery
    /// happens on the next drain.
    pub fn complete(&mut self, fd: RawFd, kind: CompletionKind) {
        match self.by_fd.remove(&fd) {
            Some(id) => self.ready.push_back((id, kind)),
            None => warn!(fd, ?kind, "mock: no op pending on fd"),
        }
    }

    /// Hands over everything synthesized so far. A waiting drain with
    /// nothing ready is a test bug, reported as an error rather than a
    /// deadlock.
    pub fn drain(&mut self, wait: bool) -> io::Result<Vec<(OpId, CompletionKind)>> {
        if wait && self.ready.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "mock reactor has nothing to wait for",
            ));
        }
        Ok(self.ready.drain(..).collect())
    }
}
