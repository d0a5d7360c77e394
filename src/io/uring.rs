#![cfg(io_backend = "io_uring")]

//! Linux io_uring backend.
//!
//! One submission queue entry per façade operation, with `user_data`
//! carrying the operation id. Draining copies completion entries out in
//! batches and translates the kernel return code into the shared completion
//! vocabulary before the driver loop dispatches callbacks.

use std::io;
use std::ptr;

use io_uring::{opcode, squeue, types, IoUring};
use tracing::{debug, trace, warn};

use crate::config;
use crate::io::table::{OpKind, OpTable, Pending};
use crate::io::{CompletionKind, IoError, OpId};

/// `user_data` of internal cancellation entries. Operation ids start at 1,
/// so zero never collides with a real operation.
const CANCEL_DATA: u64 = 0;

pub(crate) struct UringBackend {
    ring: IoUring,
    /// Completions synthesized in userspace, e.g. when the submission queue
    /// stays full even after a flush.
    overflow: Vec<(OpId, CompletionKind)>,
}

impl UringBackend {
    pub fn new(entries: u32) -> io::Result<Self> {
        let ring = IoUring::new(entries)?;
        debug!(entries, "io_uring backend ready");
        Ok(Self {
            ring,
            overflow: Vec::new(),
        })
    }

    /// Builds and queues the submission entry for `op`. The kernel sees it
    /// on the next `drain`, in façade-call order.
    pub fn prepare(&mut self, id: OpId, op: &Pending) {
        let sqe = match &op.kind {
            OpKind::Socket {
                domain,
                ty,
                protocol,
            } => opcode::Socket::new(*domain, *ty, *protocol).build(),
            OpKind::Connect { fd, addr } => {
                opcode::Connect::new(types::Fd(*fd), addr.as_ptr(), addr.len()).build()
            }
            OpKind::Accept { fd } => {
                opcode::Accept::new(types::Fd(*fd), ptr::null_mut(), ptr::null_mut()).build()
            }
            OpKind::Recv { fd, buf, len } => {
                opcode::Recv::new(types::Fd(*fd), *buf, *len as u32).build()
            }
            OpKind::Send { fd, buf, len } => {
                opcode::Send::new(types::Fd(*fd), *buf, *len as u32).build()
            }
            OpKind::Close { fd } => opcode::Close::new(types::Fd(*fd)).build(),
        };
        self.push(id, sqe.user_data(id));
    }

    /// Queues a best-effort cancellation targeting the op's `user_data`,
    /// which is its operation id by construction. If the op already
    /// completed, the kernel treats this as a no-op.
    pub fn cancel(&mut self, id: OpId) {
        let sqe = opcode::AsyncCancel::new(id).build().user_data(CANCEL_DATA);
        self.push(CANCEL_DATA, sqe);
    }

    fn push(&mut self, id: OpId, sqe: squeue::Entry) {
        // SAFETY: buffers and addresses referenced by the entry live in the
        // operation table until the completion is delivered.
        unsafe {
            if self.ring.submission().push(&sqe).is_ok() {
                return;
            }
            // Submission queue full: flush to the kernel and retry once.
            if let Err(e) = self.ring.submit() {
                warn!(error = %e, "submit while flushing a full ring failed");
            }
            if self.ring.submission().push(&sqe).is_ok() {
                return;
            }
        }
        if id != CANCEL_DATA {
            warn!(id, "submission queue still full, failing the op");
            self.overflow
                .push((id, CompletionKind::Error(IoError::Os(libc::EBUSY))));
        }
    }

    /// Submits queued entries, then copies out completions in batches and
    /// translates them. `wait` blocks for at least one completion.
    pub fn drain(
        &mut self,
        table: &mut OpTable,
        wait: bool,
    ) -> io::Result<Vec<(OpId, CompletionKind)>> {
        let mut ready = std::mem::take(&mut self.overflow);
        if wait && ready.is_empty() {
            self.ring.submit_and_wait(1)?;
        } else {
            self.ring.submit()?;
        }
        loop {
            let batch: Vec<(u64, i32)> = self
                .ring
                .completion()
                .take(config::CQE_BATCH)
                .map(|cqe| (cqe.user_data(), cqe.result()))
                .collect();
            if batch.is_empty() {
                break;
            }
            for (data, res) in batch {
                if data == CANCEL_DATA {
                    trace!(res, "cancellation entry reaped");
                    continue;
                }
                let Some(op) = table.get(data) else {
                    trace!(id = data, res, "completion for an op no longer tracked");
                    continue;
                };
                ready.push((data, translate(&op.kind, res)));
            }
        }
        Ok(ready)
    }
}

/// Maps a raw kernel result onto the completion vocabulary for `kind`.
fn translate(kind: &OpKind, res: i32) -> CompletionKind {
    if let OpKind::Close { fd } = kind {
        // Close is best-effort and never fails the callback.
        if res < 0 {
            warn!(fd, errno = -res, "close failed");
        }
        return CompletionKind::Close;
    }
    if res < 0 {
        return CompletionKind::Error(IoError::from_errno(-res));
    }
    match kind {
        OpKind::Socket { .. } => CompletionKind::Socket { fd: res },
        OpKind::Connect { .. } => CompletionKind::Connect,
        OpKind::Accept { .. } => CompletionKind::Accept { fd: res },
        OpKind::Recv { .. } => CompletionKind::Recv { bytes: res as usize },
        OpKind::Send { .. } => CompletionKind::Send { bytes: res as usize },
        OpKind::Close { .. } => CompletionKind::Close,
    }
}
