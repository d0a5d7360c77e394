//! Configuration constants for the I/O core
//!
//! Tunable parameters affecting the reactor and the client connection
//! handshake. None of these are consulted from the environment; they are
//! compile-time knobs.

use std::time::Duration;

/// Submission/completion ring depth for the io_uring backend
///
/// Bounds how many operations can sit in the submission queue between
/// `submit` calls. The reactor flushes the ring when the queue fills, so
/// this only affects syscall batching, not correctness.
pub const RING_ENTRIES: u32 = 64;

/// Completion queue entries copied out per drain batch
///
/// Completions are moved from the ring in batches of this size before their
/// callbacks run, keeping the completion queue short without starving
/// callback dispatch.
pub const CQE_BATCH: usize = 32;

/// Event buffer capacity for one kqueue poll
pub const EVENT_CAPACITY: usize = 1024;

/// How many times the client re-checks for the server socket after forking
/// a daemon, and how long it sleeps between checks.
pub const SOCKET_WAIT_ATTEMPTS: u32 = 10;

/// Interval between server-socket checks.
pub const SOCKET_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on a single RPC frame payload
///
/// A length prefix above this is treated as stream corruption rather than
/// an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
