//! prise-io: the asynchronous I/O core of the prise terminal multiplexer.
//!
//! This crate provides the pieces of prise that talk to the kernel and to
//! the wire:
//!
//! - A single-threaded, completion-based I/O [`Reactor`][io::Reactor] with
//!   two kernel backends and a deterministic mock for tests
//! - The MessagePack-RPC [`Message`][rpc::Message] codec and length-prefixed
//!   stream framing that flow over it
//! - The client-side Unix socket [connector][client::Connector] and the
//!   [daemonization][daemon] glue around the rendezvous socket
//!
//! ## IO Backend Selection
//!
//! The reactor picks its kernel backend at compile time based on the target
//! platform and kernel version:
//!
//! - **Linux with kernel 5.10+**: `io_uring` (completion-based)
//! - **macOS**: `kqueue` (readiness-based; completions are synthesized so
//!   callers never branch on platform)
//!
//! The selection is handled by the build script (`build.rs`), which sets the
//! `io_backend` configuration flag. On platforms with neither facility only
//! the mock backend is available.
//!
//! ## Threading model
//!
//! One reactor is bound to one thread. Submissions, completions, callbacks
//! and cancellations all happen on that thread; there is no internal
//! locking, and the reactor is neither `Send` nor `Sync`.

pub mod client;
pub mod config;
pub mod daemon;
pub mod io;
pub mod rpc;

// Re-export core types
pub use io::{Completion, CompletionKind, Context, IoError, OpId, Reactor, RunMode, SockAddr};
pub use rpc::{CodecError, Message, Value};

/// Error types for the I/O core
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("reactor backend failed: {0}")]
        Backend(#[from] std::io::Error),

        #[error("completion callback failed: {0}")]
        Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
    }

    impl Error {
        /// Wraps an arbitrary failure raised inside a completion callback.
        pub fn callback<E>(err: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Error::Callback(err.into())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

pub use error::{Error, Result};
