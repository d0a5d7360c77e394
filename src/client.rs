//! Client-side establishment of the daemon connection.
//!
//! The client owns a reactor and walks a small state machine over it:
//! open a Unix socket, connect it to the rendezvous path, and on
//! `ECONNREFUSED` treat the path as a stale socket left behind by a dead
//! server (close the fd, unlink the file, and let the owner daemonize a
//! fresh server before retrying).

use std::ffi::c_void;
use std::fs;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config;
use crate::io::{Completion, CompletionKind, Context, IoError, Reactor, SockAddr};
use crate::Result;

const TAG_SOCKET: u16 = 1;
const TAG_CONNECT: u16 = 2;
const TAG_CLOSE: u16 = 3;

/// Where connection establishment currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    OpeningSocket,
    Connecting,
    Connected,
    /// Connect was refused; the fd is being closed and the socket file is
    /// stale.
    ClosingStale,
    /// Terminal failure with the fault that ended the attempt.
    Failed(IoError),
}

/// State machine that establishes the client connection over the reactor.
///
/// The connector hands the reactor a pointer to itself as callback
/// userdata, so it must not move while operations are in flight; callers
/// keep it boxed ([`Connector::boxed`]) for that reason. Completions are
/// multiplexed over one callback by tag.
pub struct Connector {
    path: PathBuf,
    fd: RawFd,
    phase: Phase,
    /// Set when a refused connect identified `path` as a stale socket.
    stale_socket: bool,
}

impl Connector {
    pub fn boxed<P: Into<PathBuf>>(path: P) -> Box<Self> {
        Box::new(Self {
            path: path.into(),
            fd: -1,
            phase: Phase::Idle,
            stale_socket: false,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// The connected fd, owned by the connector's owner once `connected()`.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn stale_socket(&self) -> bool {
        self.stale_socket
    }

    /// Kicks off socket + connect. Progress is observed through `phase()`
    /// as the owner drives the reactor.
    pub fn start(&mut self, r: &mut Reactor) {
        self.phase = Phase::OpeningSocket;
        self.stale_socket = false;
        r.socket(libc::AF_UNIX, libc::SOCK_STREAM, 0, self.ctx(TAG_SOCKET));
    }

    /// Resets to `Idle`, dropping any memory of in-flight operations. Used
    /// when the owner tears the reactor down and rebuilds it: ids from the
    /// old reactor must not leak into the new one.
    pub fn reset(&mut self) {
        self.fd = -1;
        self.phase = Phase::Idle;
    }

    fn ctx(&mut self, tag: u16) -> Context {
        Context::new(self as *mut Connector as *mut c_void, tag, Self::on_io)
    }

    fn on_io(r: &mut Reactor, c: Completion) -> Result<()> {
        // SAFETY: userdata is the boxed connector, which the owner keeps
        // alive while any of its operations are in flight.
        let this = unsafe { &mut *(c.userdata as *mut Connector) };
        match (c.tag, c.kind) {
            (TAG_SOCKET, CompletionKind::Socket { fd }) => {
                this.fd = fd;
                this.phase = Phase::Connecting;
                match SockAddr::unix(&this.path) {
                    Ok(addr) => {
                        r.connect(fd, addr, this.ctx(TAG_CONNECT));
                    }
                    Err(e) => {
                        warn!(path = %this.path.display(), error = %e, "unusable socket path");
                        this.phase =
                            Phase::Failed(IoError::Os(e.raw_os_error().unwrap_or(libc::EINVAL)));
                    }
                }
            }
            (TAG_CONNECT, CompletionKind::Connect) => {
                debug!(fd = this.fd, "connected");
                this.phase = Phase::Connected;
            }
            (TAG_CONNECT, CompletionKind::Error(IoError::ConnectionRefused)) => {
                // Nobody is listening behind the file: a stale socket.
                debug!(path = %this.path.display(), "connection refused, socket is stale");
                this.stale_socket = true;
                this.phase = Phase::ClosingStale;
                r.close(this.fd, this.ctx(TAG_CLOSE));
            }
            (TAG_CLOSE, CompletionKind::Close) => {
                this.fd = -1;
                this.phase = Phase::Failed(IoError::ConnectionRefused);
            }
            (_, CompletionKind::Error(err)) => {
                warn!(tag = c.tag, error = %err, "connection attempt failed");
                this.phase = Phase::Failed(err);
            }
            (tag, kind) => {
                warn!(tag, ?kind, "unexpected completion");
            }
        }
        Ok(())
    }
}

/// Unlinks a socket file a refused connect proved stale. A path that is
/// already gone is fine.
pub fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Waits for the server socket to appear after a daemon has been forked:
/// up to `SOCKET_WAIT_ATTEMPTS` checks, `SOCKET_WAIT_INTERVAL` apart.
pub fn wait_for_socket(path: &Path) -> bool {
    for _ in 0..config::SOCKET_WAIT_ATTEMPTS {
        if path.exists() {
            return true;
        }
        std::thread::sleep(config::SOCKET_WAIT_INTERVAL);
    }
    path.exists()
}
