//! Process-level plumbing around the rendezvous socket.
//!
//! The server side of prise is a daemon reached over a per-user Unix
//! socket. This module provides the path discovery and the double-fork the
//! client performs when no server is running; the server itself lives
//! elsewhere and is handed control in the daemonized grandchild.

use std::io;
use std::path::PathBuf;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, setsid, ForkResult};
use tracing::debug;

/// Returns the per-user rendezvous socket path, `/tmp/prise-<uid>.sock`.
pub fn socket_path() -> PathBuf {
    // SAFETY: getuid cannot fail.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/prise-{uid}.sock"))
}

/// Which side of the daemonization the caller ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    /// The original process; the intermediate child has been reaped.
    Parent,
    /// The detached grandchild: a session leader with stdio closed.
    Daemon,
}

/// Double-forks into a detached daemon.
///
/// Returns [`Fork::Parent`] in the original process and [`Fork::Daemon`] in
/// the grandchild, which has called `setsid` and closed stdin, stdout and
/// stderr. Exits the intermediate child with code 1 if `setsid` fails.
pub fn daemonize() -> io::Result<Fork> {
    // SAFETY: the client is single-threaded at daemonization time; nothing
    // async-signal-unsafe runs in the child before the second fork returns.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { child } => {
            // Reap the intermediate child so it does not linger as a zombie.
            let _ = waitpid(child, None);
            Ok(Fork::Parent)
        }
        ForkResult::Child => {
            if setsid().is_err() {
                std::process::exit(1);
            }
            match unsafe { fork() } {
                Ok(ForkResult::Parent { .. }) => std::process::exit(0),
                Ok(ForkResult::Child) => {
                    for fd in 0..3 {
                        // SAFETY: closing stdio in a process we fully own.
                        unsafe { libc::close(fd) };
                    }
                    debug!("daemonized");
                    Ok(Fork::Daemon)
                }
                Err(_) => std::process::exit(1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_carries_the_uid() {
        let path = socket_path();
        let uid = unsafe { libc::getuid() };
        assert_eq!(
            path.to_str().unwrap(),
            format!("/tmp/prise-{uid}.sock")
        );
    }
}
