//! End-to-end connection establishment against the mock backend: the happy
//! path and the stale-socket recovery path.

mod common;

use prise_io::client::{remove_stale_socket, Connector, Phase};
use prise_io::{IoError, Reactor, RunMode};

#[test]
fn unix_connect_happy_path() {
    common::setup_tracing();
    let mut conn = Connector::boxed("/tmp/test.sock");
    let mut r = Reactor::mock();
    conn.start(&mut r);
    // First run: the socket op completes with fd 3 and the connect goes out.
    r.run(RunMode::Once).unwrap();
    assert_eq!(conn.phase(), Phase::Connecting);
    assert_eq!(conn.fd(), 3);
    r.complete_connect(3);
    r.run(RunMode::Once).unwrap();
    assert!(conn.connected());
    assert_eq!(conn.fd(), 3);
    assert_eq!(r.pending(), 0);
}

#[test]
fn refused_connect_closes_the_fd_and_flags_the_socket_stale() {
    common::setup_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.sock");
    std::fs::write(&path, b"").unwrap();

    let mut conn = Connector::boxed(&path);
    let mut r = Reactor::mock();
    conn.start(&mut r);
    r.run(RunMode::Once).unwrap();
    r.complete_error(3, IoError::ConnectionRefused);
    // Drains the refused connect, the follow-up close, and everything in
    // between.
    r.run(RunMode::UntilDone).unwrap();

    assert_eq!(conn.phase(), Phase::Failed(IoError::ConnectionRefused));
    assert!(conn.stale_socket());
    assert_eq!(conn.fd(), -1);
    assert_eq!(r.pending(), 0);

    // The owner unlinks the stale file and would daemonize a fresh server
    // before retrying with a rebuilt reactor.
    remove_stale_socket(&path).unwrap();
    assert!(!path.exists());
    conn.reset();
    assert_eq!(conn.phase(), Phase::Idle);
}

#[test]
fn non_refused_errors_fail_without_touching_the_path() {
    common::setup_tracing();
    let mut conn = Connector::boxed("/tmp/test.sock");
    let mut r = Reactor::mock();
    conn.start(&mut r);
    r.run(RunMode::Once).unwrap();
    r.complete_error(3, IoError::Os(libc::ETIMEDOUT));
    r.run(RunMode::Once).unwrap();
    assert_eq!(conn.phase(), Phase::Failed(IoError::Os(libc::ETIMEDOUT)));
    assert!(!conn.stale_socket());
}
