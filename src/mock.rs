//! Scripted doubles for the socket-primitives and reactor seams, suitable
//! for testing behavior of transport-dependent code without real sockets.
//!
//! [`ScriptedSockets`] replays queued outcomes for each primitive and records
//! every byte the stream handed to `send`. [`RecordingReactor`] counts the
//! registration traffic a stream generates. Both share their state behind an
//! `Rc`, so a test can keep an inspection handle after moving them into a
//! [`Stream`][crate::stream::Stream] — the crate is single-threaded by
//! contract, so no locking is involved.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::reactor::Reactor;
use crate::socket::Sockets;

/// An opaque scripted socket handle.
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle(u32);

#[derive(Debug)]
enum SendStep {
    /// Accept at most this many bytes; zero means `WouldBlock`.
    Accept(usize),
    Fail(io::ErrorKind),
}

#[derive(Debug)]
enum RecvStep {
    Data(Vec<u8>),
    Eof,
    Fail(io::ErrorKind),
}

#[derive(Debug)]
struct Script {
    connect: VecDeque<io::Result<bool>>,
    listen: VecDeque<io::Result<()>>,
    accept: VecDeque<io::Result<SocketAddr>>,
    send: VecDeque<SendStep>,
    recv: VecDeque<RecvStep>,
    pending_error: Option<io::ErrorKind>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    sent: Vec<u8>,
    closed: Vec<u32>,
    next_handle: u32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect: VecDeque::new(),
            listen: VecDeque::new(),
            accept: VecDeque::new(),
            send: VecDeque::new(),
            recv: VecDeque::new(),
            pending_error: None,
            local_addr: Some(([127, 0, 0, 1], 4000).into()),
            peer_addr: Some(([127, 0, 0, 1], 5000).into()),
            sent: Vec::new(),
            closed: Vec::new(),
            next_handle: 1,
        }
    }
}

impl Script {
    fn allocate(&mut self) -> MockHandle {
        let id = self.next_handle;
        self.next_handle += 1;
        MockHandle(id)
    }
}

/// Scripted socket primitives.
///
/// Unscripted calls take the permissive default: `connect` starts a pending
/// connect, `listen` succeeds, `send` accepts everything, `recv` and `accept`
/// report `WouldBlock`, and `pending_error` reports none.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSockets {
    shared: Rc<RefCell<Script>>,
}

impl ScriptedSockets {
    /// A fresh script with permissive defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `connect` outcome; `Ok(true)` completes synchronously.
    pub fn script_connect(&self, result: io::Result<bool>) {
        self.shared.borrow_mut().connect.push_back(result);
    }

    /// Script the next `listen` outcome.
    pub fn script_listen(&self, result: io::Result<()>) {
        self.shared.borrow_mut().listen.push_back(result);
    }

    /// Report this pending socket error at the next `pending_error` query.
    pub fn set_pending_error(&self, kind: io::ErrorKind) {
        self.shared.borrow_mut().pending_error = Some(kind);
    }

    /// Let the next `send` call accept at most `limit` bytes; zero yields
    /// `WouldBlock`.
    pub fn limit_next_send(&self, limit: usize) {
        self.shared.borrow_mut().send.push_back(SendStep::Accept(limit));
    }

    /// Fail the next `send` call.
    pub fn fail_next_send(&self, kind: io::ErrorKind) {
        self.shared.borrow_mut().send.push_back(SendStep::Fail(kind));
    }

    /// Queue bytes for the next `recv` call.
    pub fn push_recv(&self, data: &[u8]) {
        self.shared
            .borrow_mut()
            .recv
            .push_back(RecvStep::Data(data.to_vec()));
    }

    /// Queue an end-of-stream signal for the `recv` sequence.
    pub fn push_recv_eof(&self) {
        self.shared.borrow_mut().recv.push_back(RecvStep::Eof);
    }

    /// Fail the next `recv` call.
    pub fn fail_next_recv(&self, kind: io::ErrorKind) {
        self.shared.borrow_mut().recv.push_back(RecvStep::Fail(kind));
    }

    /// Queue a pending connection from `addr`.
    pub fn push_accept(&self, addr: SocketAddr) {
        self.shared.borrow_mut().accept.push_back(Ok(addr));
    }

    /// Fail the next `accept` call.
    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        self.shared.borrow_mut().accept.push_back(Err(kind.into()));
    }

    /// Every byte accepted by `send` so far, in order.
    pub fn sent(&self) -> Vec<u8> {
        self.shared.borrow().sent.clone()
    }

    /// How many handles have been released through `close`.
    pub fn closed_handles(&self) -> usize {
        self.shared.borrow().closed.len()
    }

    /// Mint a handle directly, as if accepted elsewhere.
    pub fn make_handle(&self) -> MockHandle {
        self.shared.borrow_mut().allocate()
    }
}

impl Sockets for ScriptedSockets {
    type Handle = MockHandle;

    fn connect(&mut self, _addr: SocketAddr) -> io::Result<(MockHandle, bool)> {
        let mut script = self.shared.borrow_mut();
        match script.connect.pop_front() {
            Some(Ok(completed)) => Ok((script.allocate(), completed)),
            Some(Err(error)) => Err(error),
            None => Ok((script.allocate(), false)),
        }
    }

    fn listen(&mut self, _addr: SocketAddr, _backlog: u32) -> io::Result<MockHandle> {
        let mut script = self.shared.borrow_mut();
        match script.listen.pop_front() {
            Some(Ok(())) | None => Ok(script.allocate()),
            Some(Err(error)) => Err(error),
        }
    }

    fn accept(&mut self, _handle: &mut MockHandle) -> io::Result<(MockHandle, SocketAddr)> {
        let mut script = self.shared.borrow_mut();
        match script.accept.pop_front() {
            Some(Ok(addr)) => Ok((script.allocate(), addr)),
            Some(Err(error)) => Err(error),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn send(&mut self, _handle: &mut MockHandle, data: &[u8]) -> io::Result<usize> {
        let mut script = self.shared.borrow_mut();
        match script.send.pop_front() {
            None => {
                script.sent.extend_from_slice(data);
                Ok(data.len())
            }
            Some(SendStep::Accept(0)) => Err(io::ErrorKind::WouldBlock.into()),
            Some(SendStep::Accept(limit)) => {
                let accepted = limit.min(data.len());
                script.sent.extend_from_slice(&data[..accepted]);
                Ok(accepted)
            }
            Some(SendStep::Fail(kind)) => Err(kind.into()),
        }
    }

    fn recv(&mut self, _handle: &mut MockHandle, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.shared.borrow_mut();
        match script.recv.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(RecvStep::Data(data)) => {
                assert!(
                    data.len() <= buf.len(),
                    "scripted recv chunk exceeds the receive window"
                );
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(RecvStep::Eof) => Ok(0),
            Some(RecvStep::Fail(kind)) => Err(kind.into()),
        }
    }

    fn pending_error(&mut self, _handle: &mut MockHandle) -> io::Result<Option<io::Error>> {
        let mut script = self.shared.borrow_mut();
        Ok(script.pending_error.take().map(io::Error::from))
    }

    fn local_addr(&self, _handle: &MockHandle) -> io::Result<SocketAddr> {
        self.shared
            .borrow()
            .local_addr
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    fn peer_addr(&self, _handle: &MockHandle) -> io::Result<SocketAddr> {
        self.shared
            .borrow()
            .peer_addr
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    fn close(&mut self, handle: MockHandle) {
        self.shared.borrow_mut().closed.push(handle.0);
    }
}

#[derive(Debug, Default)]
struct ReactorLog {
    registered: usize,
    deregistered: usize,
    write_readiness: usize,
}

/// A reactor that records registration traffic.
#[derive(Debug, Clone, Default)]
pub struct RecordingReactor {
    log: Rc<RefCell<ReactorLog>>,
}

impl RecordingReactor {
    /// A fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many handles have been registered.
    pub fn registrations(&self) -> usize {
        self.log.borrow().registered
    }

    /// How many handles have been deregistered.
    pub fn deregistrations(&self) -> usize {
        self.log.borrow().deregistered
    }

    /// How many write-readiness notifications have been requested.
    pub fn write_readiness_requests(&self) -> usize {
        self.log.borrow().write_readiness
    }
}

impl<H> Reactor<H> for RecordingReactor {
    fn register(&mut self, _handle: &mut H) {
        self.log.borrow_mut().registered += 1;
    }

    fn deregister(&mut self, _handle: &mut H) {
        self.log.borrow_mut().deregistered += 1;
    }

    fn request_write_readiness(&mut self, _handle: &mut H) {
        self.log.borrow_mut().write_readiness += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscripted_send_accepts_everything() {
        let mut sockets = ScriptedSockets::new();
        let mut handle = sockets.make_handle();
        assert_eq!(sockets.send(&mut handle, b"abc").unwrap(), 3);
        assert_eq!(sockets.sent(), b"abc");
    }

    #[test]
    fn send_script_applies_in_order() {
        let mut sockets = ScriptedSockets::new();
        let mut handle = sockets.make_handle();
        sockets.limit_next_send(2);
        sockets.limit_next_send(0);
        assert_eq!(sockets.send(&mut handle, b"abcd").unwrap(), 2);
        assert_eq!(
            sockets.send(&mut handle, b"cd").unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(sockets.sent(), b"ab");
    }

    #[test]
    fn recv_sequence_replays_then_blocks() {
        let mut sockets = ScriptedSockets::new();
        let mut handle = sockets.make_handle();
        let mut buf = [0u8; 16];
        sockets.push_recv(b"hi");
        sockets.push_recv_eof();
        assert_eq!(sockets.recv(&mut handle, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(sockets.recv(&mut handle, &mut buf).unwrap(), 0);
        assert_eq!(
            sockets.recv(&mut handle, &mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn clones_share_one_script() {
        let sockets = ScriptedSockets::new();
        let mut clone = sockets.clone();
        let mut handle = sockets.make_handle();
        clone.send(&mut handle, b"shared").unwrap();
        assert_eq!(sockets.sent(), b"shared");
    }
}
