//! The socket-primitives capability consumed by a stream.
//!
//! A [`Stream`][crate::stream::Stream] never touches the operating system
//! directly. It holds a small capability object implementing [`Sockets`] and
//! an exclusively-owned `Sockets::Handle` for the one socket it manages. This
//! keeps the transport logic independent of any particular socket stack and
//! lets tests substitute scripted doubles (see [`crate::mock`]) without
//! subclassing or global state.
//!
//! Every operation is non-blocking. `ErrorKind::WouldBlock` is the uniform
//! "nothing available right now" sentinel:
//!
//! - from [`send`][Sockets::send] it means the socket accepted zero bytes,
//! - from [`recv`][Sockets::recv] it means no more data is currently readable,
//! - from [`accept`][Sockets::accept] it means no connection is pending.
//!
//! `recv` returning `Ok(0)` means the peer has closed the connection. This is
//! deliberately distinct from `WouldBlock`, so the stream can tell a drained
//! socket from a dead one.

use std::io;
use std::net::SocketAddr;

/// Non-blocking socket primitives, one instance per stream.
///
/// Implementations may fail any call with an `io::Error`; the stream converts
/// failures into state transitions and log records rather than propagating
/// them.
pub trait Sockets {
    /// The exclusively-owned socket resource managed by a stream.
    type Handle;

    /// Begin a non-blocking connect to `addr`.
    ///
    /// Returns the new handle and whether the connection completed
    /// synchronously. When it did not, completion is signaled by write
    /// readiness and confirmed via [`pending_error`][Sockets::pending_error].
    fn connect(&mut self, addr: SocketAddr) -> io::Result<(Self::Handle, bool)>;

    /// Bind to `addr` and start listening with the requested backlog.
    ///
    /// Implementations enable address (and, where supported, port) reuse on a
    /// best-effort basis before binding, and may treat the backlog as a hint
    /// if the underlying stack does not expose it.
    fn listen(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<Self::Handle>;

    /// Accept one pending connection on a listening handle.
    ///
    /// `WouldBlock` means no connection is pending. On any other error the
    /// implementation must close a half-accepted socket itself; an errored
    /// accept never yields a handle to the caller.
    fn accept(&mut self, handle: &mut Self::Handle) -> io::Result<(Self::Handle, SocketAddr)>;

    /// Send as many bytes of `data` as the socket will take, returning the
    /// count accepted.
    fn send(&mut self, handle: &mut Self::Handle, data: &[u8]) -> io::Result<usize>;

    /// Receive available bytes into `buf`, returning the count read.
    /// `Ok(0)` means end of stream.
    fn recv(&mut self, handle: &mut Self::Handle, buf: &mut [u8]) -> io::Result<usize>;

    /// Take the socket's pending asynchronous error, if any.
    ///
    /// Consulted when a non-blocking connect signals completion via write
    /// readiness: a pending error means the connect failed.
    fn pending_error(&mut self, handle: &mut Self::Handle) -> io::Result<Option<io::Error>>;

    /// The local address of the socket.
    fn local_addr(&self, handle: &Self::Handle) -> io::Result<SocketAddr>;

    /// The peer address of the socket.
    fn peer_addr(&self, handle: &Self::Handle) -> io::Result<SocketAddr>;

    /// Release the handle, closing the socket.
    fn close(&mut self, handle: Self::Handle);
}
