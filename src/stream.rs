//! The stream transport: connection lifecycle, buffered backpressured
//! transport, and message framing over non-blocking readiness events.
//!
//! A [`Stream`] owns one socket handle (through its [`Sockets`] capability)
//! and reacts to the readiness events an external reactor dispatches into
//! [`handle_read_ready`][Stream::handle_read_ready] and
//! [`handle_write_ready`][Stream::handle_write_ready]. Everything else —
//! partial sends, connect completion, framing, accept draining — is resolved
//! internally and surfaces only as owner callbacks.
//!
//! Dispatch is single-threaded and cooperative: no socket operation blocks,
//! and "waiting" is expressed by registering interest with the reactor rather
//! than suspending the call stack. All buffer mutations and state transitions
//! for a stream are therefore strictly serialized.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

use crate::callback::{Callbacks, LifecycleHook, guarded};
use crate::delimiter::ReadDelimiter;
use crate::error::StreamError;
use crate::reactor::Reactor;
use crate::socket::Sockets;

/// How many bytes one receive call asks for. The read loop keeps calling
/// until the socket is drained, so this only bounds per-call copies.
const RECV_CHUNK_SIZE: usize = 8 * 1024;

/// Connection lifecycle states. At most one of the non-closed states holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Connecting,
    Connected,
    Listening,
}

/// Configuration for [`Stream::listen`].
///
/// Defaults to the wildcard host, port 8080 and a backlog of 1024.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    host: String,
    port: u16,
    backlog: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            backlog: 1024,
        }
    }
}

impl ListenConfig {
    /// Listen on `port` with the default host and backlog.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Set the host to bind. An empty host binds the wildcard address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listen backlog hint.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    fn bind_addr(&self) -> io::Result<SocketAddr> {
        if self.host.is_empty() {
            return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port)));
        }
        resolve(&self.host, self.port)
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "host resolved to no addresses",
        )
    })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// A non-blocking, reactor-driven stream.
///
/// Generic over its socket primitives `S` and the reactor interface `R`, so
/// the same transport logic runs over real sockets
/// ([`net::TcpSockets`][crate::net::TcpSockets]) and scripted doubles
/// ([`mock::ScriptedSockets`][crate::mock::ScriptedSockets]).
///
/// Owner callbacks are assigned with the chaining `on_*` setters and receive
/// `&mut Stream`, so a callback may write, re-frame, or close the stream it
/// was fired from. See [`crate::callback`] for the isolation rules.
pub struct Stream<S: Sockets, R> {
    sockets: S,
    reactor: R,
    handle: Option<S::Handle>,
    state: State,
    recv_buffer: BytesMut,
    send_buffer: BytesMut,
    read_delimiter: ReadDelimiter,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    callbacks: Callbacks<S, R>,
}

impl<S: Sockets, R> fmt::Debug for Stream<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("recv_buffered", &self.recv_buffer.len())
            .field("send_buffered", &self.send_buffer.len())
            .field("read_delimiter", &self.read_delimiter)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl<S, R> Stream<S, R>
where
    S: Sockets,
    R: Reactor<S::Handle>,
{
    /// Create a closed stream with no handle.
    pub fn new(sockets: S, reactor: R) -> Self {
        Self {
            sockets,
            reactor,
            handle: None,
            state: State::Closed,
            recv_buffer: BytesMut::new(),
            send_buffer: BytesMut::new(),
            read_delimiter: ReadDelimiter::Raw,
            local_addr: None,
            remote_addr: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Wrap an already-connected handle, typically one delivered to an
    /// `on_accept` callback.
    ///
    /// Registers the handle with the reactor and refreshes addresses. Fires
    /// no callback.
    pub fn from_connected(sockets: S, reactor: R, mut handle: S::Handle) -> Self {
        let mut stream = Self::new(sockets, reactor);
        stream.reactor.register(&mut handle);
        stream.handle = Some(handle);
        stream.state = State::Connected;
        stream.refresh_addrs();
        stream
    }

    //// Status ////

    /// True while the stream is connecting, connected, or listening.
    pub fn active(&self) -> bool {
        self.state != State::Closed
    }

    /// True while the stream is connected or has a connect in flight.
    pub fn connected(&self) -> bool {
        matches!(self.state, State::Connected | State::Connecting)
    }

    /// True while the stream is listening for connections.
    pub fn listening(&self) -> bool {
        self.state == State::Listening
    }

    /// True when the stream is closed and owns no handle.
    pub fn closed(&self) -> bool {
        self.state == State::Closed
    }

    /// The local address, when connected or listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The peer address, when connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The active framing mode.
    pub fn read_delimiter(&self) -> &ReadDelimiter {
        &self.read_delimiter
    }

    /// Assign the framing mode, validating it first.
    ///
    /// May be called at any time, including from within a delivery callback;
    /// the extraction loop applies the new mode to the bytes still buffered.
    pub fn set_read_delimiter(
        &mut self,
        delimiter: ReadDelimiter,
    ) -> Result<&mut Self, StreamError> {
        delimiter.validate()?;
        self.read_delimiter = delimiter;
        Ok(self)
    }

    //// Callback assignment ////

    /// Called once when a connect attempt completes successfully.
    pub fn on_connect(&mut self, hook: impl FnMut(&mut Self) + 'static) -> &mut Self {
        self.callbacks.on_connect = Some(Box::new(hook));
        self
    }

    /// Called once per extracted message.
    pub fn on_read(&mut self, hook: impl FnMut(&mut Self, Bytes) + 'static) -> &mut Self {
        self.callbacks.on_read = Some(Box::new(hook));
        self
    }

    /// Called when the outbound buffer fully drains, and after a direct send
    /// that needed no buffering.
    pub fn on_write(&mut self, hook: impl FnMut(&mut Self) + 'static) -> &mut Self {
        self.callbacks.on_write = Some(Box::new(hook));
        self
    }

    /// Called exactly once, at the end of `close()`.
    pub fn on_close(&mut self, hook: impl FnMut(&mut Self) + 'static) -> &mut Self {
        self.callbacks.on_close = Some(Box::new(hook));
        self
    }

    /// Called once per accepted pending connection on a listening stream.
    ///
    /// The owner is responsible for wrapping the raw handle, e.g. with
    /// [`Stream::from_connected`]; this stream does not.
    pub fn on_accept(
        &mut self,
        hook: impl FnMut(&mut Self, S::Handle, SocketAddr) + 'static,
    ) -> &mut Self {
        self.callbacks.on_accept = Some(Box::new(hook));
        self
    }

    //// Control ////

    /// Begin a non-blocking connect to `host:port`.
    ///
    /// A guarded no-op (logged, not an error) when the stream is already
    /// active. A primitive failure closes the stream; the only callback a
    /// failed connect fires is `on_close`.
    pub fn connect(&mut self, host: &str, port: u16) -> &mut Self {
        if self.active() {
            let err = StreamError::LifecycleMisuse("connect() called on an active stream");
            warn!(error = %err, state = ?self.state, "ignoring connect()");
            return self;
        }

        // Enter Connecting before touching the primitive so the failure path
        // flows through close() and fires on_close.
        self.state = State::Connecting;

        let addr = match resolve(host, port) {
            Ok(addr) => addr,
            Err(cause) => {
                let err = StreamError::Connect(cause);
                error!(error = %err, host, port, "closing stream after failed connect");
                self.close();
                return self;
            }
        };

        match self.sockets.connect(addr) {
            Ok((mut handle, completed)) => {
                self.reactor.register(&mut handle);
                if !completed {
                    self.reactor.request_write_readiness(&mut handle);
                }
                self.handle = Some(handle);
                trace!(%addr, completed, "connect initiated");
                if completed {
                    self.finish_connect();
                }
            }
            Err(cause) => {
                let err = StreamError::Connect(cause);
                error!(error = %err, %addr, "closing stream after failed connect");
                self.close();
            }
        }
        self
    }

    /// Begin listening for connections.
    ///
    /// A guarded no-op (logged, not an error) when the stream is already
    /// active. A primitive failure closes the stream.
    pub fn listen(&mut self, config: ListenConfig) -> &mut Self {
        if self.active() {
            let err = StreamError::LifecycleMisuse("listen() called on an active stream");
            warn!(error = %err, state = ?self.state, "ignoring listen()");
            return self;
        }

        self.state = State::Listening;

        let addr = match config.bind_addr() {
            Ok(addr) => addr,
            Err(cause) => {
                let err = StreamError::BindOrListen(cause);
                error!(error = %err, host = %config.host, port = config.port, "closing stream after failed listen");
                self.close();
                return self;
            }
        };

        match self.sockets.listen(addr, config.backlog) {
            Ok(mut handle) => {
                self.reactor.register(&mut handle);
                self.handle = Some(handle);
                self.refresh_addrs();
                debug!(local = ?self.local_addr, "listening");
            }
            Err(cause) => {
                let err = StreamError::BindOrListen(cause);
                error!(error = %err, %addr, "closing stream after failed listen");
                self.close();
            }
        }
        self
    }

    /// Close the stream.
    ///
    /// Idempotent: calling `close()` on an already-closed stream is a pure
    /// no-op. Deregisters from the reactor, releases the handle, clears both
    /// buffers, resets the framing mode, and fires `on_close` exactly once.
    pub fn close(&mut self) {
        if self.closed() {
            return;
        }

        if let Some(mut handle) = self.handle.take() {
            self.reactor.deregister(&mut handle);
            self.sockets.close(handle);
        }
        self.state = State::Closed;
        self.recv_buffer.clear();
        self.send_buffer.clear();
        self.read_delimiter = ReadDelimiter::Raw;
        self.refresh_addrs();
        self.fire_on_close();
    }

    /// Close the stream once any pending outbound data has been written.
    ///
    /// With an empty outbound buffer this closes immediately; otherwise
    /// `close()` is installed as the write-completion continuation and fires
    /// when the backlog drains.
    pub fn end(&mut self) {
        if self.closed() {
            return;
        }
        if self.send_buffer.is_empty() {
            self.close();
        } else {
            self.callbacks.on_write = Some(Box::new(|stream| stream.close()));
        }
    }

    //// I/O ////

    /// Write `data` to the stream.
    ///
    /// Attempts an immediate send when no backlog exists; otherwise appends
    /// to the outbound buffer behind any bytes already queued. Dropped with a
    /// warning unless the stream is connected. A send failure closes the
    /// stream, discarding buffered data.
    pub fn write(&mut self, data: &[u8]) {
        self.send_or_buffer(data, false);
    }

    /// Write `data` to the stream, always buffering.
    ///
    /// Skips the immediate send attempt and queues the bytes for the next
    /// write-readiness event. Useful for building up a batch of small writes.
    pub fn write_buffered(&mut self, data: &[u8]) {
        self.send_or_buffer(data, true);
    }

    fn send_or_buffer(&mut self, data: &[u8], buffer_data: bool) {
        if self.closed() {
            let err = StreamError::LifecycleMisuse("write() on a closed stream");
            warn!(error = %err, "dropping write");
            return;
        }
        if self.state != State::Connected {
            let err = StreamError::LifecycleMisuse("write() on a stream that is not connected");
            warn!(error = %err, state = ?self.state, "dropping write");
            return;
        }

        // Any existing backlog forces the buffered path, so bytes are never
        // reordered past ones already queued.
        if buffer_data || !self.send_buffer.is_empty() {
            self.send_buffer.extend_from_slice(data);
            self.request_write_readiness();
            return;
        }

        let Some(sent) = self.try_send(data) else {
            return;
        };
        if sent < data.len() {
            self.send_buffer.extend_from_slice(&data[sent..]);
            self.request_write_readiness();
        } else {
            self.fire_on_write();
        }
    }

    /// Send via the primitive, mapping `WouldBlock` to zero bytes accepted.
    /// A failure closes the stream and yields `None`.
    fn try_send(&mut self, data: &[u8]) -> Option<usize> {
        let handle = self.handle.as_mut()?;
        match self.sockets.send(handle, data) {
            Ok(sent) => Some(sent),
            Err(cause) if cause.kind() == io::ErrorKind::WouldBlock => Some(0),
            Err(cause) => {
                let err = StreamError::Send(cause);
                error!(error = %err, "closing stream after send failure");
                self.close();
                None
            }
        }
    }

    //// Readiness entry points ////

    /// Handle a read-readiness event dispatched by the reactor.
    ///
    /// For a listening stream this drains pending connections. Otherwise it
    /// drains the socket into the receive buffer, runs the extraction loop,
    /// and closes the stream if the peer ended it.
    pub fn handle_read_ready(&mut self) {
        if self.closed() {
            trace!("ignoring read readiness for a closed stream");
            return;
        }
        if self.listening() {
            self.accept_pending();
            return;
        }

        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        let mut end_of_stream = false;
        loop {
            let Some(handle) = self.handle.as_mut() else {
                return;
            };
            match self.sockets.recv(handle, &mut chunk) {
                Ok(0) => {
                    end_of_stream = true;
                    break;
                }
                Ok(received) => self.recv_buffer.extend_from_slice(&chunk[..received]),
                Err(cause) if cause.kind() == io::ErrorKind::WouldBlock => break,
                Err(cause) => {
                    let err = StreamError::Recv(cause);
                    error!(error = %err, "closing stream after recv failure");
                    self.close();
                    return;
                }
            }
        }

        self.process_recv_buffer();

        if end_of_stream && !self.closed() {
            debug!("peer closed the connection");
            self.close();
        }
    }

    /// Handle a write-readiness event dispatched by the reactor.
    ///
    /// Resolves an in-flight connect first, then flushes as much of the
    /// outbound buffer as the socket accepts. `on_write` fires only once the
    /// buffer reaches empty.
    pub fn handle_write_ready(&mut self) {
        if self.listening() {
            warn!("ignoring write readiness for a listening stream");
            return;
        }
        if self.state == State::Connecting {
            self.finish_connect();
        }
        if self.state != State::Connected || self.send_buffer.is_empty() {
            return;
        }

        let backlog = self.send_buffer.split();
        let Some(sent) = self.try_send(&backlog) else {
            return;
        };
        if sent < backlog.len() {
            self.send_buffer.extend_from_slice(&backlog[sent..]);
            self.request_write_readiness();
        } else {
            self.fire_on_write();
        }
    }

    //// Internal event handling ////

    /// Resolve an in-flight connect on write readiness: a pending socket
    /// error means the connect failed.
    fn finish_connect(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        match self.sockets.pending_error(handle) {
            Ok(None) => {
                self.state = State::Connected;
                self.refresh_addrs();
                debug!(local = ?self.local_addr, remote = ?self.remote_addr, "connected");
                self.fire_on_connect();
            }
            Ok(Some(cause)) => {
                let err = StreamError::Connect(cause);
                error!(error = %err, "closing stream after failed connect");
                self.close();
            }
            Err(cause) => {
                let err = StreamError::Connect(cause);
                error!(error = %err, "could not query pending socket error");
                self.close();
            }
        }
    }

    /// Drain pending connections on a listening stream.
    ///
    /// An accept failure aborts only this pass; the listener stays open.
    fn accept_pending(&mut self) {
        loop {
            let Some(handle) = self.handle.as_mut() else {
                return;
            };
            match self.sockets.accept(handle) {
                Ok((conn, addr)) => {
                    trace!(%addr, "accepted connection");
                    if !self.fire_on_accept(conn, addr) {
                        return;
                    }
                }
                Err(cause) if cause.kind() == io::ErrorKind::WouldBlock => return,
                Err(cause) => {
                    let err = StreamError::Accept(cause);
                    warn!(error = %err, "aborting accept pass; listener stays open");
                    return;
                }
            }
        }
    }

    /// Extract complete messages from the receive buffer per the active
    /// framing mode and deliver each through `on_read`.
    ///
    /// After every delivery the stream re-checks its own state: a callback
    /// that closed the stream or moved it out of Connected ends the loop with
    /// the remaining bytes retained. A callback may also reassign the
    /// delimiter; the next iteration frames against the updated mode.
    fn process_recv_buffer(&mut self) {
        while !self.recv_buffer.is_empty() {
            let frame = match &self.read_delimiter {
                ReadDelimiter::Raw => self.recv_buffer.split().freeze(),
                ReadDelimiter::FixedLength(length) => {
                    let length = *length;
                    if length == 0 {
                        // Unreachable through set_read_delimiter; retained as
                        // a guard so a bad mode pauses extraction losslessly.
                        let err = StreamError::InvalidFraming("zero fixed length");
                        warn!(error = %err, "pausing extraction");
                        break;
                    }
                    if self.recv_buffer.len() < length {
                        break;
                    }
                    self.recv_buffer.split_to(length).freeze()
                }
                ReadDelimiter::Terminator(terminator) => {
                    if terminator.is_empty() {
                        let err = StreamError::InvalidFraming("empty terminator");
                        warn!(error = %err, "pausing extraction");
                        break;
                    }
                    let Some(mark) = find_subsequence(&self.recv_buffer, terminator) else {
                        break;
                    };
                    let skip = terminator.len();
                    let frame = self.recv_buffer.split_to(mark).freeze();
                    self.recv_buffer.advance(skip);
                    frame
                }
            };

            if !self.fire_on_read(frame) {
                break;
            }
            if self.state != State::Connected {
                break;
            }
        }
    }

    //// Internals ////

    /// Recompute addresses for the current state: both when connected, local
    /// only when listening, absent otherwise.
    fn refresh_addrs(&mut self) {
        let (local, remote) = match (&self.state, &self.handle) {
            (State::Connected, Some(handle)) => (
                self.sockets.local_addr(handle).ok(),
                self.sockets.peer_addr(handle).ok(),
            ),
            (State::Listening, Some(handle)) => (self.sockets.local_addr(handle).ok(), None),
            _ => (None, None),
        };
        self.local_addr = local;
        self.remote_addr = remote;
    }

    fn request_write_readiness(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            self.reactor.request_write_readiness(handle);
        }
    }

    //// Guarded callback dispatch ////

    fn fire_on_connect(&mut self) {
        self.invoke_lifecycle("on_connect", |callbacks| &mut callbacks.on_connect);
    }

    fn fire_on_write(&mut self) {
        self.invoke_lifecycle("on_write", |callbacks| &mut callbacks.on_write);
    }

    fn fire_on_close(&mut self) {
        self.invoke_lifecycle("on_close", |callbacks| &mut callbacks.on_close);
    }

    fn invoke_lifecycle(
        &mut self,
        name: &'static str,
        slot: for<'a> fn(&'a mut Callbacks<S, R>) -> &'a mut Option<LifecycleHook<S, R>>,
    ) {
        let Some(mut hook) = slot(&mut self.callbacks).take() else {
            return;
        };
        guarded(name, || hook(self));
        // Restore the hook unless it installed a replacement for itself.
        let place = slot(&mut self.callbacks);
        if place.is_none() {
            *place = Some(hook);
        }
    }

    fn fire_on_read(&mut self, data: Bytes) -> bool {
        let Some(mut hook) = self.callbacks.on_read.take() else {
            return true;
        };
        let completed = guarded("on_read", || hook(self, data));
        if self.callbacks.on_read.is_none() {
            self.callbacks.on_read = Some(hook);
        }
        completed
    }

    fn fire_on_accept(&mut self, conn: S::Handle, addr: SocketAddr) -> bool {
        let Some(mut hook) = self.callbacks.on_accept.take() else {
            // Nobody will wrap the handle; release it instead of leaking.
            self.sockets.close(conn);
            return true;
        };
        let completed = guarded("on_accept", || hook(self, conn, addr));
        if self.callbacks.on_accept.is_none() {
            self.callbacks.on_accept = Some(hook);
        }
        completed
    }
}
