//! mio-backed implementations of the socket and reactor seams.
//!
//! [`TcpSockets`] maps the [`Sockets`] capability onto `mio::net`, and
//! [`RegistryReactor`] maps the [`Reactor`] interface onto a `mio::Registry`
//! plus the `Token` the owner's event loop dispatches on. The owner still
//! runs the loop itself: poll, then route each event's token into
//! [`Stream::handle_read_ready`][crate::stream::Stream::handle_read_ready] /
//! [`handle_write_ready`][crate::stream::Stream::handle_write_ready].

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::reactor::Reactor;
use crate::socket::Sockets;

/// A mio TCP socket handle: either an in-flight/established connection or a
/// listener.
#[derive(Debug)]
pub enum TcpHandle {
    /// A connection handle.
    Stream(TcpStream),
    /// A listener handle.
    Listener(TcpListener),
}

impl TcpHandle {
    fn as_source(&mut self) -> &mut dyn mio::event::Source {
        match self {
            TcpHandle::Stream(stream) => stream,
            TcpHandle::Listener(listener) => listener,
        }
    }

    fn as_stream(&mut self) -> io::Result<&mut TcpStream> {
        match self {
            TcpHandle::Stream(stream) => Ok(stream),
            TcpHandle::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "handle is a listener, not a connection",
            )),
        }
    }
}

/// Socket primitives over `mio::net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSockets;

impl Sockets for TcpSockets {
    type Handle = TcpHandle;

    fn connect(&mut self, addr: SocketAddr) -> io::Result<(TcpHandle, bool)> {
        // mio never completes a connect synchronously; completion arrives as
        // write readiness.
        let stream = TcpStream::connect(addr)?;
        Ok((TcpHandle::Stream(stream), false))
    }

    fn listen(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<TcpHandle> {
        // mio enables address reuse on Unix but applies its own backlog; the
        // requested value is a best-effort hint here.
        debug!(%addr, backlog, "binding listener");
        let listener = TcpListener::bind(addr)?;
        Ok(TcpHandle::Listener(listener))
    }

    fn accept(&mut self, handle: &mut TcpHandle) -> io::Result<(TcpHandle, SocketAddr)> {
        match handle {
            TcpHandle::Listener(listener) => listener
                .accept()
                .map(|(stream, addr)| (TcpHandle::Stream(stream), addr)),
            TcpHandle::Stream(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "handle is a connection, not a listener",
            )),
        }
    }

    fn send(&mut self, handle: &mut TcpHandle, data: &[u8]) -> io::Result<usize> {
        handle.as_stream()?.write(data)
    }

    fn recv(&mut self, handle: &mut TcpHandle, buf: &mut [u8]) -> io::Result<usize> {
        handle.as_stream()?.read(buf)
    }

    fn pending_error(&mut self, handle: &mut TcpHandle) -> io::Result<Option<io::Error>> {
        match handle {
            TcpHandle::Stream(stream) => stream.take_error(),
            TcpHandle::Listener(listener) => listener.take_error(),
        }
    }

    fn local_addr(&self, handle: &TcpHandle) -> io::Result<SocketAddr> {
        match handle {
            TcpHandle::Stream(stream) => stream.local_addr(),
            TcpHandle::Listener(listener) => listener.local_addr(),
        }
    }

    fn peer_addr(&self, handle: &TcpHandle) -> io::Result<SocketAddr> {
        match handle {
            TcpHandle::Stream(stream) => stream.peer_addr(),
            TcpHandle::Listener(_) => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self, handle: TcpHandle) {
        drop(handle);
    }
}

/// Readiness registration over a `mio::Registry`.
///
/// One reactor handle per stream, carrying the `Token` the owner's event
/// loop dispatches on. Registration failures are logged, not propagated; the
/// stream has no recovery for them.
#[derive(Debug)]
pub struct RegistryReactor {
    registry: Registry,
    token: Token,
}

impl RegistryReactor {
    /// Wrap a registry clone and the token assigned to this stream.
    pub fn new(registry: Registry, token: Token) -> Self {
        Self { registry, token }
    }
}

impl Reactor<TcpHandle> for RegistryReactor {
    fn register(&mut self, handle: &mut TcpHandle) {
        if let Err(error) =
            self.registry
                .register(handle.as_source(), self.token, Interest::READABLE)
        {
            warn!(%error, token = self.token.0, "could not register with the poll registry");
        }
    }

    fn deregister(&mut self, handle: &mut TcpHandle) {
        if let Err(error) = self.registry.deregister(handle.as_source()) {
            warn!(%error, token = self.token.0, "could not deregister from the poll registry");
        }
    }

    fn request_write_readiness(&mut self, handle: &mut TcpHandle) {
        if let Err(error) = self.registry.reregister(
            handle.as_source(),
            self.token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            warn!(%error, token = self.token.0, "could not request write readiness");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use bytes::Bytes;
    use mio::{Events, Poll, Token};

    use super::{RegistryReactor, TcpSockets};
    use crate::delimiter::ReadDelimiter;
    use crate::stream::{ListenConfig, Stream};

    const LISTENER: Token = Token(0);
    const CLIENT: Token = Token(1);
    const SERVER_CONN: Token = Token(2);

    type TcpStream = Stream<TcpSockets, RegistryReactor>;

    fn reactor(poll: &Poll, token: Token) -> RegistryReactor {
        RegistryReactor::new(poll.registry().try_clone().unwrap(), token)
    }

    #[test]
    fn send_on_a_listener_handle_is_rejected() {
        use crate::socket::Sockets;

        crate::fixtures::subscribe();
        let mut sockets = TcpSockets;
        let mut handle = sockets
            .listen(([127, 0, 0, 1], 0).into(), 1024)
            .unwrap();
        let err = sockets.send(&mut handle, b"nope").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn loopback_connect_echo_and_close() {
        crate::fixtures::subscribe();
        let mut poll = Poll::new().unwrap();

        let mut listener = Stream::new(TcpSockets, reactor(&poll, LISTENER));
        listener.listen(ListenConfig::new(0).host("127.0.0.1"));
        assert!(listener.listening());
        let port = listener.local_addr().unwrap().port();

        // The owner wraps each accepted handle into its own stream.
        let accepted: Rc<RefCell<Option<TcpStream>>> = Rc::new(RefCell::new(None));
        let slot = accepted.clone();
        let registry = poll.registry().try_clone().unwrap();
        listener.on_accept(move |_, handle, _addr| {
            let reactor = RegistryReactor::new(registry.try_clone().unwrap(), SERVER_CONN);
            let mut conn = Stream::from_connected(TcpSockets, reactor, handle);
            conn.set_read_delimiter(ReadDelimiter::terminator(&b"\n"[..]).unwrap())
                .unwrap();
            conn.on_read(|conn, data| {
                let mut reply = data.to_vec();
                reply.push(b'\n');
                conn.write(&reply);
            });
            *slot.borrow_mut() = Some(conn);
        });

        let mut client = Stream::new(TcpSockets, reactor(&poll, CLIENT));
        let echoed = Rc::new(RefCell::new(Vec::new()));
        let sink = echoed.clone();
        client
            .set_read_delimiter(ReadDelimiter::terminator(&b"\n"[..]).unwrap())
            .unwrap();
        client.on_connect(|client| client.write(b"ping\n"));
        client.on_read(move |client, data| {
            sink.borrow_mut().push(data);
            client.close();
        });
        client.connect("127.0.0.1", port);
        assert!(client.connected());

        let mut events = Events::with_capacity(16);
        for _ in 0..100 {
            if client.closed() {
                break;
            }
            poll.poll(&mut events, Some(Duration::from_millis(100))).unwrap();
            for event in events.iter() {
                match event.token() {
                    LISTENER => listener.handle_read_ready(),
                    CLIENT => {
                        if event.is_writable() {
                            client.handle_write_ready();
                        }
                        if event.is_readable() {
                            client.handle_read_ready();
                        }
                    }
                    SERVER_CONN => {
                        if let Some(conn) = accepted.borrow_mut().as_mut() {
                            if event.is_writable() {
                                conn.handle_write_ready();
                            }
                            if event.is_readable() {
                                conn.handle_read_ready();
                            }
                        }
                    }
                    _ => unreachable!("unexpected token"),
                }
            }
        }

        assert_eq!(echoed.borrow().as_slice(), [Bytes::from_static(b"ping")]);
        assert!(client.closed());
        assert!(listener.listening());
    }
}
