//! # Rill: reactor-driven non-blocking stream transport
//!
//! Rill turns raw, level-triggered socket readiness events into a coherent
//! connection lifecycle, buffered and backpressured byte transport, and a
//! configurable message framing abstraction — all delivered to the owner as a
//! small set of callbacks, and all without ever blocking the single
//! event-loop thread.
//!
//! ## Architecture Overview
//!
//! The crate is built around one type, [`stream::Stream`], and two seams it
//! consumes rather than implements:
//!
//! - **[`socket::Sockets`]**: the non-blocking socket primitives
//!   (connect/listen/accept/send/recv/…), held as a capability object so the
//!   transport logic is independent of any particular socket stack.
//! - **[`reactor::Reactor`]**: the readiness multiplexer. The reactor owns
//!   the poll loop and dispatches read/write readiness into the stream's
//!   [`handle_read_ready`][stream::Stream::handle_read_ready] and
//!   [`handle_write_ready`][stream::Stream::handle_write_ready] entry points;
//!   the stream only registers, deregisters, and requests write-readiness
//!   notifications.
//!
//! On top of those seams the stream layers:
//!
//! 1. **Lifecycle**: `Closed → Connecting → Connected`, or `Closed →
//!    Listening`, with guarded no-ops for misuse and `close()` as the single
//!    idempotent teardown path.
//! 2. **Backpressure**: writes that cannot complete immediately are buffered
//!    in strict FIFO order and drained on write readiness; `on_write` fires
//!    when the backlog empties.
//! 3. **Framing**: inbound bytes accumulate in a receive buffer and are
//!    split into messages by a [`delimiter::ReadDelimiter`] — raw chunks,
//!    fixed-length frames, or terminator-separated records — each delivered
//!    through `on_read`.
//! 4. **Accept draining**: a listening stream drains all pending connections
//!    per readiness event and hands each raw handle to `on_accept`; the owner
//!    wraps it, typically with [`stream::Stream::from_connected`].
//! 5. **Callback isolation**: every owner callback runs under a guard that
//!    catches panics, logs them, and aborts only the current event-handling
//!    pass, so a misbehaving hook cannot corrupt transport state.
//!
//! Dispatch is single-threaded and cooperative: nothing here locks, and
//! nothing here blocks. Timeouts, retries, TLS, and application protocols are
//! the owner's business, built on top of the callbacks and whatever timer
//! facilities the reactor provides.
//!
//! ## Example
//!
//! With the default `net` feature, the bundled mio adapter wires a stream to
//! a `mio::Poll` loop:
//!
//! ```rust,no_run
//! use mio::{Events, Poll, Token};
//! use rill::net::{RegistryReactor, TcpSockets};
//! use rill::stream::{ListenConfig, Stream};
//!
//! fn main() -> std::io::Result<()> {
//!     let mut poll = Poll::new()?;
//!     let reactor = RegistryReactor::new(poll.registry().try_clone()?, Token(0));
//!
//!     let mut server = Stream::new(TcpSockets, reactor);
//!     server
//!         .on_accept(|_server, _handle, addr| println!("connection from {addr}"))
//!         .listen(ListenConfig::new(8080));
//!
//!     let mut events = Events::with_capacity(64);
//!     loop {
//!         poll.poll(&mut events, None)?;
//!         for event in events.iter() {
//!             if event.token() == Token(0) {
//!                 server.handle_read_ready();
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Testing
//!
//! The [`mock`] module provides scripted socket primitives and a recording
//! reactor, so transport behavior — partial sends, framing boundaries,
//! connect failures, accept bursts — can be exercised deterministically
//! without opening a socket.
//!
//! ## Feature Flags
//!
//! - `net` (default): the mio-backed [`net`] adapter.

mod callback;
pub mod delimiter;
pub mod error;
pub mod mock;
#[cfg(feature = "net")]
pub mod net;
pub mod reactor;
pub mod socket;
pub mod stream;

/// Test fixtures
#[cfg(test)]
pub(crate) mod fixtures {

    use std::sync::Once;

    /// Registers a global default tracing subscriber when called for the
    /// first time. This is intended for use in tests.
    pub fn subscribe() {
        static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
        INSTALL_TRACING_SUBSCRIBER.call_once(|| {
            let subscriber = tracing_subscriber::FmtSubscriber::builder()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .finish();
            tracing::subscriber::set_global_default(subscriber).unwrap();
        });
    }
}
