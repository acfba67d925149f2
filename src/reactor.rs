//! The readiness-multiplexer interface consumed by a stream.
//!
//! The reactor itself lives outside this crate: it polls a set of sockets for
//! readiness and dispatches events into
//! [`Stream::handle_read_ready`][crate::stream::Stream::handle_read_ready] and
//! [`Stream::handle_write_ready`][crate::stream::Stream::handle_write_ready].
//! The stream only needs the narrow control surface below.
//!
//! The interface is infallible at this boundary: the stream has no sensible
//! recovery from a registration failure, so implementations handle and log
//! their own errors (see [`RegistryReactor`][crate::net::RegistryReactor] for
//! the mio-backed example).

/// Readiness registration for a single stream's handle.
///
/// A stream registers its handle when one comes into existence, asks for
/// write-readiness notification whenever it has outbound backlog or an
/// in-flight connect, and deregisters exactly once, inside `close()`. The
/// stream is the only party permitted to deregister itself.
pub trait Reactor<H> {
    /// Add the handle to the readiness set, interested in read events.
    fn register(&mut self, handle: &mut H);

    /// Remove the handle from the readiness set.
    fn deregister(&mut self, handle: &mut H);

    /// Ask for a future write-readiness notification for the handle.
    fn request_write_readiness(&mut self, handle: &mut H);
}
