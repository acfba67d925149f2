//! Owner-supplied callback table and the guarded-invoke isolation layer.
//!
//! Callbacks receive `&mut Stream` so they may mutate the stream they were
//! fired from: close it, re-frame it, or write more data. To make that
//! possible without aliasing, the stream takes a hook out of its slot before
//! running it and restores it afterwards, unless the hook installed a
//! replacement for itself while running (which is how `end()` defers `close()`
//! until the outbound buffer drains).
//!
//! A panic inside a hook is caught, logged, and aborts only the current
//! event-handling pass; it never corrupts the stream's internal state or
//! escapes to the reactor. Nothing the stream mutated before invoking the
//! hook is rolled back.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::Bytes;
use tracing::error;

use crate::socket::Sockets;
use crate::stream::Stream;

/// A lifecycle hook: `on_connect`, `on_write`, or `on_close`.
pub(crate) type LifecycleHook<S, R> = Box<dyn FnMut(&mut Stream<S, R>)>;

/// The handler table. Empty slots are no-ops; a slot is also empty while its
/// hook is being invoked.
pub(crate) struct Callbacks<S: Sockets, R> {
    pub(crate) on_connect: Option<LifecycleHook<S, R>>,
    pub(crate) on_read: Option<Box<dyn FnMut(&mut Stream<S, R>, Bytes)>>,
    pub(crate) on_write: Option<LifecycleHook<S, R>>,
    pub(crate) on_close: Option<LifecycleHook<S, R>>,
    pub(crate) on_accept: Option<Box<dyn FnMut(&mut Stream<S, R>, S::Handle, SocketAddr)>>,
}

impl<S: Sockets, R> Default for Callbacks<S, R> {
    fn default() -> Self {
        Self {
            on_connect: None,
            on_read: None,
            on_write: None,
            on_close: None,
            on_accept: None,
        }
    }
}

impl<S: Sockets, R> fmt::Debug for Callbacks<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_read", &self.on_read.is_some())
            .field("on_write", &self.on_write.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_accept", &self.on_accept.is_some())
            .finish()
    }
}

/// Run a hook, catching and logging a panic instead of letting it propagate
/// into the stream's event handling. Returns whether the hook completed.
pub(crate) fn guarded<F: FnOnce()>(name: &'static str, hook: F) -> bool {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                callback = name,
                panic = panic_message(&*payload),
                "callback panicked; aborting this event-handling pass"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_reports_completion() {
        crate::fixtures::subscribe();
        assert!(guarded("ok", || {}));
    }

    #[test]
    fn guarded_catches_panics() {
        crate::fixtures::subscribe();
        assert!(!guarded("boom", || panic!("exploded")));
        assert!(!guarded("boom", || panic!("{} exploded", "formatted")));
    }
}
