//! Error taxonomy for stream transport failures.
//!
//! Primitive-level failures never escape a [`Stream`][crate::stream::Stream]
//! method as a panic or an `Err`: they are converted into a state transition
//! (usually a close) plus a log record carrying one of these variants. The
//! only fallible public surface is delimiter validation.

use std::io;

use thiserror::Error;

/// Classified failures of the stream transport.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The non-blocking connect attempt failed, either at initiation or when
    /// the socket reported a pending error at completion time. Terminal: the
    /// stream closes.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Binding or listening failed. Terminal: the stream closes.
    #[error("bind/listen failed: {0}")]
    BindOrListen(#[source] io::Error),

    /// The send primitive failed. Terminal: the stream closes and any
    /// buffered outbound bytes are discarded.
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// The receive primitive failed. Terminal: the stream closes.
    #[error("recv failed: {0}")]
    Recv(#[source] io::Error),

    /// The accept primitive failed. Non-terminal: the current accept pass is
    /// aborted, the listening stream stays open.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A framing configuration was rejected at assignment time.
    #[error("invalid framing configuration: {0}")]
    InvalidFraming(&'static str),

    /// A lifecycle-initiating call was made in a state that does not permit
    /// it. These are guarded idempotent no-ops, logged as warnings.
    #[error("lifecycle misuse: {0}")]
    LifecycleMisuse(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(StreamError: std::error::Error, Send, Sync);

    #[test]
    fn connect_error_carries_source() {
        let err = StreamError::Connect(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("connect failed"));
    }

    #[test]
    fn framing_error_has_no_source() {
        let err = StreamError::InvalidFraming("empty terminator");
        assert!(std::error::Error::source(&err).is_none());
    }
}
