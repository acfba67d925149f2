//! Framing modes for the inbound byte stream.
//!
//! A [`ReadDelimiter`] selects how a stream's receive buffer is split into
//! discrete messages before delivery to the `on_read` callback. The mode can
//! be reassigned at any time, including from within a delivery callback; the
//! extraction loop picks up the new mode on its next iteration.
//!
//! Configurations that could never make progress are rejected when the
//! delimiter is assigned to a stream, not discovered mid-extraction: a
//! fixed length of zero would deliver an endless run of empty frames, and an
//! empty terminator would never match.

use bytes::Bytes;

use crate::error::StreamError;

/// The policy for splitting the continuous inbound byte stream into
/// discrete messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadDelimiter {
    /// No framing: every drained chunk of buffered bytes is delivered whole.
    #[default]
    Raw,
    /// Deliver exactly `n`-byte messages, waiting until `n` bytes are
    /// buffered.
    FixedLength(usize),
    /// Deliver the bytes preceding each occurrence of the terminator
    /// sequence. The terminator itself is stripped and never delivered.
    Terminator(Bytes),
}

impl ReadDelimiter {
    /// Checked constructor for [`ReadDelimiter::FixedLength`].
    pub fn fixed_length(n: usize) -> Result<Self, StreamError> {
        let delimiter = ReadDelimiter::FixedLength(n);
        delimiter.validate()?;
        Ok(delimiter)
    }

    /// Checked constructor for [`ReadDelimiter::Terminator`].
    pub fn terminator(terminator: impl Into<Bytes>) -> Result<Self, StreamError> {
        let delimiter = ReadDelimiter::Terminator(terminator.into());
        delimiter.validate()?;
        Ok(delimiter)
    }

    /// Rejects configurations that can never yield a complete message.
    pub fn validate(&self) -> Result<(), StreamError> {
        match self {
            ReadDelimiter::Raw => Ok(()),
            ReadDelimiter::FixedLength(0) => Err(StreamError::InvalidFraming(
                "fixed-length framing requires a non-zero length",
            )),
            ReadDelimiter::FixedLength(_) => Ok(()),
            ReadDelimiter::Terminator(t) if t.is_empty() => Err(StreamError::InvalidFraming(
                "terminator framing requires a non-empty byte sequence",
            )),
            ReadDelimiter::Terminator(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_raw() {
        assert_eq!(ReadDelimiter::default(), ReadDelimiter::Raw);
    }

    #[test]
    fn fixed_length_rejects_zero() {
        assert!(matches!(
            ReadDelimiter::fixed_length(0),
            Err(StreamError::InvalidFraming(_))
        ));
        assert_eq!(
            ReadDelimiter::fixed_length(4).unwrap(),
            ReadDelimiter::FixedLength(4)
        );
    }

    #[test]
    fn terminator_rejects_empty() {
        assert!(matches!(
            ReadDelimiter::terminator(&b""[..]),
            Err(StreamError::InvalidFraming(_))
        ));
        assert_eq!(
            ReadDelimiter::terminator(&b"\r\n"[..]).unwrap(),
            ReadDelimiter::Terminator(Bytes::from_static(b"\r\n"))
        );
    }
}
