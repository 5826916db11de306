// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

/// The error taxonomy shared by every layer of the engine: the transport, the
/// framer, the codec, and dispatch all report through this type rather than
/// each inventing their own.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The operation is still in flight; not a failure.
    #[error("operation pending")]
    Pending,

    /// A caller-supplied buffer was null, too short to hold a header, or
    /// otherwise unusable.
    #[error("invalid buffer")]
    InvalidBuffer,

    /// A caller-supplied buffer was smaller than the data being written into it.
    #[error("buffer too small")]
    BufferTooSmall,

    /// A frame or value declared a length that exceeds this implementation's
    /// safety bound (64 MiB for strings/binary, 2^20 elements for arrays).
    #[error("buffer too large")]
    BufferTooLarge,

    /// The OS reported more data is available than fit in the read buffer.
    #[error("more data available")]
    MoreData,

    /// An operation did not complete before its deadline.
    #[error("timed out")]
    TimedOut,

    /// The peer is gone: broken pipe, zero-length read, or a peer
    /// (session, process) identity mismatch on re-probe.
    #[error("disconnected")]
    Disconnected,

    /// The OS rejected posting another operation (too many outstanding).
    #[error("too much data")]
    TooMuchData,

    /// The transport reports connected when the caller expected otherwise.
    #[error("already connected")]
    Connected,

    /// A length-prefixed read overran its declared bound.
    #[error("buffer overflow")]
    BufferOverflow,

    /// A pending operation was cancelled before completion.
    #[error("operation abandoned")]
    Abandoned,

    /// A value or envelope failed to decode: bad discriminant, truncated
    /// payload, or a declared length that overruns the buffer.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// The wire-level framing was malformed (bad tag, unknown envelope
    /// discriminant).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Dispatch could not find the named function within an otherwise valid
    /// collection.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Dispatch could not find the named collection.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// A caller-supplied name was invalid (too long, non-ASCII, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Wraps any underlying OS I/O error not otherwise classified above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic, uncategorized failure; used sparingly, mirroring the
    /// source's catch-all `os::error::Error`.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Maps a raw OS error code (errno-shaped) to the taxonomy above, per
    /// the table in the engine design: SUCCESS -> (not an error, see
    /// [`Error::from_os_success`] sites), BROKEN_PIPE/NO_DATA -> Disconnected,
    /// MORE_DATA -> MoreData, TIMEOUT -> TimedOut, TOO_MANY_POSTS ->
    /// TooMuchData, anything else -> Other. This is the single canonical
    /// OS-error mapping: every layer that touches a raw `std::io::Error`
    /// (the framer's frame reads/writes, the transport's connect/accept)
    /// routes through this function rather than each inventing its own.
    pub fn from_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            BrokenPipe | NotConnected | ConnectionReset | ConnectionAborted | UnexpectedEof => {
                Error::Disconnected
            }
            TimedOut => Error::TimedOut,
            WouldBlock => Error::Pending,
            _ => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// Error returned by a synchronous call, distinguishing timeout/cancellation
/// from a legitimately empty successful reply.
#[derive(Debug)]
pub enum CallError {
    /// The call timed out waiting for a reply; the pending entry has already
    /// been removed from the correlation table.
    TimedOut,

    /// The call was cancelled (locally, or the connection dropped) before a
    /// reply arrived.
    Cancelled,

    /// The call could not even be submitted (no transport, encode failure,
    /// already disconnected).
    NotSent(Error),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::TimedOut => write!(f, "call timed out"),
            CallError::Cancelled => write!(f, "call cancelled"),
            CallError::NotSent(e) => write!(f, "call not sent: {e}"),
        }
    }
}

impl std::error::Error for CallError {}
