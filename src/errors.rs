use std::io;

/// Error type returned by every fallible operation in this crate.
///
/// Frame-level failures (`Protocol`, `BadOpcode`, `MessageTooBig`) are
/// fatal for the connection: the peer is notified with a Close frame where
/// possible and the connection transitions to closed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying stream failure: read, write, or timeout.
    #[error("websocket: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame: reserved bits, bad fragmentation, wrong masking,
    /// oversized or fragmented control frame, invalid close payload.
    #[error("websocket: protocol error: {0}")]
    Protocol(&'static str),

    /// Frame opcode outside the six values RFC 6455 defines.
    #[error("websocket: bad opcode: {0:#x}")]
    BadOpcode(u8),

    /// A frame declared more payload than the remaining message budget.
    #[error("websocket: message too big: {size} bytes exceeds limit of {limit}")]
    MessageTooBig {
        /// Declared payload length.
        size: u64,
        /// Remaining budget the frame was measured against.
        limit: usize,
    },

    /// The HTTP upgrade exchange failed.
    #[error("websocket: bad handshake: {0}")]
    BadHandshake(&'static str),

    /// Server: the request's `Upgrade`/`Connection` headers do not ask for
    /// a websocket upgrade.
    #[error("websocket: bad upgrade")]
    BadUpgrade,

    /// Server: the upgrade request used a method other than `GET`.
    #[error("websocket: method not allowed")]
    MethodNotAllowed,

    /// Operation attempted after the connection closed.
    #[error("websocket: connection closed")]
    Closed,
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
