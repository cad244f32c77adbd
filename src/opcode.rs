use std::fmt;

/// Defines the interpretation of a frame's payload data. If an unknown
/// opcode is received, the receiving endpoint MUST _Fail the WebSocket
/// Connection_.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// The FIN and opcode fields work together to send a message split up
    /// into separate frames. This is called message fragmentation.
    ///
    /// ```txt
    /// Client: FIN=1, opcode=0x1, msg="hello"
    /// Server: (process complete message immediately) Hi.
    /// Client: FIN=0, opcode=0x1, msg="and a"
    /// Server: (listening, new message containing text started)
    /// Client: FIN=0, opcode=0x0, msg="happy new"
    /// Server: (listening, payload concatenated to previous message)
    /// Client: FIN=1, opcode=0x0, msg="year!"
    /// Server: (process complete message) Happy new year to you too!
    /// ```
    Continue = 0,

    /// UTF-8 encoded payload.
    Text = 1,
    /// Arbitrary binary payload.
    Binary = 2,

    // 3-7 are reserved for further non-control frames.
    /// Starts, or completes, the closing handshake.
    ///
    /// The Close frame MAY contain a body; if it does, the first two bytes
    /// are a big-endian status code, the rest a UTF-8 reason.
    Close = 8,

    /// A Ping frame may serve either as a keepalive or as a means to
    /// verify that the remote endpoint is still responsive.
    Ping = 9,

    /// A Pong frame sent in response to a Ping must carry the identical
    /// application data found in the Ping being answered. It MAY also be
    /// sent unsolicited as a unidirectional heartbeat.
    Pong = 10,
    // 11-15 are reserved for further control frames.
}

impl Opcode {
    /// Whether the opcode indicates a control frame (Close, Ping or Pong).
    ///
    /// Control frames MUST NOT be fragmented and carry at most 125 bytes.
    #[inline]
    pub fn is_control(self) -> bool {
        self as u8 >= 8
    }

    /// Whether the opcode starts a data message (Text or Binary).
    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }

    /// Whether this is the continuation opcode.
    #[inline]
    pub fn is_continue(self) -> bool {
        matches!(self, Opcode::Continue)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = crate::Error;

    #[inline]
    fn try_from(value: u8) -> std::result::Result<Self, crate::Error> {
        Ok(match value {
            0 => Opcode::Continue,
            1 => Opcode::Text,
            2 => Opcode::Binary,
            8 => Opcode::Close,
            9 => Opcode::Ping,
            10 => Opcode::Pong,
            _ => return Err(crate::Error::BadOpcode(value)),
        })
    }
}

impl From<Opcode> for u8 {
    #[inline]
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Opcode::Continue => "CONTINUE",
            Opcode::Text => "TEXT",
            Opcode::Binary => "BINARY",
            Opcode::Close => "CLOSE",
            Opcode::Ping => "PING",
            Opcode::Pong => "PONG",
        })
    }
}
