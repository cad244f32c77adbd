use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::message::{Message, MessageReader, MessageWriter};
use crate::{CloseCode, Error, Opcode, Result, CLIENT, SERVER};

/// Connection tuning shared by the client and server configurations.
#[derive(Debug, Clone)]
pub(crate) struct Limits {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_message_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// A WebSocket connection over `IO`, for either endpoint role.
///
/// The connection may be shared by one reader and one writer at a time:
/// every method takes `&self`, and the two directions are serialized by
/// their own locks. The read lock is never held across a write, so a
/// [`recv`](Self::recv) that has to answer a Ping cannot deadlock against
/// a concurrent [`send`](Self::send).
#[derive(Debug)]
pub struct WebSocket<const SIDE: bool, IO> {
    reader: Mutex<MessageReader<SIDE, ReadHalf<IO>>>,
    writer: Mutex<MessageWriter<SIDE, WriteHalf<IO>>>,

    // Consulted without holding either lock.
    closed: AtomicBool,
    close_sent: AtomicBool,
    close_received: AtomicBool,

    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    protocol: Option<Box<str>>,
}

impl<IO> WebSocket<CLIENT, IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-upgraded stream as the client endpoint.
    ///
    /// Outgoing frames are masked; incoming frames must not be.
    #[inline]
    pub fn client(stream: IO) -> Self {
        Self::new(stream, &Limits::default())
    }
}

impl<IO> WebSocket<SERVER, IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-upgraded stream as the server endpoint.
    ///
    /// Incoming frames must be masked; outgoing frames are not.
    #[inline]
    pub fn server(stream: IO) -> Self {
        Self::new(stream, &Limits::default())
    }
}

impl<const SIDE: bool, IO> WebSocket<SIDE, IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: IO, limits: &Limits) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: Mutex::new(MessageReader::new(
                reader,
                limits.read_buffer_size,
                limits.max_message_size,
            )),
            writer: Mutex::new(MessageWriter::new(writer, limits.write_buffer_size)),
            closed: AtomicBool::new(false),
            close_sent: AtomicBool::new(false),
            close_received: AtomicBool::new(false),
            local_addr: None,
            peer_addr: None,
            protocol: None,
        }
    }

    pub(crate) fn with_addrs(
        mut self,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        self.local_addr = local_addr;
        self.peer_addr = peer_addr;
        self
    }

    pub(crate) fn with_protocol(mut self, protocol: Option<Box<str>>) -> Self {
        self.protocol = protocol;
        self
    }

    /// Send one message.
    ///
    /// The frames of a single message are contiguous on the wire; two
    /// concurrent sends are serialized a whole message at a time. Sending
    /// [`Opcode::Close`] here marks the connection closed.
    pub async fn send(&self, opcode: Opcode, payload: impl AsRef<[u8]>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if opcode == Opcode::Close && self.close_sent.swap(true, Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write(opcode, payload.as_ref()).await?;
        drop(writer);

        if opcode == Opcode::Close {
            self.closed.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Send a Text message.
    #[inline]
    pub async fn send_text(&self, payload: impl AsRef<str>) -> Result<()> {
        self.send(Opcode::Text, payload.as_ref()).await
    }

    /// Send a Binary message.
    #[inline]
    pub async fn send_binary(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.send(Opcode::Binary, payload).await
    }

    /// Send a Ping with the given payload.
    #[inline]
    pub async fn send_ping(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.send(Opcode::Ping, payload).await
    }

    /// Send a Pong with the given payload.
    #[inline]
    pub async fn send_pong(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.send(Opcode::Pong, payload).await
    }

    /// Send a Close frame carrying `code` and `reason`, and mark the
    /// connection closed.
    ///
    /// The reason must fit next to the 2-byte status inside the 125-byte
    /// control payload, so at most 123 bytes.
    pub async fn close(&self, code: impl Into<u16>, reason: impl AsRef<[u8]>) -> Result<()> {
        let reason = reason.as_ref();
        if reason.len() > 123 {
            return Err(Error::Protocol("close reason exceeds 123 bytes"));
        }
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.into().to_be_bytes());
        payload.extend_from_slice(reason);
        self.send(Opcode::Close, payload).await
    }

    /// Receive the next message.
    ///
    /// Pings are answered with a Pong carrying the same payload before
    /// this returns; the Ping itself is still delivered so callers can
    /// observe liveness. A received Close is echoed (status preserved,
    /// 1000 when absent) unless this side already sent one, and the
    /// connection is marked closed. Fatal frame errors notify the peer
    /// with Close 1002, or 1009 for an oversized message, then surface.
    pub async fn recv(&self) -> Result<Message> {
        if self.close_received.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }

        let msg = {
            let mut reader = self.reader.lock().await;
            reader.next().await
        };
        // The read lock is released above: the frame that produced `msg`
        // is fully consumed, so replying below cannot deadlock.
        match msg {
            Ok(msg) => {
                match msg.opcode {
                    Opcode::Ping => match self.send(Opcode::Pong, &msg.data).await {
                        Ok(()) | Err(Error::Closed) => {}
                        Err(err) => warn!("failed to answer ping: {err}"),
                    },
                    Opcode::Close => self.echo_close(&msg).await,
                    _ => {}
                }
                Ok(msg)
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    async fn echo_close(&self, msg: &Message) {
        self.close_received.store(true, Ordering::Relaxed);
        self.closed.store(true, Ordering::Relaxed);
        if self.close_sent.swap(true, Ordering::Relaxed) {
            return;
        }
        let code = msg.close_code().unwrap_or(1000);
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write(Opcode::Close, &code.to_be_bytes()).await {
            warn!("failed to echo close frame: {err}");
        }
        debug!(code, "closing handshake complete");
    }

    /// Fail the connection: notify the peer best-effort, then close.
    async fn fail(&self, err: &Error) {
        self.close_received.store(true, Ordering::Relaxed);
        self.closed.store(true, Ordering::Relaxed);

        let code = match err {
            Error::MessageTooBig { .. } => CloseCode::MessageTooBig,
            Error::Protocol(_) | Error::BadOpcode(_) => CloseCode::ProtocolError,
            _ => return,
        };
        if self.close_sent.swap(true, Ordering::Relaxed) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write(Opcode::Close, &u16::from(code).to_be_bytes()).await {
            debug!("failed to send close frame: {err}");
        }
    }

    /// Local address of the underlying stream, when known.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Peer address of the underlying stream, when known.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Subprotocol agreed on during the handshake.
    #[inline]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Whether the connection reached its final state.
    ///
    /// The flag is monotonic: it flips on the first of an explicit close,
    /// a completed closing handshake, or a fatal error.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Mark the connection closed and shut the stream down.
    ///
    /// In-flight operations fail with [`Error::Io`] or [`Error::Closed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        self.close_received.store(true, Ordering::Relaxed);
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}
