use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::http::{read_head, Record};
use crate::rewind::Rewind;
use crate::ws::Limits;
use crate::{handshake, Error, Result, WebSocket, SERVER};

/// Server endpoint configuration.
///
/// ```no_run
/// # async fn run() -> wsocket::Result<()> {
/// use tokio::net::TcpListener;
/// use wsocket::Server;
///
/// let server = Server::default();
/// let listener = TcpListener::bind("127.0.0.1:9001").await?;
/// loop {
///     let (stream, _) = listener.accept().await?;
///     let ws = server.accept(stream).await?;
///     let msg = ws.recv().await?;
///     ws.send(msg.opcode, &msg.data).await?;
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Server {
    /// Read buffer capacity of upgraded connections.
    pub read_buffer_size: usize,
    /// Write buffer capacity; also bounds the largest frame sent.
    pub write_buffer_size: usize,
    /// Largest reassembled message accepted before a connection fails
    /// with [`Error::MessageTooBig`].
    pub max_message_size: usize,
    /// Supported subprotocols, most preferred first. The first one the
    /// client also offers is selected and echoed.
    pub subprotocols: Vec<String>,
}

impl Default for Server {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            read_buffer_size: limits.read_buffer_size,
            write_buffer_size: limits.write_buffer_size,
            max_message_size: limits.max_message_size,
            subprotocols: Vec::new(),
        }
    }
}

impl Server {
    /// Upgrade an accepted TCP connection.
    pub async fn accept(&self, stream: TcpStream) -> Result<WebSocket<SERVER, Rewind<TcpStream>>> {
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        Ok(self.upgrade(stream).await?.with_addrs(local_addr, peer_addr))
    }

    /// Read and answer the upgrade request on a hijacked byte stream.
    ///
    /// On a bad request the matching status (405, 426 or 400) is written
    /// before the error is returned. Bytes the header read pulled in past
    /// the request head are preserved for the framing layer.
    pub async fn upgrade<IO>(&self, mut io: IO) -> Result<WebSocket<SERVER, Rewind<IO>>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let (head, leftover) = read_head(&mut io).await?;
        let record = match Record::parse(&head) {
            Ok(record) => record,
            Err(msg) => {
                respond_error(&mut io, "400 Bad Request").await;
                return Err(Error::BadHandshake(msg));
            }
        };

        let sec_key = match handshake::validate_request(&record) {
            Ok(key) => key,
            Err(err) => {
                let status = match err {
                    Error::MethodNotAllowed => "405 Method Not Allowed",
                    Error::BadUpgrade => "426 Upgrade Required",
                    _ => "400 Bad Request",
                };
                respond_error(&mut io, status).await;
                return Err(err);
            }
        };

        let protocol =
            handshake::select_protocol(&self.subprotocols, record.get("sec-websocket-protocol"));
        let response = handshake::response(sec_key, protocol, &[]);
        io.write_all(response.as_bytes()).await?;
        io.flush().await?;
        debug!(?protocol, "server handshake complete");

        let limits = Limits {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            max_message_size: self.max_message_size,
        };
        let protocol = protocol.map(Box::from);
        Ok(WebSocket::new(Rewind::new(leftover, io), &limits).with_protocol(protocol))
    }
}

async fn respond_error<IO>(io: &mut IO, status: &str)
where
    IO: AsyncWrite + Unpin,
{
    let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n");
    let _ = io.write_all(response.as_bytes()).await;
    let _ = io.flush().await;
}
