use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::http::{read_head, Record};
use crate::rewind::Rewind;
use crate::ws::Limits;
use crate::{handshake, Error, Result, WebSocket, CLIENT};

/// Connection type returned by [`Client::dial`].
pub type WS = WebSocket<CLIENT, Rewind<MaybeTlsStream<TcpStream>>>;

/// Client endpoint configuration.
///
/// ```no_run
/// # async fn run() -> wsocket::Result<()> {
/// use wsocket::Client;
///
/// let client = Client {
///     subprotocols: vec!["chat".into()],
///     ..Client::default()
/// };
/// let ws = client.dial("ws://example.com/chat", &[]).await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    /// Read buffer capacity of the upgraded connection.
    pub read_buffer_size: usize,
    /// Write buffer capacity; also bounds the largest frame sent.
    pub write_buffer_size: usize,
    /// Largest reassembled message accepted before the connection fails
    /// with [`Error::MessageTooBig`].
    pub max_message_size: usize,
    /// Subprotocols to offer, most preferred first.
    pub subprotocols: Vec<String>,
    /// Abort the upgrade exchange after this long.
    pub handshake_timeout: Option<Duration>,
}

impl Default for Client {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            read_buffer_size: limits.read_buffer_size,
            write_buffer_size: limits.write_buffer_size,
            max_message_size: limits.max_message_size,
            subprotocols: Vec::new(),
            handshake_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl Client {
    /// Open a connection to a `ws://` or `wss://` URL and perform the
    /// upgrade exchange.
    ///
    /// `ws` dials plain TCP; `wss` additionally performs a TLS handshake
    /// (feature `tls`). Any other scheme fails with
    /// [`Error::BadHandshake`].
    pub async fn dial(&self, url: &str, extra_headers: &[(&str, &str)]) -> Result<WS> {
        let location = parse_url(url)?;
        let stream = TcpStream::connect(&location.addr).await?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();

        let stream = match location.secure {
            false => MaybeTlsStream::Plain(stream),
            #[cfg(feature = "tls")]
            true => MaybeTlsStream::Rustls(Box::new(
                tls_connect(location.domain, stream).await?,
            )),
            #[cfg(not(feature = "tls"))]
            true => return Err(Error::BadHandshake("`wss` requires the `tls` feature")),
        };

        let ws = self
            .handshake(stream, location.host, location.path, extra_headers)
            .await?;
        Ok(ws.with_addrs(local_addr, peer_addr))
    }

    /// Perform the upgrade exchange over an already-connected stream.
    ///
    /// The future owns `io`, so cancelling it (dropping the future, or the
    /// [`handshake_timeout`](Self::handshake_timeout) elapsing) abandons
    /// the stream. On success the connection takes the stream over,
    /// including any frame bytes buffered past the response head.
    pub async fn handshake<IO>(
        &self,
        io: IO,
        host: &str,
        path: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<WebSocket<CLIENT, Rewind<IO>>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let exchange = self.exchange(io, host, path, extra_headers);
        match self.handshake_timeout {
            Some(limit) => match timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => Err(Error::Io(io::ErrorKind::TimedOut.into())),
            },
            None => exchange.await,
        }
    }

    async fn exchange<IO>(
        &self,
        mut io: IO,
        host: &str,
        path: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<WebSocket<CLIENT, Rewind<IO>>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let (request, sec_key) = handshake::request(host, path, &self.subprotocols, extra_headers);
        io.write_all(request.as_bytes()).await?;
        io.flush().await?;

        let (head, leftover) = read_head(&mut io).await?;
        let record = Record::parse(&head).map_err(Error::BadHandshake)?;
        let protocol = handshake::validate_response(&record, &sec_key, &self.subprotocols)?;
        debug!(?protocol, "client handshake complete");

        let limits = Limits {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            max_message_size: self.max_message_size,
        };
        Ok(WebSocket::new(Rewind::new(leftover, io), &limits).with_protocol(protocol))
    }
}

struct Location<'a> {
    secure: bool,
    /// Authority as written in the URL, sent as the `Host` header.
    host: &'a str,
    /// `host:port` dialed over TCP.
    addr: String,
    /// Hostname without the port, for TLS server-name verification.
    #[cfg_attr(not(feature = "tls"), allow(dead_code))]
    domain: &'a str,
    path: &'a str,
}

fn parse_url(url: &str) -> Result<Location> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or(Error::BadHandshake("url must start with `ws://` or `wss://`"))?;
    let secure = match scheme {
        "ws" => false,
        "wss" => true,
        _ => return Err(Error::BadHandshake("url scheme must be `ws` or `wss`")),
    };

    let (host, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, "/"),
    };
    if host.is_empty() {
        return Err(Error::BadHandshake("url is missing a host"));
    }

    let (domain, addr) = match host.rsplit_once(':') {
        Some((domain, _)) => (domain, host.to_string()),
        None => (host, format!("{host}:{}", if secure { 443 } else { 80 })),
    };

    Ok(Location {
        secure,
        host,
        addr,
        domain,
        path,
    })
}

#[cfg(feature = "tls")]
async fn tls_connect(
    domain: &str,
    stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    use std::sync::Arc;

    use tokio_rustls::rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
    use tokio_rustls::TlsConnector;

    let mut root_store = RootCertStore::empty();
    root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let server_name = domain
        .try_into()
        .map_err(|_| Error::BadHandshake("host is not a valid TLS server name"))?;

    let connector = TlsConnector::from(Arc::new(config));
    Ok(connector.connect(server_name, stream).await?)
}

/// A plain TCP stream or its TLS-wrapped counterpart, so [`Client::dial`]
/// has one return type for both schemes.
pub enum MaybeTlsStream<S> {
    /// Unencrypted stream (`ws://`).
    Plain(S),
    /// TLS stream (`wss://`).
    #[cfg(feature = "tls")]
    Rustls(Box<tokio_rustls::client::TlsStream<S>>),
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
