//! The HTTP/1.1 upgrade exchange, both sides of it.
//!
//! A client opens with a GET request carrying `Upgrade: websocket`,
//! `Connection: Upgrade`, a random base64 nonce in `Sec-WebSocket-Key`
//! and `Sec-WebSocket-Version: 13`. The server proves it understood the
//! request by hashing the nonce into `Sec-WebSocket-Accept` on its
//! `101 Switching Protocols` response; anything else fails the handshake
//! and the stream is dropped.

use sha1::{Digest, Sha1};

use crate::http::{format_fields, trim, Record};
use crate::{Error, Result};

/// GUID appended to the client's key when deriving `Sec-WebSocket-Accept`
/// (RFC 6455 §1.3).
pub const ACCEPT_GUID: &[u8; 36] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive the `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`.
///
/// Per RFC 6455 §4.2.2 the key is concatenated with [`ACCEPT_GUID`] and
/// the response header carries the base64-encoded SHA-1 digest of that
/// string. The RFC's worked example maps the key
/// `dGhlIHNhbXBsZSBub25jZQ==` to `s3pPLMBiTxaQ9kYGzzhZRbK+xOo=`.
pub fn derive_accept_key(key: impl AsRef<[u8]>) -> String {
    let mut digest = Sha1::new();
    digest.update(key.as_ref());
    digest.update(ACCEPT_GUID);
    base64_encode(digest.finalize())
}

/// Build the client upgrade request.
///
/// Returns `(request, key)`; the key is a fresh 16-byte nonce and the
/// caller needs it to verify the accept value in the response.
pub fn request(
    host: impl AsRef<str>,
    path: impl AsRef<str>,
    protocols: &[String],
    extra_headers: &[(&str, &str)],
) -> (String, String) {
    let host = host.as_ref();
    let path = path.as_ref().trim_start_matches('/');
    let key = base64_encode(rand::random::<u128>().to_ne_bytes());

    let mut extra = format_fields(extra_headers);
    if !protocols.is_empty() {
        extra += &format!("Sec-WebSocket-Protocol: {}\r\n", protocols.join(", "));
    }
    (
        format!("GET /{path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: {key}\r\n{extra}\r\n"),
        key,
    )
}

/// Build the server's `101 Switching Protocols` response, echoing the
/// selected subprotocol when there is one.
pub fn response(
    key: impl AsRef<[u8]>,
    protocol: Option<&str>,
    extra_headers: &[(&str, &str)],
) -> String {
    let accept = derive_accept_key(key);
    let mut extra = format_fields(extra_headers);
    if let Some(protocol) = protocol {
        extra += &format!("Sec-WebSocket-Protocol: {protocol}\r\n");
    }
    format!("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n{extra}\r\n")
}

/// Check a server response against the request that prompted it.
///
/// Returns the subprotocol the server selected, if any; selecting one the
/// client never offered is a failed handshake.
pub(crate) fn validate_response(
    record: &Record,
    key: &str,
    offered: &[String],
) -> Result<Option<Box<str>>> {
    let mut status = record.start_line.split(|&byte| byte == b' ').skip(1);
    if status.next() != Some(b"101".as_slice()) {
        return Err(Error::BadHandshake("expected `101 Switching Protocols`"));
    }
    if !record.contains_token("upgrade", "websocket") {
        return Err(Error::BadHandshake("missing `Upgrade: websocket`"));
    }
    if !record.contains_token("connection", "upgrade") {
        return Err(Error::BadHandshake("missing `Connection: Upgrade`"));
    }

    let accept = derive_accept_key(key);
    if record.get("sec-websocket-accept") != Some(accept.as_bytes()) {
        return Err(Error::BadHandshake("`Sec-WebSocket-Accept` mismatch"));
    }

    match record.get("sec-websocket-protocol") {
        None => Ok(None),
        Some(selected) => {
            let selected = std::str::from_utf8(selected)
                .map_err(|_| Error::BadHandshake("invalid `Sec-WebSocket-Protocol`"))?;
            if offered.iter().any(|offer| offer == selected) {
                Ok(Some(selected.into()))
            } else {
                Err(Error::BadHandshake("server selected a protocol that was not offered"))
            }
        }
    }
}

/// Check a client upgrade request; on success returns the value of
/// `Sec-WebSocket-Key`.
pub(crate) fn validate_request<'a>(record: &Record<'a>) -> Result<&'a [u8]> {
    let (method, _target, version) = record
        .request_line()
        .ok_or(Error::BadHandshake("malformed request line"))?;
    if method != b"GET" {
        return Err(Error::MethodNotAllowed);
    }
    if !record.contains_token("upgrade", "websocket")
        || !record.contains_token("connection", "upgrade")
    {
        return Err(Error::BadUpgrade);
    }
    if version != b"HTTP/1.1" {
        return Err(Error::BadHandshake("expected HTTP/1.1"));
    }
    if record.get("sec-websocket-version") != Some(b"13".as_slice()) {
        return Err(Error::BadHandshake("unsupported `Sec-WebSocket-Version`"));
    }

    let key = record
        .get("sec-websocket-key")
        .ok_or(Error::BadHandshake("missing `Sec-WebSocket-Key`"))?;
    match base64_decode(key) {
        Some(nonce) if nonce.len() == 16 => Ok(key),
        _ => Err(Error::BadHandshake("`Sec-WebSocket-Key` must encode 16 bytes")),
    }
}

/// Choose at most one subprotocol: the first of `supported` that appears
/// in the client's comma-separated offer.
pub(crate) fn select_protocol<'a>(
    supported: &'a [String],
    offer: Option<&[u8]>,
) -> Option<&'a str> {
    let offer = offer?;
    supported.iter().map(String::as_str).find(|name| {
        offer
            .split(|&byte| byte == b',')
            .any(|part| trim(part) == name.as_bytes())
    })
}

fn base64_encode(data: impl AsRef<[u8]>) -> String {
    base64::Engine::encode(&base64::prelude::BASE64_STANDARD, data)
}

fn base64_decode(data: &[u8]) -> Option<Vec<u8>> {
    base64::Engine::decode(&base64::prelude::BASE64_STANDARD, data).ok()
}
