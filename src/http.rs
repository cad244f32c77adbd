//! Utilities for the HTTP/1.1 side of the upgrade exchange.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// A parsed HTTP/1.1 head: the start line plus the header fields.
///
/// Lookups are ASCII-case-insensitive on the field name; values are kept
/// as raw bytes with surrounding whitespace trimmed.
///
/// ### Example
///
/// ```rust
/// let head = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
/// let record = wsocket::http::Record::parse(head).unwrap();
///
/// assert_eq!(record.start_line, b"HTTP/1.1 101 Switching Protocols");
/// assert_eq!(record.get("UPGRADE"), Some("websocket".as_bytes()));
/// assert!(record.contains_token("connection", "upgrade"));
/// ```
#[derive(Default, Clone)]
pub struct Record<'a> {
    /// Request or status line.
    pub start_line: &'a [u8],
    /// Header fields in arrival order.
    pub fields: Vec<(&'a [u8], &'a [u8])>,
}

const HTTP_EOF_ERR: &str = "http parse error: unexpected end";

impl<'a> Record<'a> {
    /// Parse an HTTP/1.1 head section.
    pub fn parse(mut bytes: &'a [u8]) -> std::result::Result<Self, &'static str> {
        let start_line = next_line(&mut bytes).ok_or(HTTP_EOF_ERR)?;
        let mut fields = Vec::new();
        loop {
            let line = next_line(&mut bytes).ok_or(HTTP_EOF_ERR)?;
            if line.is_empty() {
                return Ok(Self { start_line, fields });
            }
            let colon = line
                .iter()
                .position(|&byte| byte == b':')
                .ok_or("http parse error: invalid header field")?;
            let (name, value) = line.split_at(colon);
            fields.push((name, trim(&value[1..])));
        }
    }

    /// Value of the first field named `name`, compared case-insensitively.
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&'a [u8]> {
        let name = name.as_ref();
        self.fields
            .iter()
            .find_map(|(n, v)| n.eq_ignore_ascii_case(name).then_some(*v))
    }

    /// Whether `name`'s comma-separated value list contains `token`,
    /// compared case-insensitively.
    ///
    /// `Connection: keep-alive, Upgrade` contains the token `upgrade`.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(|&byte| byte == b',')
                .any(|part| trim(part).eq_ignore_ascii_case(token.as_bytes()))
        })
    }

    /// Split a request start line into `(method, target, version)`.
    pub fn request_line(&self) -> Option<(&'a [u8], &'a [u8], &'a [u8])> {
        let mut parts = self
            .start_line
            .split(|&byte| byte == b' ')
            .filter(|part| !part.is_empty());
        let method = parts.next()?;
        let target = parts.next()?;
        let version = parts.next()?;
        Some((method, target, version))
    }
}

impl std::fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<_> = self
            .fields
            .iter()
            .map(|(n, v)| (String::from_utf8_lossy(n), String::from_utf8_lossy(v)))
            .collect();
        f.debug_struct("Record")
            .field("start_line", &String::from_utf8_lossy(self.start_line))
            .field("fields", &fields)
            .finish()
    }
}

/// Render `(name, value)` pairs as header lines for an upgrade request or
/// response.
pub(crate) fn format_fields(fields: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (name, value) in fields {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out
}

/// Read from `stream` until the blank line ending an HTTP head.
///
/// Returns the head (terminator included) and whatever was pulled in past
/// it; those leftover bytes belong to the framing layer and must reach the
/// connection's read buffer.
pub(crate) async fn read_head<R>(stream: &mut R) -> Result<(Vec<u8>, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    const MAX_HEAD: usize = 8 * 1024;

    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0; 1024];
    loop {
        let amt = stream.read(&mut chunk).await?;
        if amt == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        head.extend_from_slice(&chunk[..amt]);

        if let Some(end) = find_terminator(&head) {
            let leftover = head.split_off(end);
            return Ok((head, leftover));
        }
        if head.len() > MAX_HEAD {
            return Err(Error::BadHandshake("header section too large"));
        }
    }
}

fn find_terminator(head: &[u8]) -> Option<usize> {
    head.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|index| index + 4)
}

// --------------------------------------------------------------------------

/// Next line of the head, with the trailing `\r` stripped.
fn next_line<'a>(bytes: &mut &'a [u8]) -> Option<&'a [u8]> {
    let end = bytes.iter().position(|&byte| byte == b'\n')?;
    let (line, rest) = bytes.split_at(end);
    *bytes = &rest[1..];
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

pub(crate) fn trim(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}
