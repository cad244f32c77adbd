use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::close_code::is_valid_on_wire;
use crate::frame::{read_frame, write_frame, Frame, MAX_HEAD};
use crate::{Error, Opcode, Result};

/// The logical unit delivered to the application: one or more frames
/// sharing a logical opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opcode of the message's first frame; never [`Opcode::Continue`].
    pub opcode: Opcode,
    /// Concatenation of every fragment payload.
    pub data: Vec<u8>,
}

impl Message {
    /// The payload of a Text message as UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        (self.opcode == Opcode::Text)
            .then(|| std::str::from_utf8(&self.data).ok())
            .flatten()
    }

    /// Status carried by a Close message; 1000 when the payload is empty.
    pub fn close_code(&self) -> Option<u16> {
        (self.opcode == Opcode::Close).then(|| match self.data.get(..2) {
            Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
            _ => 1000,
        })
    }

    /// Reason text carried by a Close message.
    pub fn close_reason(&self) -> Option<&str> {
        if self.opcode != Opcode::Close {
            return None;
        }
        std::str::from_utf8(self.data.get(2..).unwrap_or_default()).ok()
    }
}

/// Reads logical messages from the frame sequence of one stream.
///
/// The assembler is pure: control frames arriving mid-fragmentation are
/// surfaced as their own messages and never answered here. Replies are the
/// connection's business.
#[derive(Debug)]
pub(crate) struct MessageReader<const SIDE: bool, R> {
    stream: BufReader<R>,
    max_message_size: usize,
    /// First opcode and accumulated payload of an unfinished fragmented
    /// message.
    partial: Option<(Opcode, Vec<u8>)>,
}

impl<const SIDE: bool, R> MessageReader<SIDE, R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: R, read_buffer_size: usize, max_message_size: usize) -> Self {
        Self {
            stream: BufReader::with_capacity(read_buffer_size, stream),
            max_message_size,
            partial: None,
        }
    }

    /// Read frames until one message completes.
    ///
    /// A control frame interleaved in a fragmented message returns
    /// immediately; the partial assembly is picked up on the next call.
    pub async fn next(&mut self) -> Result<Message> {
        loop {
            let assembled = self.partial.as_ref().map_or(0, |(_, data)| data.len());
            let budget = self.max_message_size - assembled;
            let frame = read_frame::<SIDE, _>(&mut self.stream, budget).await?;

            if frame.opcode.is_control() {
                return control_message(frame);
            }

            match self.partial.take() {
                None => {
                    if frame.opcode.is_continue() {
                        return Err(Error::Protocol("continuation frame without a message to continue"));
                    }
                    if frame.fin {
                        return Ok(Message {
                            opcode: frame.opcode,
                            data: frame.payload,
                        });
                    }
                    self.partial = Some((frame.opcode, frame.payload));
                }
                Some((opcode, mut data)) => {
                    if !frame.opcode.is_continue() {
                        return Err(Error::Protocol("expected a continuation frame"));
                    }
                    data.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok(Message { opcode, data });
                    }
                    self.partial = Some((opcode, data));
                }
            }
        }
    }
}

fn control_message(frame: Frame) -> Result<Message> {
    if frame.opcode == Opcode::Close {
        validate_close_payload(&frame.payload)?;
    }
    Ok(Message {
        opcode: frame.opcode,
        data: frame.payload,
    })
}

fn validate_close_payload(payload: &[u8]) -> Result<()> {
    match payload {
        [] => Ok(()),
        [_] => Err(Error::Protocol("close payload of one byte carries no status")),
        [hi, lo, reason @ ..] => {
            if !is_valid_on_wire(u16::from_be_bytes([*hi, *lo])) {
                return Err(Error::Protocol("invalid close status"));
            }
            if std::str::from_utf8(reason).is_err() {
                return Err(Error::Protocol("close reason is not valid utf-8"));
            }
            Ok(())
        }
    }
}

/// Writes logical messages as one or more frames sized to the write
/// buffer.
#[derive(Debug)]
pub(crate) struct MessageWriter<const SIDE: bool, W> {
    stream: BufWriter<W>,
    /// Largest frame payload: the write buffer minus the header ceiling.
    max_frame_size: usize,
}

impl<const SIDE: bool, W> MessageWriter<SIDE, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(stream: W, write_buffer_size: usize) -> Self {
        let write_buffer_size = write_buffer_size.max(MAX_HEAD + 1);
        Self {
            stream: BufWriter::with_capacity(write_buffer_size, stream),
            max_frame_size: write_buffer_size - MAX_HEAD,
        }
    }

    /// Write one message and flush it to the wire.
    ///
    /// Control payloads must fit one frame. Data payloads are split into
    /// continuation frames of at most a buffer's worth each; the first
    /// carries the message opcode, the last the FIN bit.
    pub async fn write(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if opcode.is_continue() {
            return Err(Error::Protocol("a message opcode cannot be a continuation"));
        }
        if opcode.is_control() {
            if payload.len() > 125 {
                return Err(Error::Protocol("control frame payload exceeds 125 bytes"));
            }
            write_frame::<SIDE, _>(&mut self.stream, true, opcode, payload).await?;
        } else if payload.len() <= self.max_frame_size {
            write_frame::<SIDE, _>(&mut self.stream, true, opcode, payload).await?;
        } else {
            let mut opcode = opcode;
            let mut chunks = payload.chunks(self.max_frame_size).peekable();
            while let Some(chunk) = chunks.next() {
                let fin = chunks.peek().is_none();
                write_frame::<SIDE, _>(&mut self.stream, fin, opcode, chunk).await?;
                opcode = Opcode::Continue;
            }
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the underlying stream down, flushing anything buffered.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CLIENT, SERVER};

    fn reader(bytes: &[u8], max_message_size: usize) -> MessageReader<CLIENT, &[u8]> {
        MessageReader::new(bytes, 1024, max_message_size)
    }

    #[tokio::test]
    async fn assembles_a_fragmented_text_message() {
        // "Hello " + "WebSocket!" split across a continuation.
        let mut wire = vec![0x01, 0x06];
        wire.extend(b"Hello ");
        wire.extend([0x80, 0x0A]);
        wire.extend(b"WebSocket!");

        let mut reader = reader(&wire, 1024);
        let msg = reader.next().await.unwrap();
        assert_eq!(msg.opcode, Opcode::Text);
        assert_eq!(msg.as_text(), Some("Hello WebSocket!"));
    }

    #[tokio::test]
    async fn control_frames_interleave_without_losing_the_assembly() {
        let mut wire = vec![0x01, 0x06];
        wire.extend(b"Hello ");
        wire.extend([0x89, 0x04]);
        wire.extend(b"ping");
        wire.extend([0x80, 0x0A]);
        wire.extend(b"WebSocket!");

        let mut reader = reader(&wire, 1024);
        let ping = reader.next().await.unwrap();
        assert_eq!(ping.opcode, Opcode::Ping);
        assert_eq!(ping.data, b"ping");

        let msg = reader.next().await.unwrap();
        assert_eq!(msg.opcode, Opcode::Text);
        assert_eq!(msg.as_text(), Some("Hello WebSocket!"));
    }

    #[tokio::test]
    async fn rejects_a_lone_continuation() {
        let wire = [0x80, 0x02, b'h', b'i'];
        let mut reader = reader(&wire, 1024);
        assert!(matches!(
            reader.next().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_a_new_data_opcode_mid_assembly() {
        let mut wire = vec![0x01, 0x02];
        wire.extend(b"hi");
        wire.extend([0x82, 0x02]);
        wire.extend(b"hi");

        let mut reader = reader(&wire, 1024);
        assert!(matches!(
            reader.next().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn enforces_the_message_budget_across_fragments() {
        // 8 + 8 bytes against a 12-byte budget: the continuation's declared
        // length alone is fine, the total is not.
        let mut wire = vec![0x01, 0x08];
        wire.extend([b'a'; 8]);
        wire.extend([0x80, 0x08]);
        wire.extend([b'b'; 8]);

        let mut reader = reader(&wire, 12);
        assert!(matches!(
            reader.next().await,
            Err(Error::MessageTooBig { size: 8, limit: 4 })
        ));
    }

    #[tokio::test]
    async fn close_with_code_and_reason() {
        let mut wire = vec![0x88, 0x07, 0x03, 0xE9];
        wire.extend(b"going");

        let mut reader = reader(&wire, 1024);
        let msg = reader.next().await.unwrap();
        assert_eq!(msg.opcode, Opcode::Close);
        assert_eq!(msg.close_code(), Some(1001));
        assert_eq!(msg.close_reason(), Some("going"));
    }

    #[tokio::test]
    async fn close_without_payload_reads_as_normal() {
        let wire = [0x88, 0x00];
        let mut reader = reader(&wire, 1024);
        let msg = reader.next().await.unwrap();
        assert_eq!(msg.close_code(), Some(1000));
        assert_eq!(msg.close_reason(), Some(""));
    }

    #[tokio::test]
    async fn rejects_a_one_byte_close_payload() {
        let wire = [0x88, 0x01, 0x03];
        let mut reader = reader(&wire, 1024);
        assert!(matches!(
            reader.next().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_a_reserved_close_status() {
        let wire = [0x88, 0x02, 0x03, 0xED]; // 1005
        let mut reader = reader(&wire, 1024);
        assert!(matches!(
            reader.next().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn splits_large_messages_into_continuations() {
        let payload: Vec<u8> = (0..1000).map(|i| i as u8).collect();

        let mut wire = vec![];
        {
            // 256-byte buffer: 242-byte frames.
            let mut writer: MessageWriter<SERVER, _> = MessageWriter::new(&mut wire, 256);
            writer.write(Opcode::Binary, &payload).await.unwrap();
        }

        let mut frames = vec![];
        let mut rest = wire.as_slice();
        while !rest.is_empty() {
            frames.push(read_frame::<CLIENT, _>(&mut rest, 4096).await.unwrap());
        }

        assert!(frames.len() > 1);
        assert_eq!(frames[0].opcode, Opcode::Binary);
        assert!(!frames[0].fin);
        for frame in &frames[1..] {
            assert_eq!(frame.opcode, Opcode::Continue);
            assert!(frame.payload.len() <= 242);
        }
        assert!(frames.last().unwrap().fin);

        let reassembled: Vec<u8> = frames.into_iter().flat_map(|f| f.payload).collect();
        assert_eq!(reassembled, payload);
    }

    #[tokio::test]
    async fn small_messages_stay_whole() {
        let mut wire = vec![];
        {
            let mut writer: MessageWriter<SERVER, _> = MessageWriter::new(&mut wire, 4096);
            writer.write(Opcode::Text, b"Hello").await.unwrap();
        }
        assert_eq!(wire, [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[tokio::test]
    async fn control_frames_are_never_split() {
        let mut wire = vec![];
        let mut writer: MessageWriter<SERVER, _> = MessageWriter::new(&mut wire, 64);
        assert!(writer.write(Opcode::Ping, &[b'p'; 126]).await.is_err());
        assert!(writer.write(Opcode::Ping, &[b'p'; 125]).await.is_ok());
    }
}
