#![allow(clippy::unusual_byte_groupings)]

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::mask::{apply_mask, new_mask};
use crate::{Error, Opcode, Result, CLIENT, SERVER};

/// Frame header ceiling: 2 fixed bytes + 8 of extended length + 4 of mask.
pub(crate) const MAX_HEAD: usize = 14;

/// One parsed frame.
///
/// The payload is plaintext: when the wire carried a mask, it was removed
/// during decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[inline]
pub(crate) async fn read_chunk<const N: usize, R>(stream: &mut R) -> Result<[u8; N]>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0; N];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read exactly one frame.
///
/// ```txt
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
/// |     Extended payload length continued, if payload len == 127  |
/// + - - - - - - - - - - - - - - - +-------------------------------+
/// |                               |Masking-key, if MASK set to 1  |
/// +-------------------------------+-------------------------------+
/// | Masking-key (continued)       |          Payload Data         |
/// +-------------------------------- - - - - - - - - - - - - - - - +
/// ```
///
/// `max_payload_len` bounds the declared length of data frames, so an
/// oversized frame is rejected before any of its payload is read.
pub(crate) async fn read_frame<const SIDE: bool, R>(
    stream: &mut R,
    max_payload_len: usize,
) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let [b0, b1] = read_chunk(stream).await?;

    let fin = b0 & 0b_1000_0000 != 0;
    if b0 & 0b_0111_0000 != 0 {
        // MUST be `0` unless an extension was negotiated; none ever is.
        return Err(Error::Protocol("reserved bits are set"));
    }
    let opcode = Opcode::try_from(b0 & 0b_1111)?;

    let masked = b1 & 0b_1000_0000 != 0;
    let len7 = (b1 & 0b_0111_1111) as u64;

    if opcode.is_control() {
        if !fin {
            return Err(Error::Protocol("control frame must not be fragmented"));
        }
        if len7 > 125 {
            return Err(Error::Protocol("control frame payload exceeds 125 bytes"));
        }
    }

    let len = match len7 {
        126 => u16::from_be_bytes(read_chunk(stream).await?) as u64,
        127 => {
            let len = u64::from_be_bytes(read_chunk(stream).await?);
            if len & (1 << 63) != 0 {
                return Err(Error::Protocol("most significant bit of a 64-bit length must be 0"));
            }
            len
        }
        len => len,
    };

    if SIDE == SERVER && !masked {
        return Err(Error::Protocol("client frames must be masked"));
    }
    if SIDE == CLIENT && masked {
        return Err(Error::Protocol("server frames must not be masked"));
    }

    if !opcode.is_control() && len > max_payload_len as u64 {
        return Err(Error::MessageTooBig {
            size: len,
            limit: max_payload_len,
        });
    }

    let mut payload = vec![0; len as usize];
    if masked {
        let mask: [u8; 4] = read_chunk(stream).await?;
        stream.read_exact(&mut payload).await?;
        apply_mask(&mut payload, mask, 0);
    } else {
        stream.read_exact(&mut payload).await?;
    }

    Ok(Frame { fin, opcode, payload })
}

/// Write one frame.
///
/// Client frames get a fresh masking key; the payload is masked into a
/// copy so the caller's buffer stays untouched.
pub(crate) async fn write_frame<const SIDE: bool, W>(
    stream: &mut W,
    fin: bool,
    opcode: Opcode,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mask_bit = if SIDE == CLIENT { 0x80 } else { 0 };

    let mut head = [0; MAX_HEAD];
    let mut head_len = encode_head(&mut head, fin, opcode.into(), payload.len(), mask_bit);

    if SIDE == CLIENT {
        let mask = new_mask();
        head[head_len..head_len + 4].copy_from_slice(&mask);
        head_len += 4;
        stream.write_all(&head[..head_len]).await?;

        let mut masked = payload.to_vec();
        apply_mask(&mut masked, mask, 0);
        stream.write_all(&masked).await?;
    } else {
        stream.write_all(&head[..head_len]).await?;
        stream.write_all(payload).await?;
    }
    Ok(())
}

fn encode_head(head: &mut [u8; MAX_HEAD], fin: bool, opcode: u8, len: usize, mask_bit: u8) -> usize {
    head[0] = ((fin as u8) << 7) | opcode;
    if len < 126 {
        head[1] = mask_bit | len as u8;
        2
    } else if len < 65536 {
        head[1] = mask_bit | 126;
        head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        4
    } else {
        head[1] = mask_bit | 127;
        head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &[u8] = b"Hello";

    async fn encode<const SIDE: bool>(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![];
        write_frame::<SIDE, _>(&mut bytes, fin, opcode, payload)
            .await
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn unmasked_txt_msg() {
        let bytes = encode::<SERVER>(true, Opcode::Text, DATA).await;
        assert_eq!(bytes, [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[tokio::test]
    async fn fragmented_unmasked_txt_msg() {
        let mut bytes = encode::<SERVER>(false, Opcode::Text, b"Hel").await;
        bytes.extend(encode::<SERVER>(true, Opcode::Continue, b"lo").await);
        assert_eq!(
            bytes,
            [
                0x01, 0x03, 0x48, 0x65, 0x6c, // fragmented frame
                0x80, 0x02, 0x6c, 0x6f, // final frame
            ]
        );
    }

    #[tokio::test]
    async fn unmasked_ping_req() {
        let bytes = encode::<SERVER>(true, Opcode::Ping, DATA).await;
        assert_eq!(bytes, [0x89, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[tokio::test]
    async fn extended_payload_lengths() {
        let bytes = encode::<SERVER>(true, Opcode::Binary, &[0; 256]).await;
        assert_eq!(&bytes[..4], [0x82, 126, 1, 0]);

        let bytes = encode::<SERVER>(true, Opcode::Binary, &[0; 65536]).await;
        assert_eq!(&bytes[..10], [0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[tokio::test]
    async fn masked_frame_keeps_the_callers_buffer() {
        let payload = DATA.to_vec();
        let bytes = encode::<CLIENT>(true, Opcode::Text, &payload).await;
        assert_eq!(payload, DATA);

        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 0x80 | 5);
        let mask = [bytes[2], bytes[3], bytes[4], bytes[5]];
        let mut body = bytes[6..].to_vec();
        apply_mask(&mut body, mask, 0);
        assert_eq!(body, DATA);
    }

    #[tokio::test]
    async fn decodes_the_masked_sample() {
        let mut bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ]
        .as_slice();
        let frame = read_frame::<SERVER, _>(&mut bytes, 1024).await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, DATA);
    }

    #[tokio::test]
    async fn round_trip() {
        for opcode in [Opcode::Text, Opcode::Binary] {
            let payload: Vec<u8> = (0..2000).map(|i| i as u8).collect();

            let mut wire = encode::<SERVER>(true, opcode, &payload).await;
            let frame = read_frame::<CLIENT, _>(&mut wire.as_slice(), 1 << 20)
                .await
                .unwrap();
            assert_eq!((frame.opcode, &frame.payload), (opcode, &payload));

            let mut wire = encode::<CLIENT>(true, opcode, &payload).await;
            let frame = read_frame::<SERVER, _>(&mut wire.as_slice(), 1 << 20)
                .await
                .unwrap();
            assert_eq!((frame.opcode, &frame.payload), (opcode, &payload));
        }
    }

    #[tokio::test]
    async fn rejects_reserved_bits() {
        let mut bytes = [0xC1, 0x00].as_slice();
        assert!(matches!(
            read_frame::<CLIENT, _>(&mut bytes, 1024).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_opcodes() {
        for opcode in [0x83, 0x87, 0x8B, 0x8F] {
            let buf = [opcode, 0x00];
            let mut bytes = buf.as_slice();
            assert!(matches!(
                read_frame::<CLIENT, _>(&mut bytes, 1024).await,
                Err(Error::BadOpcode(_))
            ));
        }
    }

    #[tokio::test]
    async fn rejects_fragmented_control_frames() {
        let mut bytes = [0x09, 0x00].as_slice();
        assert!(matches!(
            read_frame::<CLIENT, _>(&mut bytes, 1024).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_control_frames() {
        let mut bytes = [0x89, 126, 0, 126].as_slice();
        assert!(matches!(
            read_frame::<CLIENT, _>(&mut bytes, 1024).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn server_rejects_unmasked_frames() {
        let mut bytes = [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f].as_slice();
        assert!(matches!(
            read_frame::<SERVER, _>(&mut bytes, 1024).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn client_rejects_masked_frames() {
        let mut bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ]
        .as_slice();
        assert!(matches!(
            read_frame::<CLIENT, _>(&mut bytes, 1024).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_a_64bit_length_with_the_top_bit_set() {
        let mut bytes = [0x82, 127, 0x80, 0, 0, 0, 0, 0, 0, 1].as_slice();
        assert!(matches!(
            read_frame::<CLIENT, _>(&mut bytes, 1024).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_a_frame_over_the_size_limit() {
        let mut bytes = [0x82, 126, 0x10, 0x00].as_slice();
        let err = read_frame::<CLIENT, _>(&mut bytes, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MessageTooBig { size: 4096, limit: 1024 }
        ));
    }
}
