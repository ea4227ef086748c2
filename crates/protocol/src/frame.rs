//! Wire framing
//!
//! Every payload carried by the transport starts with the message type code:
//!
//! ```text
//! ┌───────────┬──────┬──────────┐
//! │ type_code │ u16  │ 2 bytes  │  big-endian
//! ├───────────┼──────┼──────────┤
//! │ payload   │ [u8] │ N bytes  │  codec-defined
//! └───────────┴──────┴──────────┘
//! ```
//!
//! Frame boundaries are the transport's business; a frame here is exactly
//! one transport data event.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::CodecType;
use crate::error::{ProtocolError, Result};
use crate::message::Message;

/// Size of the type code prefix
pub const TYPE_CODE_LEN: usize = 2;

/// Writes a type code followed by an already encoded payload
pub fn write_frame<B: BufMut>(buf: &mut B, type_code: u16, payload: &[u8]) {
    buf.put_u16(type_code);
    buf.put_slice(payload);
}

/// Encodes a message into a standalone frame
pub fn encode_frame(message: &dyn Message, codec: CodecType) -> Result<Bytes> {
    let payload = message.encode_payload(codec)?;
    let mut buf = BytesMut::with_capacity(TYPE_CODE_LEN + payload.len());
    write_frame(&mut buf, message.type_code(), &payload);
    Ok(buf.freeze())
}

/// Splits a frame into its type code and payload
pub fn split_type_code(frame: &[u8]) -> Result<(u16, &[u8])> {
    if frame.len() < TYPE_CODE_LEN {
        return Err(ProtocolError::FrameTooShort {
            need: TYPE_CODE_LEN,
            have: frame.len(),
        });
    }
    let (head, payload) = frame.split_at(TYPE_CODE_LEN);
    Ok((u16::from_be_bytes([head[0], head[1]]), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{codes, Ping};

    #[test]
    fn test_type_code_is_big_endian() {
        let frame = encode_frame(&Ping { timestamp: 1 }, CodecType::Postcard).unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0x00]);
        assert_eq!(&frame[2..], &[0x01]);
    }

    #[test]
    fn test_split_type_code() {
        let (code, payload) = split_type_code(&[0xFF, 0x01, 0xAA, 0xBB]).unwrap();
        assert_eq!(code, codes::PONG);
        assert_eq!(payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_split_empty_payload() {
        let (code, payload) = split_type_code(&[0x00, 0x07]).unwrap();
        assert_eq!(code, 7);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_split_too_short() {
        assert_eq!(
            split_type_code(&[0x01]),
            Err(ProtocolError::FrameTooShort { need: 2, have: 1 })
        );
        assert!(split_type_code(&[]).is_err());
    }
}
