//! Scalability-protocol framing over TCP
//!
//! ```text
//! Handshake (each side, once per connection):
//! ┌──────┬──────┬──────┬──────┬─────────────────┬─────────────┐
//! │ 0x00 │ 'S'  │ 'P'  │ 0x00 │ protocol (u16)  │ reserved    │
//! └──────┴──────┴──────┴──────┴─────────────────┴─────────────┘
//!
//! Message:
//! ┌──────────────────────────┬────────────────────────────────┐
//! │ payload length (u64 BE)  │ payload                        │
//! └──────────────────────────┴────────────────────────────────┘
//! ```
//!
//! Compatible with nanomsg and nng pub/sub peers. The payload is carried
//! as-is; there is no topic or envelope.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

use crate::error::NetworkError;

pub const HANDSHAKE_LEN: usize = 8;
pub const MESSAGE_HEADER_LEN: usize = 8;

const SIGNATURE: [u8; 4] = [0x00, b'S', b'P', 0x00];

/// Socket roles on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Protocol {
    Pub = 0x20,
    Sub = 0x21,
}

impl Protocol {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x20 => Some(Protocol::Pub),
            0x21 => Some(Protocol::Sub),
            _ => None,
        }
    }

    pub fn id(self) -> u16 {
        self as u16
    }

    /// The only protocol allowed on the other end of a connection
    pub fn peer(self) -> Protocol {
        match self {
            Protocol::Pub => Protocol::Sub,
            Protocol::Sub => Protocol::Pub,
        }
    }
}

pub fn encode_handshake(protocol: Protocol) -> [u8; HANDSHAKE_LEN] {
    let mut out = [0u8; HANDSHAKE_LEN];
    let mut buf = &mut out[..];
    buf.put_slice(&SIGNATURE);
    buf.put_u16(protocol.id());
    buf.put_u16(0);
    out
}

pub fn decode_handshake(header: &[u8; HANDSHAKE_LEN]) -> Result<Protocol, NetworkError> {
    if header[..4] != SIGNATURE {
        return Err(NetworkError::HandshakeFailed(format!(
            "bad signature {:02x?}",
            &header[..4]
        )));
    }
    let mut rest = &header[4..];
    let id = rest.get_u16();
    Protocol::from_id(id)
        .ok_or_else(|| NetworkError::HandshakeFailed(format!("unknown protocol 0x{:04x}", id)))
}

/// Exchange handshakes and check that the peer plays the opposite role
pub fn handshake<S: Read + Write>(stream: &mut S, local: Protocol) -> Result<(), NetworkError> {
    stream
        .write_all(&encode_handshake(local))
        .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;

    let mut header = [0u8; HANDSHAKE_LEN];
    stream
        .read_exact(&mut header)
        .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;

    let remote = decode_handshake(&header)?;
    if remote != local.peer() {
        return Err(NetworkError::HandshakeFailed(format!(
            "{:?} socket cannot talk to {:?}",
            local, remote
        )));
    }
    Ok(())
}

/// Length-prefix `payload` as one frame ready for the wire
pub fn encode_message(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN + payload.len());
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
    buf.freeze()
}

/// Read one message, refusing payloads larger than `max_size`
pub fn read_message<R: Read>(reader: &mut R, max_size: usize) -> io::Result<Bytes> {
    let mut header = [0u8; MESSAGE_HEADER_LEN];
    reader.read_exact(&mut header)?;
    let len = u64::from_be_bytes(header);
    if len > max_size as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            NetworkError::MessageTooLarge(len as usize),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_handshake_layout() {
        assert_eq!(
            encode_handshake(Protocol::Pub),
            [0x00, b'S', b'P', 0x00, 0x00, 0x20, 0x00, 0x00]
        );
        assert_eq!(
            decode_handshake(&encode_handshake(Protocol::Sub)).unwrap(),
            Protocol::Sub
        );
    }

    #[test]
    fn test_handshake_rejects_garbage() {
        let err = decode_handshake(b"GET / HT").unwrap_err();
        assert!(matches!(err, NetworkError::HandshakeFailed(_)));

        let mut pair = encode_handshake(Protocol::Pub);
        pair[5] = 0x10; // PAIR protocol
        assert!(decode_handshake(&pair).is_err());
    }

    /// In-memory stream: reads from a scripted peer, records writes
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_handshake_requires_opposite_role() {
        let mut ok = Scripted {
            input: Cursor::new(encode_handshake(Protocol::Sub).to_vec()),
            output: Vec::new(),
        };
        handshake(&mut ok, Protocol::Pub).unwrap();
        assert_eq!(ok.output, encode_handshake(Protocol::Pub));

        let mut same = Scripted {
            input: Cursor::new(encode_handshake(Protocol::Pub).to_vec()),
            output: Vec::new(),
        };
        assert!(handshake(&mut same, Protocol::Pub).is_err());
    }

    #[test]
    fn test_message_framing() {
        let framed = encode_message(b"\xff\xd8jpeg\xff\xd9");
        assert_eq!(&framed[..8], &8u64.to_be_bytes());

        let mut reader = Cursor::new(framed.to_vec());
        let payload = read_message(&mut reader, 1024).unwrap();
        assert_eq!(&payload[..], b"\xff\xd8jpeg\xff\xd9");
    }

    #[test]
    fn test_oversized_message_rejected() {
        let framed = encode_message(&[0u8; 64]);
        let mut reader = Cursor::new(framed.to_vec());
        let err = read_message(&mut reader, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_message_is_an_error() {
        let framed = encode_message(b"hello");
        let mut reader = Cursor::new(framed[..10].to_vec());
        let err = read_message(&mut reader, 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
