//! Incremental frame decoding for client connections.
//!
//! Two wire formats are supported, chosen once per connection at handshake
//! time:
//!
//! - **Legacy**: every frame is `0x00 <payload> 0xFF`.
//! - **WebSocket**: the RFC 6455 subset browsers actually send: a 2-byte
//!   header, optional 16/64-bit extended length, optional 4-byte XOR mask.
//!
//! The parser never blocks and never fails on a short buffer. Bytes belonging
//! to an incomplete frame stay buffered until the next [`FrameParser::feed`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum frame payload size (16 MiB). Prevents OOM on malformed data.
pub const MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

/// Which framing a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// `0x00 ... 0xFF` byte-stuffed frames (pre-RFC 6455 handshake).
    Legacy,
    /// RFC 6455 length-prefixed, optionally masked frames.
    WebSocket,
}

/// One decoded application-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete text payload, ready for the message decoder.
    Text(String),
    /// A text frame without `fin` set. Fragments are not reassembled; the
    /// caller decides what to do with the partial payload.
    Fragment(Bytes),
    /// Ping with its application data; the caller answers with a pong.
    Ping(Bytes),
    Pong,
    Close,
    /// Binary, continuation or reserved opcode. The payload has been
    /// consumed and dropped.
    Unsupported { opcode: u8 },
}

/// Structural framing violations. Any of these ends the connection.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("legacy frame does not start with 0x00 (found 0x{0:02x})")]
    LegacyDesync(u8),

    #[error("frame payload too large: {0} bytes")]
    TooLarge(u64),
}

/// Accumulates raw socket bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameParser {
    variant: Variant,
    buf: BytesMut,
}

impl FrameParser {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            buf: BytesMut::new(),
        }
    }

    /// Create a parser seeded with bytes that arrived together with the HTTP
    /// upgrade request.
    pub fn with_initial(variant: Variant, initial: &[u8]) -> Self {
        let mut parser = Self::new(variant);
        parser.feed(initial);
        parser
    }

    /// Number of bytes buffered but not yet consumed as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append newly read bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes are
    /// removed from the front of the buffer; the remainder is left intact.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        match self.variant {
            Variant::Legacy => self.next_legacy(),
            Variant::WebSocket => self.next_websocket(),
        }
    }

    fn next_legacy(&mut self) -> Result<Option<Frame>, FramingError> {
        let Some(&first) = self.buf.first() else {
            return Ok(None);
        };
        if first != 0x00 {
            return Err(FramingError::LegacyDesync(first));
        }

        let Some(end) = self.buf.iter().position(|&b| b == 0xFF) else {
            if self.buf.len() as u64 > MAX_PAYLOAD_SIZE {
                return Err(FramingError::TooLarge(self.buf.len() as u64));
            }
            return Ok(None);
        };

        let frame = self.buf.split_to(end + 1);
        let text = String::from_utf8_lossy(&frame[1..end]).into_owned();
        Ok(Some(Frame::Text(text)))
    }

    fn next_websocket(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let fin = self.buf[0] & 0x80 != 0;
        let opcode = self.buf[0] & 0x0F;
        let masked = self.buf[1] & 0x80 != 0;
        let short_len = self.buf[1] & 0x7F;

        let mut header_len = 2usize;
        let payload_len = match short_len {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                header_len += 2;
                u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                header_len += 8;
                let mut len = [0u8; 8];
                len.copy_from_slice(&self.buf[2..10]);
                u64::from_be_bytes(len)
            }
            n => n as u64,
        };

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(FramingError::TooLarge(payload_len));
        }

        let mask = if masked {
            if self.buf.len() < header_len + 4 {
                return Ok(None);
            }
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&self.buf[header_len..header_len + 4]);
            header_len += 4;
            Some(mask)
        } else {
            None
        };

        let total = header_len + payload_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(header_len);
        let mut payload = self.buf.split_to(payload_len as usize);
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        let frame = match opcode {
            OPCODE_TEXT if fin => Frame::Text(String::from_utf8_lossy(&payload).into_owned()),
            OPCODE_TEXT => Frame::Fragment(payload.freeze()),
            OPCODE_CLOSE => Frame::Close,
            OPCODE_PING => Frame::Ping(payload.freeze()),
            OPCODE_PONG => Frame::Pong,
            other => Frame::Unsupported { opcode: other },
        };
        Ok(Some(frame))
    }
}

/// Encode an application payload as a text frame in the given variant.
///
/// Legacy frames cannot carry `0xFF` in their payload; callers send
/// base64 or ASCII text only.
pub fn encode_text(variant: Variant, payload: &[u8]) -> Bytes {
    match variant {
        Variant::Legacy => {
            let mut buf = BytesMut::with_capacity(payload.len() + 2);
            buf.put_u8(0x00);
            buf.put_slice(payload);
            buf.put_u8(0xFF);
            buf.freeze()
        }
        Variant::WebSocket => encode_websocket(OPCODE_TEXT, payload),
    }
}

/// Encode a binary WebSocket frame.
pub fn encode_binary(payload: &[u8]) -> Bytes {
    encode_websocket(OPCODE_BINARY, payload)
}

/// Encode the pong answering a ping with `payload`.
pub fn encode_pong(payload: &[u8]) -> Bytes {
    encode_websocket(OPCODE_PONG, payload)
}

/// Encode a single unmasked, final server-to-client WebSocket frame.
pub fn encode_websocket(opcode: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 10);
    buf.put_u8(0x80 | (opcode & 0x0F));
    let len = payload.len();
    if len < 126 {
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(len as u64);
    }
    buf.put_slice(payload);
    buf.freeze()
}
