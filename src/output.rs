//! Server-to-client command stream.
//!
//! Wire format per command: `[opcode: u8][serial: u32 BE][fields]`. Ids and
//! sizes are `u32`, coordinates `i32`, all big-endian. Pixel payloads are
//! `[width: u32][height: u32][len: u32][RGBA bytes]`.
//!
//! Commands are buffered and sent as one frame per [`Output::flush`]: a binary
//! WebSocket frame for `/socket-bin` clients, otherwise a text frame carrying
//! the base64 of the buffer.

use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::framing::{self, Variant};

/// A rectangle in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// An RGBA image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// `width * height * 4` bytes, R G B A per pixel.
    pub rgba: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCommand {
    NewSurface { id: u32, x: i32, y: i32, width: u32, height: u32, is_temp: bool },
    DestroySurface { id: u32 },
    ShowSurface { id: u32 },
    HideSurface { id: u32 },
    /// `parent == 0` clears the relationship.
    SetTransientFor { id: u32, parent: u32 },
    MoveResize {
        id: u32,
        position: Option<(i32, i32)>,
        size: Option<(u32, u32)>,
    },
    /// Opaque full image.
    PutRgb { id: u32, x: i32, y: i32, image: Image },
    /// Image composited over the current contents; zero alpha keeps the old pixel.
    PutRgba { id: u32, x: i32, y: i32, image: Image },
    CopyRectangles { id: u32, rects: Vec<Rect>, dx: i32, dy: i32 },
    GrabPointer { id: u32, owner_events: bool },
    UngrabPointer,
    SurfaceFlush { id: u32 },
    RequestAuth,
    AuthOk,
    Disconnected,
}

mod op {
    pub const NEW_SURFACE: u8 = b's';
    pub const DESTROY_SURFACE: u8 = b'd';
    pub const SHOW_SURFACE: u8 = b'S';
    pub const HIDE_SURFACE: u8 = b'H';
    pub const SET_TRANSIENT_FOR: u8 = b'b';
    pub const MOVE_RESIZE: u8 = b'm';
    pub const PUT_RGB: u8 = b'i';
    pub const PUT_RGBA: u8 = b'I';
    pub const COPY_RECTANGLES: u8 = b'C';
    pub const GRAB_POINTER: u8 = b'g';
    pub const UNGRAB_POINTER: u8 = b'u';
    pub const SURFACE_FLUSH: u8 = b'f';
    pub const REQUEST_AUTH: u8 = b'l';
    pub const AUTH_OK: u8 = b'L';
    pub const DISCONNECTED: u8 = b'D';
}

impl OutputCommand {
    pub fn encode(&self, serial: u32, buf: &mut BytesMut) {
        match self {
            OutputCommand::NewSurface { id, x, y, width, height, is_temp } => {
                header(buf, op::NEW_SURFACE, serial);
                buf.put_u32(*id);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_u32(*width);
                buf.put_u32(*height);
                buf.put_u8(*is_temp as u8);
            }
            OutputCommand::DestroySurface { id } => {
                header(buf, op::DESTROY_SURFACE, serial);
                buf.put_u32(*id);
            }
            OutputCommand::ShowSurface { id } => {
                header(buf, op::SHOW_SURFACE, serial);
                buf.put_u32(*id);
            }
            OutputCommand::HideSurface { id } => {
                header(buf, op::HIDE_SURFACE, serial);
                buf.put_u32(*id);
            }
            OutputCommand::SetTransientFor { id, parent } => {
                header(buf, op::SET_TRANSIENT_FOR, serial);
                buf.put_u32(*id);
                buf.put_u32(*parent);
            }
            OutputCommand::MoveResize { id, position, size } => {
                header(buf, op::MOVE_RESIZE, serial);
                buf.put_u32(*id);
                let flags = position.is_some() as u8 | (size.is_some() as u8) << 1;
                buf.put_u8(flags);
                if let Some((x, y)) = position {
                    buf.put_i32(*x);
                    buf.put_i32(*y);
                }
                if let Some((w, h)) = size {
                    buf.put_u32(*w);
                    buf.put_u32(*h);
                }
            }
            OutputCommand::PutRgb { id, x, y, image } => {
                header(buf, op::PUT_RGB, serial);
                put_image(buf, *id, *x, *y, image);
            }
            OutputCommand::PutRgba { id, x, y, image } => {
                header(buf, op::PUT_RGBA, serial);
                put_image(buf, *id, *x, *y, image);
            }
            OutputCommand::CopyRectangles { id, rects, dx, dy } => {
                header(buf, op::COPY_RECTANGLES, serial);
                buf.put_u32(*id);
                buf.put_u32(rects.len() as u32);
                for r in rects {
                    buf.put_i32(r.x);
                    buf.put_i32(r.y);
                    buf.put_i32(r.width);
                    buf.put_i32(r.height);
                }
                buf.put_i32(*dx);
                buf.put_i32(*dy);
            }
            OutputCommand::GrabPointer { id, owner_events } => {
                header(buf, op::GRAB_POINTER, serial);
                buf.put_u32(*id);
                buf.put_u8(*owner_events as u8);
            }
            OutputCommand::UngrabPointer => header(buf, op::UNGRAB_POINTER, serial),
            OutputCommand::SurfaceFlush { id } => {
                header(buf, op::SURFACE_FLUSH, serial);
                buf.put_u32(*id);
            }
            OutputCommand::RequestAuth => header(buf, op::REQUEST_AUTH, serial),
            OutputCommand::AuthOk => header(buf, op::AUTH_OK, serial),
            OutputCommand::Disconnected => header(buf, op::DISCONNECTED, serial),
        }
    }

    /// Decode one command from the front of `buf`, returning its serial.
    ///
    /// Returns `None` on truncated or unknown input.
    pub fn decode(buf: &mut &[u8]) -> Option<(u32, OutputCommand)> {
        let opcode = take_u8(buf)?;
        let serial = take_u32(buf)?;
        let cmd = match opcode {
            op::NEW_SURFACE => OutputCommand::NewSurface {
                id: take_u32(buf)?,
                x: take_i32(buf)?,
                y: take_i32(buf)?,
                width: take_u32(buf)?,
                height: take_u32(buf)?,
                is_temp: take_u8(buf)? != 0,
            },
            op::DESTROY_SURFACE => OutputCommand::DestroySurface { id: take_u32(buf)? },
            op::SHOW_SURFACE => OutputCommand::ShowSurface { id: take_u32(buf)? },
            op::HIDE_SURFACE => OutputCommand::HideSurface { id: take_u32(buf)? },
            op::SET_TRANSIENT_FOR => OutputCommand::SetTransientFor {
                id: take_u32(buf)?,
                parent: take_u32(buf)?,
            },
            op::MOVE_RESIZE => {
                let id = take_u32(buf)?;
                let flags = take_u8(buf)?;
                let position = if flags & 1 != 0 {
                    Some((take_i32(buf)?, take_i32(buf)?))
                } else {
                    None
                };
                let size = if flags & 2 != 0 {
                    Some((take_u32(buf)?, take_u32(buf)?))
                } else {
                    None
                };
                OutputCommand::MoveResize { id, position, size }
            }
            op::PUT_RGB => {
                let (id, x, y, image) = take_image(buf)?;
                OutputCommand::PutRgb { id, x, y, image }
            }
            op::PUT_RGBA => {
                let (id, x, y, image) = take_image(buf)?;
                OutputCommand::PutRgba { id, x, y, image }
            }
            op::COPY_RECTANGLES => {
                let id = take_u32(buf)?;
                let count = take_u32(buf)?;
                let mut rects = Vec::new();
                for _ in 0..count {
                    rects.push(Rect {
                        x: take_i32(buf)?,
                        y: take_i32(buf)?,
                        width: take_i32(buf)?,
                        height: take_i32(buf)?,
                    });
                }
                OutputCommand::CopyRectangles {
                    id,
                    rects,
                    dx: take_i32(buf)?,
                    dy: take_i32(buf)?,
                }
            }
            op::GRAB_POINTER => OutputCommand::GrabPointer {
                id: take_u32(buf)?,
                owner_events: take_u8(buf)? != 0,
            },
            op::UNGRAB_POINTER => OutputCommand::UngrabPointer,
            op::SURFACE_FLUSH => OutputCommand::SurfaceFlush { id: take_u32(buf)? },
            op::REQUEST_AUTH => OutputCommand::RequestAuth,
            op::AUTH_OK => OutputCommand::AuthOk,
            op::DISCONNECTED => OutputCommand::Disconnected,
            _ => return None,
        };
        Some((serial, cmd))
    }
}

fn header(buf: &mut BytesMut, opcode: u8, serial: u32) {
    buf.put_u8(opcode);
    buf.put_u32(serial);
}

fn put_image(buf: &mut BytesMut, id: u32, x: i32, y: i32, image: &Image) {
    buf.put_u32(id);
    buf.put_i32(x);
    buf.put_i32(y);
    buf.put_u32(image.width);
    buf.put_u32(image.height);
    buf.put_u32(image.rgba.len() as u32);
    buf.put_slice(&image.rgba);
}

fn take_u8(buf: &mut &[u8]) -> Option<u8> {
    (buf.remaining() >= 1).then(|| buf.get_u8())
}

fn take_u32(buf: &mut &[u8]) -> Option<u32> {
    (buf.remaining() >= 4).then(|| buf.get_u32())
}

fn take_i32(buf: &mut &[u8]) -> Option<i32> {
    (buf.remaining() >= 4).then(|| buf.get_i32())
}

fn take_image(buf: &mut &[u8]) -> Option<(u32, i32, i32, Image)> {
    let id = take_u32(buf)?;
    let x = take_i32(buf)?;
    let y = take_i32(buf)?;
    let width = take_u32(buf)?;
    let height = take_u32(buf)?;
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return None;
    }
    let rgba = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Some((id, x, y, Image { width, height, rgba }))
}

/// Decode every command in one flushed payload.
pub fn decode_all(mut payload: &[u8]) -> Vec<(u32, OutputCommand)> {
    let mut out = Vec::new();
    while !payload.is_empty() {
        match OutputCommand::decode(&mut payload) {
            Some(cmd) => out.push(cmd),
            None => break,
        }
    }
    out
}

/// Buffered command writer bound to one client connection.
#[derive(Debug)]
pub struct Output {
    writer: mpsc::UnboundedSender<Bytes>,
    variant: Variant,
    binary: bool,
    serial: u32,
    buf: BytesMut,
}

impl Output {
    /// `serial` is the serial the first command will carry.
    pub fn new(
        writer: mpsc::UnboundedSender<Bytes>,
        variant: Variant,
        binary: bool,
        serial: u32,
    ) -> Self {
        Self {
            writer,
            variant,
            // Legacy framing cannot carry binary frames.
            binary: binary && variant == Variant::WebSocket,
            serial,
            buf: BytesMut::new(),
        }
    }

    /// Serial the next command will carry.
    pub fn next_serial(&self) -> u32 {
        self.serial
    }

    /// Queue a command, stamping it with the next serial.
    pub fn send(&mut self, cmd: OutputCommand) -> u32 {
        let serial = self.serial;
        cmd.encode(serial, &mut self.buf);
        self.serial = self.serial.wrapping_add(1);
        serial
    }

    /// Send all queued commands as one frame.
    ///
    /// Returns `false` if the connection's writer has gone away.
    pub fn flush(&mut self) -> bool {
        if self.buf.is_empty() {
            return !self.writer.is_closed();
        }
        let payload = self.buf.split().freeze();
        let frame = if self.binary {
            framing::encode_binary(&payload)
        } else {
            let text = base64::engine::general_purpose::STANDARD.encode(&payload);
            framing::encode_text(self.variant, text.as_bytes())
        };
        tracing::trace!(bytes = frame.len(), serial = self.serial, "flushing output");
        self.writer.send(frame).is_ok()
    }

    /// Whether the connection behind this output is gone.
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

/// Decode the commands carried by frames an [`Output`] produced in text mode.
///
/// Used by clients written in Rust and by tests.
pub fn decode_text_frames(variant: Variant, frames: &[Bytes]) -> Vec<(u32, OutputCommand)> {
    let mut parser = framing::FrameParser::new(variant);
    for frame in frames {
        parser.feed(frame);
    }
    let mut out = Vec::new();
    while let Ok(Some(frame)) = parser.next_frame() {
        if let framing::Frame::Text(text) = frame {
            if let Ok(payload) = base64::engine::general_purpose::STANDARD.decode(text) {
                out.extend(decode_all(&payload));
            }
        }
    }
    out
}
