//! Client input messages.
//!
//! Wire text: `<tag><serial>,<time>,<fields...>`, ASCII decimal, comma
//! separated. [`decode`] turns one frame payload into a [`RawMessage`] and
//! [`TimeNormalizer`] moves its timestamp onto the server clock. State
//! updates and routing live in [`crate::state`].

use crate::cursor::{DecodeError, FieldCursor};

/// Offset placed between the last server-observed time and the first
/// explicit timestamp of a new connection, in milliseconds.
pub const RECONNECT_TIME_GAP: u32 = 5000;

/// Pointer fields shared by every pointer-family message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerInfo {
    pub mouse_window_id: u32,
    pub event_window_id: u32,
    pub root_x: i32,
    pub root_y: i32,
    pub win_x: i32,
    pub win_y: i32,
    pub state: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Enter { pointer: PointerInfo, mode: i32 },
    Leave { pointer: PointerInfo, mode: i32 },
    PointerMove { pointer: PointerInfo },
    ButtonPress { pointer: PointerInfo, button: u32 },
    ButtonRelease { pointer: PointerInfo, button: u32 },
    Scroll { pointer: PointerInfo, direction: i32 },
    KeyPress { mouse_window_id: u32, key: u32, state: u32 },
    KeyRelease { mouse_window_id: u32, key: u32, state: u32 },
    GrabReply { result: i32 },
    UngrabReply { result: i32 },
    ConfigureNotify { id: u32, x: i32, y: i32, width: i32, height: i32 },
    DeleteNotify { id: u32 },
    ScreenSizeChanged { width: i32, height: i32 },
}

impl MessageKind {
    /// Single-character wire tag.
    pub fn tag(&self) -> char {
        match self {
            MessageKind::Enter { .. } => 'e',
            MessageKind::Leave { .. } => 'l',
            MessageKind::PointerMove { .. } => 'm',
            MessageKind::ButtonPress { .. } => 'b',
            MessageKind::ButtonRelease { .. } => 'B',
            MessageKind::Scroll { .. } => 's',
            MessageKind::KeyPress { .. } => 'k',
            MessageKind::KeyRelease { .. } => 'K',
            MessageKind::GrabReply { .. } => 'g',
            MessageKind::UngrabReply { .. } => 'u',
            MessageKind::ConfigureNotify { .. } => 'w',
            MessageKind::DeleteNotify { .. } => 'W',
            MessageKind::ScreenSizeChanged { .. } => 'd',
        }
    }

    /// Pointer fields, for the pointer-family kinds.
    pub fn pointer(&self) -> Option<&PointerInfo> {
        match self {
            MessageKind::Enter { pointer, .. }
            | MessageKind::Leave { pointer, .. }
            | MessageKind::PointerMove { pointer }
            | MessageKind::ButtonPress { pointer, .. }
            | MessageKind::ButtonRelease { pointer, .. }
            | MessageKind::Scroll { pointer, .. } => Some(pointer),
            MessageKind::KeyPress { .. }
            | MessageKind::KeyRelease { .. }
            | MessageKind::GrabReply { .. }
            | MessageKind::UngrabReply { .. }
            | MessageKind::ConfigureNotify { .. }
            | MessageKind::DeleteNotify { .. }
            | MessageKind::ScreenSizeChanged { .. } => None,
        }
    }

    pub fn is_pointer_event(&self) -> bool {
        self.pointer().is_some()
    }
}

/// A decoded, time-normalized input message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMessage {
    pub serial: u32,
    pub time: u32,
    pub kind: MessageKind,
}

/// Result of the textual decode step, before time normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub serial: u32,
    /// Client-reported time; 0 means "not supplied".
    pub time: u32,
    pub kind: MessageKind,
}

/// Decode one frame payload.
pub fn decode(payload: &str) -> Result<RawMessage, DecodeError> {
    let mut chars = payload.chars();
    let tag = chars.next().ok_or(DecodeError::Empty)?;
    let mut cursor = FieldCursor::new(chars.as_str());

    let serial = cursor.next("serial")?;
    // Browsers report times beyond 32 bits; the protocol clock wraps.
    let time = cursor.next::<u64>("time")? as u32;

    let kind = match tag {
        'e' => MessageKind::Enter {
            pointer: pointer_fields(&mut cursor)?,
            mode: cursor.next("mode")?,
        },
        'l' => MessageKind::Leave {
            pointer: pointer_fields(&mut cursor)?,
            mode: cursor.next("mode")?,
        },
        'm' => MessageKind::PointerMove {
            pointer: pointer_fields(&mut cursor)?,
        },
        'b' => MessageKind::ButtonPress {
            pointer: pointer_fields(&mut cursor)?,
            button: cursor.next("button")?,
        },
        'B' => MessageKind::ButtonRelease {
            pointer: pointer_fields(&mut cursor)?,
            button: cursor.next("button")?,
        },
        's' => MessageKind::Scroll {
            pointer: pointer_fields(&mut cursor)?,
            direction: cursor.next("direction")?,
        },
        'k' => MessageKind::KeyPress {
            mouse_window_id: cursor.next("mouse_window_id")?,
            key: cursor.next("key")?,
            state: cursor.next("state")?,
        },
        'K' => MessageKind::KeyRelease {
            mouse_window_id: cursor.next("mouse_window_id")?,
            key: cursor.next("key")?,
            state: cursor.next("state")?,
        },
        'g' => MessageKind::GrabReply {
            result: cursor.next("result")?,
        },
        'u' => MessageKind::UngrabReply {
            result: cursor.next("result")?,
        },
        'w' => MessageKind::ConfigureNotify {
            id: cursor.next("id")?,
            x: cursor.next("x")?,
            y: cursor.next("y")?,
            width: cursor.next("width")?,
            height: cursor.next("height")?,
        },
        'W' => MessageKind::DeleteNotify {
            id: cursor.next("id")?,
        },
        'd' => MessageKind::ScreenSizeChanged {
            width: cursor.next("width")?,
            height: cursor.next("height")?,
        },
        other => return Err(DecodeError::UnknownTag(other)),
    };

    Ok(RawMessage { serial, time, kind })
}

fn pointer_fields(cursor: &mut FieldCursor<'_>) -> Result<PointerInfo, DecodeError> {
    Ok(PointerInfo {
        mouse_window_id: cursor.next("mouse_window_id")?,
        event_window_id: cursor.next("event_window_id")?,
        root_x: cursor.next("root_x")?,
        root_y: cursor.next("root_y")?,
        win_x: cursor.next("win_x")?,
        win_y: cursor.next("win_y")?,
        state: cursor.next("state")?,
    })
}

/// Maps one connection's self-reported clock onto the server timeline.
///
/// The first nonzero timestamp on a connection lands exactly
/// [`RECONNECT_TIME_GAP`] after the server's last seen time; later ones keep
/// their offset from it, but never fall behind the last seen time.
/// Arithmetic wraps like the 32-bit protocol clock.
#[derive(Debug, Clone, Default)]
pub struct TimeNormalizer {
    time_base: Option<u32>,
}

impl TimeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen_time(&self) -> bool {
        self.time_base.is_some()
    }

    /// Normalize `explicit` and advance `last_seen_time` to the result.
    pub fn normalize(&mut self, explicit: u32, last_seen_time: &mut u32) -> u32 {
        let time = if explicit == 0 {
            *last_seen_time
        } else {
            let base = *self.time_base.get_or_insert_with(|| {
                explicit.wrapping_sub(last_seen_time.wrapping_add(RECONNECT_TIME_GAP))
            });
            explicit.wrapping_sub(base)
        };
        // Out-of-order client stamps never move the timeline backwards.
        let time = if (time.wrapping_sub(*last_seen_time) as i32) < 0 {
            *last_seen_time
        } else {
            time
        };
        *last_seen_time = time;
        time
    }
}
