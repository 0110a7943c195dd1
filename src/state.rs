//! Authoritative display state and the client session it is mirrored to.
//!
//! [`Server`] is a plain state machine: connection tasks hand it bytes, the
//! toolkit layer calls window operations on it, and it answers with commands
//! queued on the active client's [`Output`] and [`DisplayEvent`]s sent to the
//! toolkit. It does no I/O of its own and is owned by exactly one task.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::auth;
use crate::framing::{self, Frame, FrameParser, Variant};
use crate::message::{self, InputMessage, MessageKind, TimeNormalizer};
use crate::output::{Output, OutputCommand, Rect};
use crate::surface::{Surface, SurfaceHandle};

pub type ConnectionId = u64;

/// The implicit window covering the whole screen.
pub const ROOT_WINDOW: u32 = 0;

const DEFAULT_SCREEN_SIZE: (i32, i32) = (1024, 768);
const DEFAULT_POSITION: (i32, i32) = (100, 100);

/// An active pointer grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerGrab {
    pub window_id: u32,
    pub client_id: u32,
    pub owner_events: bool,
    pub event_mask: u32,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStatus {
    Success,
    AlreadyGrabbed,
}

/// Pointer position, modifier state and the toplevel under the pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerState {
    pub root_x: i32,
    pub root_y: i32,
    pub state: u32,
    pub toplevel: Option<u32>,
}

/// An input message delivered to the toolkit layer.
///
/// `client_id` is set when the event is routed to a specific client because
/// of a pointer grab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEvent {
    pub client_id: Option<u32>,
    pub message: InputMessage,
}

/// The transport side of an upgraded connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub variant: Variant,
    pub binary: bool,
    pub writer: mpsc::UnboundedSender<Bytes>,
    /// Cancelled when the server drops the connection.
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct Window {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub is_temp: bool,
    pub visible: bool,
    pub transient_for: Option<u32>,
    last_synced: bool,
    last_surface: Option<Surface>,
    cached_surface: Option<(String, SurfaceHandle)>,
}

impl Window {
    fn new(id: u32, x: i32, y: i32, width: i32, height: i32, is_temp: bool) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            is_temp,
            visible: false,
            transient_for: None,
            last_synced: false,
            last_surface: None,
            cached_surface: None,
        }
    }

    /// Whether the current client holds a baseline raster for this window.
    pub fn is_synced(&self) -> bool {
        self.last_synced
    }

    pub fn last_surface(&self) -> Option<&Surface> {
        self.last_surface.as_ref()
    }
}

struct Input {
    conn: Connection,
    parser: FrameParser,
    clock: TimeNormalizer,
    active: bool,
}

struct Waiter {
    tag: char,
    serial: u32,
    remove: bool,
    reply: oneshot::Sender<Option<InputMessage>>,
}

impl Waiter {
    fn matches(&self, msg: &InputMessage) -> bool {
        msg.kind.tag() == self.tag && msg.serial >= self.serial
    }
}

pub struct Server {
    password: Option<String>,
    id_counter: u32,
    saved_serial: u32,
    last_seen_time: u32,
    windows: HashMap<u32, Window>,
    toplevels: Vec<u32>,
    grab: Option<PointerGrab>,
    last_pointer: PointerState,
    future_pointer: PointerState,
    inputs: HashMap<ConnectionId, Input>,
    active_input: Option<ConnectionId>,
    output: Option<Output>,
    pending: VecDeque<InputMessage>,
    pending_dispatch: bool,
    waiters: Vec<Waiter>,
    events: mpsc::UnboundedSender<DisplayEvent>,
}

impl Server {
    /// `password` is the stored hash line; `None` disables authentication.
    pub fn new(password: Option<String>, events: mpsc::UnboundedSender<DisplayEvent>) -> Self {
        let mut server = Self {
            password,
            id_counter: 0,
            saved_serial: 1,
            last_seen_time: 0,
            windows: HashMap::new(),
            toplevels: Vec::new(),
            grab: None,
            last_pointer: PointerState::default(),
            future_pointer: PointerState::default(),
            inputs: HashMap::new(),
            active_input: None,
            output: None,
            pending: VecDeque::new(),
            pending_dispatch: false,
            waiters: Vec::new(),
            events,
        };

        let root = server.allocate_id();
        let (width, height) = DEFAULT_SCREEN_SIZE;
        let mut window = Window::new(root, 0, 0, width, height, false);
        window.visible = true;
        server.windows.insert(root, window);
        server
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.id_counter;
        self.id_counter = self.id_counter.wrapping_add(1);
        id
    }

    pub fn window(&self, id: u32) -> Option<&Window> {
        self.windows.get(&id)
    }

    /// Non-root windows in creation order.
    pub fn toplevels(&self) -> &[u32] {
        &self.toplevels
    }

    pub fn saved_serial(&self) -> u32 {
        self.saved_serial
    }

    pub fn last_seen_time(&self) -> u32 {
        self.last_seen_time
    }

    pub fn pointer_grab(&self) -> Option<PointerGrab> {
        self.grab
    }

    pub fn is_connected(&self) -> bool {
        self.output.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn has_pending_dispatch(&self) -> bool {
        self.pending_dispatch
    }

    /// Serial the next output command will carry.
    pub fn next_serial(&self) -> u32 {
        match &self.output {
            Some(out) => out.next_serial(),
            None => self.saved_serial,
        }
    }

    // Session

    /// Take over an upgraded connection. `initial` holds bytes that arrived
    /// together with the handshake.
    pub fn attach(&mut self, id: ConnectionId, conn: Connection, initial: &[u8]) -> bool {
        let parser = FrameParser::with_initial(conn.variant, initial);
        self.inputs.insert(
            id,
            Input {
                conn,
                parser,
                clock: TimeNormalizer::new(),
                active: false,
            },
        );

        if self.password.is_some() {
            self.request_auth(id);
        } else {
            self.start(id);
        }

        self.parse_input(id)
    }

    /// Feed bytes read from a connection. Returns `false` once the connection
    /// has been dropped.
    pub fn on_data(&mut self, id: ConnectionId, data: &[u8]) -> bool {
        let Some(input) = self.inputs.get_mut(&id) else {
            return false;
        };
        input.parser.feed(data);
        self.parse_input(id)
    }

    /// Drop a connection. Window state is kept for the next client.
    pub fn disconnect(&mut self, id: ConnectionId) {
        let Some(input) = self.inputs.remove(&id) else {
            return;
        };
        input.conn.cancel.cancel();

        if self.active_input == Some(id) {
            self.active_input = None;
            if let Some(out) = self.output.take() {
                self.saved_serial = out.next_serial();
            }
            for waiter in self.waiters.drain(..) {
                let _ = waiter.reply.send(None);
            }
            tracing::info!(conn = id, serial = self.saved_serial, "client disconnected");
        } else {
            tracing::debug!(conn = id, "connection closed");
        }
    }

    fn parse_input(&mut self, id: ConnectionId) -> bool {
        loop {
            let Some(input) = self.inputs.get_mut(&id) else {
                return false;
            };
            let frame = match input.parser.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return true,
                Err(e) => {
                    tracing::warn!(conn = id, %e, "protocol violation, closing connection");
                    self.disconnect(id);
                    return false;
                }
            };

            match frame {
                Frame::Text(text) => self.handle_payload(id, &text),
                Frame::Fragment(data) => {
                    tracing::warn!(conn = id, len = data.len(), "dropping fragmented text frame");
                }
                Frame::Ping(payload) => self.send_raw(id, framing::encode_pong(&payload)),
                Frame::Pong | Frame::Close => {}
                Frame::Unsupported { opcode } => {
                    tracing::warn!(conn = id, opcode, "dropping frame with unsupported opcode");
                }
            }
        }
    }

    fn send_raw(&self, id: ConnectionId, data: Bytes) {
        if let Some(input) = self.inputs.get(&id) {
            let _ = input.conn.writer.send(data);
        }
    }

    fn handle_payload(&mut self, id: ConnectionId, text: &str) {
        let Some(input) = self.inputs.get_mut(&id) else {
            return;
        };

        if !input.active {
            let accepted = match (&self.password, text.strip_prefix('l')) {
                (Some(stored), Some(candidate)) => auth::verify(stored, candidate),
                _ => false,
            };
            if accepted {
                tracing::info!(conn = id, "client authenticated");
                self.start(id);
            } else {
                tracing::info!(conn = id, "authentication failed");
                self.request_auth(id);
            }
            return;
        }

        let raw = match message::decode(text) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(conn = id, %e, "dropping input message");
                return;
            }
        };
        let time = input.clock.normalize(raw.time, &mut self.last_seen_time);
        let msg = InputMessage {
            serial: raw.serial,
            time,
            kind: raw.kind,
        };
        tracing::trace!(conn = id, ?msg, "input");

        if let Some(p) = msg.kind.pointer() {
            self.future_pointer = PointerState {
                root_x: p.root_x,
                root_y: p.root_y,
                state: p.state,
                toplevel: nonzero(p.mouse_window_id),
            };
        }
        self.enqueue(msg);
    }

    fn enqueue(&mut self, msg: InputMessage) {
        let mut consumed = false;
        for waiter in std::mem::take(&mut self.waiters) {
            if waiter.matches(&msg) {
                consumed |= waiter.remove;
                let _ = waiter.reply.send(Some(msg.clone()));
            } else if !waiter.reply.is_closed() {
                self.waiters.push(waiter);
            }
        }
        if !consumed {
            self.pending.push_back(msg);
            self.pending_dispatch = true;
        }
    }

    fn request_auth(&mut self, id: ConnectionId) {
        let Some(input) = self.inputs.get(&id) else {
            return;
        };
        let conn = &input.conn;
        let mut out = Output::new(conn.writer.clone(), conn.variant, conn.binary, 0);
        out.send(OutputCommand::RequestAuth);
        out.flush();
    }

    fn start(&mut self, id: ConnectionId) {
        let Some(input) = self.inputs.get_mut(&id) else {
            return;
        };
        input.active = true;
        let conn = input.conn.clone();

        if let Some(mut old) = self.output.take() {
            old.send(OutputCommand::Disconnected);
            old.flush();
            self.saved_serial = old.next_serial();
        }
        if let Some(previous) = self.active_input.replace(id) {
            if previous != id {
                self.disconnect(previous);
            }
        }

        let mut out = Output::new(conn.writer, conn.variant, conn.binary, self.saved_serial);
        out.send(OutputCommand::AuthOk);
        out.flush();
        self.output = Some(out);
        tracing::info!(conn = id, serial = self.saved_serial, "client attached");

        self.resync();

        if let (Some(grab), Some(out)) = (self.grab, self.output.as_mut()) {
            out.send(OutputCommand::GrabPointer {
                id: grab.window_id,
                owner_events: grab.owner_events,
            });
        }
        self.flush();

        self.dispatch_pending();
    }

    /// Replay every toplevel to the current client. All surfaces are created
    /// before any of them is shown or parented.
    fn resync(&mut self) {
        let Some(out) = self.output.as_mut() else {
            return;
        };

        for id in &self.toplevels {
            let Some(window) = self.windows.get_mut(id) else {
                continue;
            };
            window.last_synced = false;
            out.send(OutputCommand::NewSurface {
                id: window.id,
                x: window.x,
                y: window.y,
                width: dimension(window.width),
                height: dimension(window.height),
                is_temp: window.is_temp,
            });
        }

        for id in &self.toplevels {
            let Some(window) = self.windows.get_mut(id) else {
                continue;
            };
            if let Some(parent) = window.transient_for {
                out.send(OutputCommand::SetTransientFor { id: window.id, parent });
            }
            if window.visible {
                out.send(OutputCommand::ShowSurface { id: window.id });
                if let Some(surface) = &window.last_surface {
                    window.last_synced = true;
                    out.send(OutputCommand::PutRgb {
                        id: window.id,
                        x: 0,
                        y: 0,
                        image: surface.to_rgb_image(),
                    });
                    out.send(OutputCommand::SurfaceFlush { id: window.id });
                }
            }
        }

        tracing::debug!(windows = self.toplevels.len(), "resynced client");
    }

    /// Send queued output. Drops the client if its connection is gone.
    pub fn flush(&mut self) {
        if let Some(out) = self.output.as_mut() {
            if !out.flush() {
                self.saved_serial = out.next_serial();
                self.output = None;
                tracing::info!("client output closed");
            }
        }
    }

    /// Deliver every queued input message in arrival order.
    pub fn dispatch_pending(&mut self) {
        self.pending_dispatch = false;
        while let Some(mut msg) = self.pending.pop_front() {
            // Sent before the client saw any of our serials.
            if msg.serial == 0 {
                msg.serial = self.saved_serial.wrapping_sub(1);
            }
            self.dispatch(msg);
        }
    }

    fn dispatch(&mut self, msg: InputMessage) {
        self.apply_to_state(&msg.kind);
        let client_id = route(&msg.kind, self.grab.as_ref());
        let _ = self.events.send(DisplayEvent {
            client_id,
            message: msg,
        });
    }

    fn apply_to_state(&mut self, kind: &MessageKind) {
        match kind {
            MessageKind::Enter { pointer, .. } => {
                self.last_pointer = PointerState {
                    root_x: pointer.root_x,
                    root_y: pointer.root_y,
                    state: pointer.state,
                    toplevel: nonzero(pointer.event_window_id),
                };
            }
            MessageKind::Leave { pointer, .. } => {
                self.last_pointer = PointerState {
                    root_x: pointer.root_x,
                    root_y: pointer.root_y,
                    state: pointer.state,
                    toplevel: None,
                };
            }
            MessageKind::PointerMove { pointer }
            | MessageKind::ButtonPress { pointer, .. }
            | MessageKind::ButtonRelease { pointer, .. }
            | MessageKind::Scroll { pointer, .. } => {
                self.last_pointer.root_x = pointer.root_x;
                self.last_pointer.root_y = pointer.root_y;
                self.last_pointer.state = pointer.state;
            }
            MessageKind::KeyPress { state, .. } | MessageKind::KeyRelease { state, .. } => {
                self.last_pointer.state = *state;
            }
            MessageKind::GrabReply { .. }
            | MessageKind::UngrabReply { .. }
            | MessageKind::DeleteNotify { .. } => {}
            MessageKind::ConfigureNotify {
                id,
                x,
                y,
                width,
                height,
            } => {
                if let Some(window) = self.windows.get_mut(id) {
                    window.x = *x;
                    window.y = *y;
                    window.width = *width;
                    window.height = *height;
                }
            }
            MessageKind::ScreenSizeChanged { width, height } => {
                if let Some(root) = self.windows.get_mut(&ROOT_WINDOW) {
                    root.width = *width;
                    root.height = *height;
                }
            }
        }
    }

    fn fake_configure_notify(&mut self, id: u32) {
        let Some(window) = self.windows.get(&id) else {
            return;
        };
        let msg = InputMessage {
            serial: self.saved_serial.wrapping_sub(1),
            time: self.last_seen_time,
            kind: MessageKind::ConfigureNotify {
                id,
                x: window.x,
                y: window.y,
                width: window.width,
                height: window.height,
            },
        };
        self.dispatch(msg);
    }

    /// Register interest in the first message with `tag` and a serial of at
    /// least `serial`. Answers immediately from the queue when possible, and
    /// with `None` if no client is attached or it goes away.
    pub fn block_for_input(
        &mut self,
        tag: char,
        serial: u32,
        remove: bool,
        reply: oneshot::Sender<Option<InputMessage>>,
    ) {
        self.flush();
        let waiter = Waiter {
            tag,
            serial,
            remove,
            reply,
        };

        if let Some(pos) = self.pending.iter().position(|m| waiter.matches(m)) {
            let msg = if remove {
                self.pending.remove(pos)
            } else {
                self.pending.get(pos).cloned()
            };
            let _ = waiter.reply.send(msg);
            return;
        }
        if self.active_input.is_none() {
            let _ = waiter.reply.send(None);
            return;
        }
        self.waiters.push(waiter);
    }

    // Windows

    pub fn new_window(&mut self, x: i32, y: i32, width: i32, height: i32, is_temp: bool) -> u32 {
        let (x, y) = if x == 0 && y == 0 && !is_temp {
            DEFAULT_POSITION
        } else {
            (x, y)
        };
        let id = self.allocate_id();
        self.windows
            .insert(id, Window::new(id, x, y, width, height, is_temp));
        self.toplevels.push(id);

        match self.output.as_mut() {
            Some(out) => {
                out.send(OutputCommand::NewSurface {
                    id,
                    x,
                    y,
                    width: dimension(width),
                    height: dimension(height),
                    is_temp,
                });
            }
            None => self.fake_configure_notify(id),
        }
        id
    }

    pub fn destroy_window(&mut self, id: u32) {
        if id == ROOT_WINDOW || !self.windows.contains_key(&id) {
            return;
        }
        self.forget_pointer_target(id);
        if let Some(out) = self.output.as_mut() {
            out.send(OutputCommand::DestroySurface { id });
        }
        self.windows.remove(&id);
        self.toplevels.retain(|&t| t != id);
        for window in self.windows.values_mut() {
            if window.transient_for == Some(id) {
                window.transient_for = None;
            }
        }
    }

    fn forget_pointer_target(&mut self, id: u32) {
        if self.last_pointer.toplevel == Some(id) {
            self.last_pointer.toplevel = None;
        }
        if self.grab.is_some_and(|g| g.window_id == id) {
            self.grab = None;
        }
    }

    /// Returns whether the change was sent to a client.
    pub fn window_show(&mut self, id: u32) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        window.visible = true;
        match self.output.as_mut() {
            Some(out) => {
                out.send(OutputCommand::ShowSurface { id });
                true
            }
            None => false,
        }
    }

    /// Returns whether the change was sent to a client.
    pub fn window_hide(&mut self, id: u32) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        window.visible = false;
        self.forget_pointer_target(id);
        match self.output.as_mut() {
            Some(out) => {
                out.send(OutputCommand::HideSurface { id });
                true
            }
            None => false,
        }
    }

    /// Resize and optionally move. While a client is attached the position is
    /// confirmed by its configure notify; otherwise one is synthesized.
    pub fn window_move_resize(
        &mut self,
        id: u32,
        with_move: bool,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        let with_resize = width != window.width || height != window.height;
        window.width = width;
        window.height = height;
        if with_resize {
            if let Some(surface) = &window.last_surface {
                window.last_surface = Some(surface.resized(dimension(width), dimension(height)));
            }
        }

        match self.output.as_mut() {
            Some(out) => {
                out.send(OutputCommand::MoveResize {
                    id,
                    position: with_move.then_some((x, y)),
                    size: with_resize.then_some((dimension(width), dimension(height))),
                });
                true
            }
            None => {
                if with_move {
                    window.x = x;
                    window.y = y;
                }
                self.fake_configure_notify(id);
                false
            }
        }
    }

    /// `parent` of 0 clears the relationship.
    pub fn window_set_transient_for(&mut self, id: u32, parent: u32) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        window.transient_for = nonzero(parent);
        match self.output.as_mut() {
            Some(out) => {
                out.send(OutputCommand::SetTransientFor { id, parent });
                true
            }
            None => false,
        }
    }

    /// Scroll part of a window's contents on both ends. Only possible once
    /// the client holds a baseline raster.
    pub fn window_translate(&mut self, id: u32, area: &[Rect], dx: i32, dy: i32) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        let Some(out) = self.output.as_mut() else {
            return false;
        };
        if !window.last_synced {
            return false;
        }
        let Some(surface) = window.last_surface.as_mut() else {
            return false;
        };
        surface.scroll(area, dx, dy);
        out.send(OutputCommand::CopyRectangles {
            id,
            rects: area.to_vec(),
            dx,
            dy,
        });
        true
    }

    /// Send new window contents, as a diff when the client already has a
    /// baseline of the same size.
    pub fn window_update(&mut self, id: u32, surface: &Surface) {
        let Some(window) = self.windows.get_mut(&id) else {
            return;
        };

        if let Some(out) = self.output.as_mut() {
            let diff = match (&window.last_surface, window.last_synced) {
                (Some(previous), true) => surface.diff(previous),
                _ => None,
            };
            match diff {
                Some(image) => {
                    out.send(OutputCommand::PutRgba { id, x: 0, y: 0, image });
                }
                None => {
                    window.last_synced = true;
                    out.send(OutputCommand::PutRgb {
                        id,
                        x: 0,
                        y: 0,
                        image: surface.to_rgb_image(),
                    });
                }
            }
            out.send(OutputCommand::SurfaceFlush { id });
        }

        window.last_surface = Some(surface.to_owned_surface());
    }

    // Pointer

    /// Grab the pointer for `client_id`. A nonzero `time` must be newer than
    /// the current grab's; 0 means "now" and always wins.
    pub fn grab_pointer(
        &mut self,
        client_id: u32,
        id: u32,
        owner_events: bool,
        event_mask: u32,
        time: u32,
    ) -> GrabStatus {
        if let Some(grab) = &self.grab {
            if time != 0 && time <= grab.time {
                return GrabStatus::AlreadyGrabbed;
            }
        }
        let time = if time == 0 { self.last_seen_time } else { time };
        self.grab = Some(PointerGrab {
            window_id: id,
            client_id,
            owner_events,
            event_mask,
            time,
        });

        if let Some(out) = self.output.as_mut() {
            out.send(OutputCommand::GrabPointer { id, owner_events });
            self.flush();
        }
        GrabStatus::Success
    }

    /// Release the grab. Returns the serial of the ungrab command, or `None`
    /// if `time` predates the current grab.
    pub fn ungrab_pointer(&mut self, time: u32) -> Option<u32> {
        if let Some(grab) = &self.grab {
            if time != 0 && time < grab.time {
                return None;
            }
        }

        let serial = match self.output.as_mut() {
            Some(out) => {
                let serial = out.send(OutputCommand::UngrabPointer);
                self.flush();
                serial
            }
            None => self.saved_serial,
        };
        self.grab = None;
        Some(serial)
    }

    /// Pointer state including input parsed but not yet dispatched while a
    /// client is attached, the last dispatched state otherwise.
    pub fn query_pointer(&self) -> PointerState {
        if self.output.is_some() {
            self.future_pointer
        } else {
            self.last_pointer
        }
    }

    pub fn screen_size(&self) -> (i32, i32) {
        self.windows
            .get(&ROOT_WINDOW)
            .map(|root| (root.width, root.height))
            .unwrap_or(DEFAULT_SCREEN_SIZE)
    }

    /// Map a client's shared-memory buffer for window `id`, reusing the
    /// mapping when `name` matches the last one opened.
    pub fn open_surface(
        &mut self,
        id: u32,
        name: &str,
        width: u32,
        height: u32,
    ) -> Option<SurfaceHandle> {
        let window = self.windows.get_mut(&id)?;
        if let Some((cached_name, surface)) = &window.cached_surface {
            if cached_name == name {
                return Some(SurfaceHandle::clone(surface));
            }
        }

        match Surface::open_shared(name, width, height) {
            Ok(surface) => {
                let handle = SurfaceHandle::new(surface);
                window.cached_surface = Some((name.to_string(), handle.clone()));
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(window = id, %e, "failed to open surface");
                None
            }
        }
    }
}

/// Which client a message belongs to: pointer events follow the grab, the
/// rest are unrouted.
pub fn route(kind: &MessageKind, grab: Option<&PointerGrab>) -> Option<u32> {
    match grab {
        Some(grab) if kind.is_pointer_event() => Some(grab.client_id),
        _ => None,
    }
}

fn nonzero(id: u32) -> Option<u32> {
    (id != 0).then_some(id)
}

fn dimension(v: i32) -> u32 {
    v.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PointerInfo;
    use crate::output::decode_text_frames;

    struct Harness {
        server: Server,
        events: mpsc::UnboundedReceiver<DisplayEvent>,
    }

    struct Client {
        id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Bytes>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(password: Option<String>) -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            Self {
                server: Server::new(password, tx),
                events,
            }
        }

        fn connect(&mut self, id: ConnectionId) -> Client {
            let (writer, rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let conn = Connection {
                variant: Variant::Legacy,
                binary: false,
                writer,
                cancel: cancel.clone(),
            };
            assert!(self.server.attach(id, conn, &[]));
            Client { id, rx, cancel }
        }

        fn send(&mut self, client: &Client, text: &str) -> bool {
            let frame = framing::encode_text(Variant::Legacy, text.as_bytes());
            self.server.on_data(client.id, &frame)
        }

        fn events(&mut self) -> Vec<DisplayEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }
    }

    impl Client {
        fn commands(&mut self) -> Vec<(u32, OutputCommand)> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                frames.push(frame);
            }
            decode_text_frames(Variant::Legacy, &frames)
        }
    }

    fn cmds_only(cmds: Vec<(u32, OutputCommand)>) -> Vec<OutputCommand> {
        cmds.into_iter().map(|(_, c)| c).collect()
    }

    #[test]
    fn root_window_exists() {
        let h = Harness::new(None);
        let root = h.server.window(ROOT_WINDOW).unwrap();
        assert!(root.visible);
        assert_eq!(h.server.screen_size(), (1024, 768));
        assert!(h.server.toplevels().is_empty());
    }

    #[test]
    fn default_placement_for_origin() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(0, 0, 100, 50, false);
        let w = h.server.window(id).unwrap();
        assert_eq!((w.x, w.y, w.width, w.height), (100, 100, 100, 50));

        let temp = h.server.new_window(0, 0, 10, 10, true);
        let w = h.server.window(temp).unwrap();
        assert_eq!((w.x, w.y), (0, 0));
    }

    #[test]
    fn disconnected_new_window_synthesizes_configure() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(5, 6, 7, 8, false);
        let events = h.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].client_id, None);
        assert_eq!(events[0].message.serial, 0);
        assert_eq!(
            events[0].message.kind,
            MessageKind::ConfigureNotify { id, x: 5, y: 6, width: 7, height: 8 }
        );
    }

    #[test]
    fn window_ids_are_never_reused() {
        let mut h = Harness::new(None);
        let a = h.server.new_window(1, 1, 1, 1, false);
        let b = h.server.new_window(1, 1, 1, 1, false);
        h.server.destroy_window(a);
        let c = h.server.new_window(1, 1, 1, 1, false);
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(h.server.toplevels(), &[b, c]);
        assert!(h.server.window(a).is_none());
        for id in h.server.toplevels() {
            assert!(h.server.window(*id).is_some());
        }
    }

    #[test]
    fn root_cannot_be_destroyed() {
        let mut h = Harness::new(None);
        h.server.destroy_window(ROOT_WINDOW);
        assert!(h.server.window(ROOT_WINDOW).is_some());
    }

    #[test]
    fn missing_window_operations_are_noops() {
        let mut h = Harness::new(None);
        assert!(!h.server.window_show(42));
        assert!(!h.server.window_hide(42));
        assert!(!h.server.window_move_resize(42, true, 0, 0, 1, 1));
        assert!(!h.server.window_set_transient_for(42, 1));
        assert!(!h.server.window_translate(42, &[], 0, 0));
        h.server.window_update(42, &Surface::new(1, 1));
        h.server.destroy_window(42);
        assert!(h.server.open_surface(42, "/x", 1, 1).is_none());
    }

    #[test]
    fn attach_without_password_starts_session() {
        let mut h = Harness::new(None);
        let mut client = h.connect(1);
        assert!(h.server.is_connected());
        let cmds = client.commands();
        assert_eq!(cmds, vec![(1, OutputCommand::AuthOk)]);
    }

    #[test]
    fn show_hide_report_delivery() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(10, 10, 4, 4, false);
        assert!(!h.server.window_show(id));
        assert!(h.server.window(id).unwrap().visible);

        let mut client = h.connect(1);
        client.commands();
        assert!(h.server.window_hide(id));
        h.server.flush();
        assert_eq!(cmds_only(client.commands()), vec![OutputCommand::HideSurface { id }]);
    }

    #[test]
    fn auth_scenario_replays_windows_in_two_passes() {
        let stored = auth::hash_password("secret");
        let mut h = Harness::new(Some(stored));

        let a = h.server.new_window(10, 20, 30, 40, false);
        let b = h.server.new_window(50, 60, 70, 80, true);
        h.server.window_set_transient_for(a, b);
        h.server.window_show(a);
        h.server.window_show(b);
        h.events();

        let mut client = h.connect(7);
        assert!(!h.server.is_connected());
        assert_eq!(cmds_only(client.commands()), vec![OutputCommand::RequestAuth]);

        // Input before auth is answered with another challenge.
        assert!(h.send(&client, "m1,100,0,0,1,1,1,1,0"));
        assert_eq!(cmds_only(client.commands()), vec![OutputCommand::RequestAuth]);
        assert!(h.send(&client, "lwrong"));
        assert_eq!(cmds_only(client.commands()), vec![OutputCommand::RequestAuth]);
        assert!(h.events().is_empty());

        assert!(h.send(&client, "lsecret"));
        assert!(h.server.is_connected());
        let cmds = cmds_only(client.commands());
        assert_eq!(
            cmds,
            vec![
                OutputCommand::AuthOk,
                OutputCommand::NewSurface { id: a, x: 10, y: 20, width: 30, height: 40, is_temp: false },
                OutputCommand::NewSurface { id: b, x: 50, y: 60, width: 70, height: 80, is_temp: true },
                OutputCommand::SetTransientFor { id: a, parent: b },
                OutputCommand::ShowSurface { id: a },
                OutputCommand::ShowSurface { id: b },
            ]
        );
    }

    #[test]
    fn resync_creates_all_surfaces_before_parenting() {
        let mut h = Harness::new(None);
        let ids: Vec<u32> = (0..4).map(|i| h.server.new_window(i, i, 5, 5, false)).collect();
        // Point earlier windows at later ones.
        h.server.window_set_transient_for(ids[0], ids[3]);
        h.server.window_set_transient_for(ids[1], ids[2]);

        let mut client = h.connect(1);
        let mut created = Vec::new();
        for cmd in cmds_only(client.commands()) {
            match cmd {
                OutputCommand::NewSurface { id, .. } => created.push(id),
                OutputCommand::SetTransientFor { id, parent } => {
                    assert!(created.contains(&id));
                    assert!(created.contains(&parent));
                }
                _ => {}
            }
        }
        assert_eq!(created, ids);
    }

    #[test]
    fn destroyed_parent_is_not_replayed() {
        let mut h = Harness::new(None);
        let a = h.server.new_window(1, 1, 5, 5, false);
        let b = h.server.new_window(2, 2, 5, 5, false);
        h.server.window_set_transient_for(b, a);
        h.server.destroy_window(a);
        assert_eq!(h.server.window(b).unwrap().transient_for, None);

        let mut client = h.connect(1);
        assert_eq!(
            cmds_only(client.commands()),
            vec![
                OutputCommand::AuthOk,
                OutputCommand::NewSurface { id: b, x: 2, y: 2, width: 5, height: 5, is_temp: false },
            ]
        );
    }

    #[test]
    fn resync_resends_full_raster() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 1, 1, false);
        h.server.window_show(id);
        h.server.window_update(id, &Surface::from_argb(1, 1, &[0xFF_010203]));

        let mut client = h.connect(1);
        assert!(h.server.window(id).unwrap().is_synced());
        let cmds = cmds_only(client.commands());
        assert!(matches!(
            &cmds[..],
            [
                OutputCommand::AuthOk,
                OutputCommand::NewSurface { .. },
                OutputCommand::ShowSurface { .. },
                OutputCommand::PutRgb { image, .. },
                OutputCommand::SurfaceFlush { .. },
            ] if &image.rgba[..] == [1, 2, 3, 255]
        ));
    }

    #[test]
    fn serials_continue_across_reconnect() {
        let mut h = Harness::new(None);
        let mut first = h.connect(1);
        for _ in 0..3 {
            h.server.new_window(1, 1, 1, 1, false);
        }
        h.server.flush();
        let serials: Vec<u32> = first.commands().into_iter().map(|(s, _)| s).collect();
        assert_eq!(serials, vec![1, 2, 3, 4]);

        let before = h.server.next_serial();
        let mut second = h.connect(2);

        // The old client is told it lost the session and is dropped.
        let old = first.commands();
        assert_eq!(old, vec![(before, OutputCommand::Disconnected)]);
        assert!(first.cancel.is_cancelled());
        assert_eq!(h.server.connection_count(), 1);

        assert_eq!(h.server.saved_serial(), before + 1);
        let cmds = second.commands();
        assert_eq!(cmds[0], (h.server.saved_serial(), OutputCommand::AuthOk));
        assert!(cmds.windows(2).all(|w| w[1].0 == w[0].0 + 1));
    }

    #[test]
    fn disconnect_keeps_windows_and_serial() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        let id = h.server.new_window(3, 3, 3, 3, false);
        let serial = h.server.next_serial();
        h.server.disconnect(client.id);
        assert!(client.cancel.is_cancelled());
        assert!(!h.server.is_connected());
        assert_eq!(h.server.saved_serial(), serial);
        assert!(h.server.window(id).is_some());
    }

    #[test]
    fn protocol_violation_drops_connection() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        assert!(!h.server.on_data(client.id, &[0x42]));
        assert!(client.cancel.is_cancelled());
        assert!(!h.server.is_connected());
    }

    #[test]
    fn first_time_lands_after_gap() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        h.send(&client, "m1,900000,0,0,1,2,3,4,0");
        h.send(&client, "m2,900040,0,0,1,2,3,4,0");
        h.send(&client, "m3,0,0,0,1,2,3,4,0");
        h.server.dispatch_pending();
        let times: Vec<u32> = h.events().iter().map(|e| e.message.time).collect();
        assert_eq!(times, vec![5000, 5040, 5040]);
        assert_eq!(h.server.last_seen_time(), 5040);
    }

    #[test]
    fn reconnect_continues_timeline() {
        let mut h = Harness::new(None);
        let first = h.connect(1);
        h.send(&first, "m1,777,0,0,1,2,3,4,0");
        let second = h.connect(2);
        h.send(&second, "m1,3,0,0,1,2,3,4,0");
        h.server.dispatch_pending();
        let times: Vec<u32> = h.events().iter().map(|e| e.message.time).collect();
        assert_eq!(times, vec![5000, 10000]);
    }

    #[test]
    fn out_of_order_times_stay_monotonic() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        h.send(&client, "m1,1000,0,0,1,2,3,4,0");
        h.send(&client, "m2,500,0,0,1,2,3,4,0");
        h.server.dispatch_pending();
        let times: Vec<u32> = h.events().iter().map(|e| e.message.time).collect();
        assert_eq!(times, vec![5000, 5000]);
        assert_eq!(h.server.last_seen_time(), 5000);
    }

    #[test]
    fn button_message_is_dispatched_in_order() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        h.send(&client, "b5,12345,0,0,10,20,30,40,1,2");
        h.send(&client, "B6,12346,0,0,10,20,30,40,1,2");
        assert!(h.server.has_pending_dispatch());
        assert!(h.events().is_empty());
        h.server.dispatch_pending();
        assert!(!h.server.has_pending_dispatch());

        let events = h.events();
        assert_eq!(events.len(), 2);
        let pointer = PointerInfo {
            mouse_window_id: 0,
            event_window_id: 0,
            root_x: 10,
            root_y: 20,
            win_x: 30,
            win_y: 40,
            state: 1,
        };
        assert_eq!(
            events[0].message,
            InputMessage {
                serial: 5,
                time: 5000,
                kind: MessageKind::ButtonPress { pointer, button: 2 },
            }
        );
        assert_eq!(events[1].message.serial, 6);
        assert!(matches!(events[1].message.kind, MessageKind::ButtonRelease { button: 2, .. }));
    }

    #[test]
    fn zero_serial_uses_saved_serial_at_dispatch() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        h.send(&client, "k0,0,0,65,0");
        h.server.dispatch_pending();
        let events = h.events();
        assert_eq!(events[0].message.serial, h.server.saved_serial() - 1);
    }

    #[test]
    fn unknown_tag_is_dropped_without_closing() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        assert!(h.send(&client, "z1,2,3"));
        assert!(h.send(&client, "k1,0,0,65,0"));
        h.server.dispatch_pending();
        assert_eq!(h.events().len(), 1);
    }

    #[test]
    fn ping_gets_pong() {
        let (tx, _events) = mpsc::unbounded_channel();
        let mut server = Server::new(None, tx);
        let (writer, mut rx) = mpsc::unbounded_channel();
        let conn = Connection {
            variant: Variant::WebSocket,
            binary: true,
            writer,
            cancel: CancellationToken::new(),
        };
        let ping = [0x89, 0x02, b'h', b'i'];
        assert!(server.attach(1, conn, &ping));

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.last().map(|f| &f[..]), Some(&[0x8A, 0x02, b'h', b'i'][..]));
    }

    #[test]
    fn pointer_state_tracks_input() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 50, 50, false);
        let client = h.connect(1);

        h.send(&client, &format!("e1,10,{id},{id},11,12,1,2,4,0"));
        // Parsed but not dispatched: the future shadow already reflects it.
        let q = h.server.query_pointer();
        assert_eq!((q.root_x, q.root_y, q.state, q.toplevel), (11, 12, 4, Some(id)));

        h.server.dispatch_pending();
        h.server.disconnect(client.id);
        let q = h.server.query_pointer();
        assert_eq!((q.root_x, q.root_y, q.toplevel), (11, 12, Some(id)));

        h.server.destroy_window(id);
        assert_eq!(h.server.query_pointer().toplevel, None);
    }

    #[test]
    fn configure_and_screen_size_update_state() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 50, 50, false);
        let client = h.connect(1);
        h.send(&client, &format!("w2,0,{id},7,8,9,10"));
        h.send(&client, "d3,0,1920,1080");
        h.server.dispatch_pending();
        let w = h.server.window(id).unwrap();
        assert_eq!((w.x, w.y, w.width, w.height), (7, 8, 9, 10));
        assert_eq!(h.server.screen_size(), (1920, 1080));
    }

    #[test]
    fn grab_time_ordering() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 1, 1, false);
        assert_eq!(h.server.grab_pointer(1, id, false, 0, 100), GrabStatus::Success);
        assert_eq!(h.server.grab_pointer(2, id, false, 0, 100), GrabStatus::AlreadyGrabbed);
        assert_eq!(h.server.grab_pointer(2, id, false, 0, 50), GrabStatus::AlreadyGrabbed);
        assert_eq!(h.server.pointer_grab().unwrap().client_id, 1);
        assert_eq!(h.server.grab_pointer(3, id, true, 0, 0), GrabStatus::Success);
        assert_eq!(h.server.pointer_grab().unwrap().client_id, 3);
        assert_eq!(h.server.grab_pointer(4, id, false, 0, 101), GrabStatus::Success);

        assert_eq!(h.server.ungrab_pointer(99), None);
        assert!(h.server.pointer_grab().is_some());
        assert_eq!(h.server.ungrab_pointer(0), Some(h.server.saved_serial()));
        assert!(h.server.pointer_grab().is_none());
    }

    #[test]
    fn grab_routes_pointer_events_only() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 1, 1, false);
        h.events();
        let mut client = h.connect(1);
        h.server.grab_pointer(9, id, true, 0, 0);
        let cmds = cmds_only(client.commands());
        assert_eq!(cmds.last(), Some(&OutputCommand::GrabPointer { id, owner_events: true }));

        h.send(&client, "m1,1,0,0,1,1,1,1,0");
        h.send(&client, "k2,2,0,65,0");
        h.server.dispatch_pending();
        let routes: Vec<Option<u32>> = h.events().iter().map(|e| e.client_id).collect();
        assert_eq!(routes, vec![Some(9), None]);
    }

    #[test]
    fn grab_is_reasserted_on_reconnect() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 1, 1, false);
        h.server.grab_pointer(1, id, false, 0, 0);
        let mut client = h.connect(1);
        let cmds = cmds_only(client.commands());
        assert_eq!(cmds.last(), Some(&OutputCommand::GrabPointer { id, owner_events: false }));
    }

    #[test]
    fn hide_and_destroy_release_grab() {
        let mut h = Harness::new(None);
        let a = h.server.new_window(1, 1, 1, 1, false);
        let b = h.server.new_window(1, 1, 1, 1, false);
        h.server.grab_pointer(1, a, false, 0, 0);
        h.server.window_hide(b);
        assert!(h.server.pointer_grab().is_some());
        h.server.window_hide(a);
        assert!(h.server.pointer_grab().is_none());

        h.server.grab_pointer(1, b, false, 0, 0);
        h.server.destroy_window(b);
        assert!(h.server.pointer_grab().is_none());
    }

    #[test]
    fn updates_send_full_then_diff() {
        let mut h = Harness::new(None);
        let mut client = h.connect(1);
        let id = h.server.new_window(1, 1, 2, 1, false);
        h.server.window_update(id, &Surface::from_argb(2, 1, &[0xFF_000000, 0xFF_000000]));
        h.server.window_update(id, &Surface::from_argb(2, 1, &[0xFF_000000, 0xFF_0000FF]));
        h.server.flush();

        let cmds = cmds_only(client.commands());
        match &cmds[2..] {
            [OutputCommand::PutRgb { image: full, .. }, OutputCommand::SurfaceFlush { .. }, OutputCommand::PutRgba { image: diff, .. }, OutputCommand::SurfaceFlush { .. }] =>
            {
                assert_eq!(&full.rgba[..], &[0, 0, 0, 255, 0, 0, 0, 255]);
                assert_eq!(&diff.rgba[..], &[0, 0, 0, 0, 0, 0, 255, 255]);
            }
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn resize_keeps_raster_contents() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 1, 1, false);
        h.server.window_update(id, &Surface::from_argb(1, 1, &[7]));
        h.events();
        assert!(!h.server.window_move_resize(id, true, 40, 50, 2, 2));

        let w = h.server.window(id).unwrap();
        assert_eq!((w.x, w.y, w.width, w.height), (40, 50, 2, 2));
        let surface = w.last_surface().unwrap();
        assert_eq!((surface.width(), surface.height()), (2, 2));
        assert_eq!(surface.pixel(0, 0), 7);

        let events = h.events();
        assert!(matches!(
            events[0].message.kind,
            MessageKind::ConfigureNotify { x: 40, y: 50, width: 2, height: 2, .. }
        ));
    }

    #[test]
    fn move_resize_while_connected_waits_for_client() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 1, 1, false);
        let mut client = h.connect(1);
        client.commands();
        assert!(h.server.window_move_resize(id, true, 40, 50, 1, 1));
        h.server.flush();
        assert_eq!(
            cmds_only(client.commands()),
            vec![OutputCommand::MoveResize { id, position: Some((40, 50)), size: None }]
        );
        let w = h.server.window(id).unwrap();
        assert_eq!((w.x, w.y), (1, 1));
    }

    #[test]
    fn translate_needs_baseline_and_client() {
        let mut h = Harness::new(None);
        let id = h.server.new_window(1, 1, 2, 1, false);
        h.server.window_update(id, &Surface::from_argb(2, 1, &[1, 2]));
        let area = [Rect::new(0, 0, 2, 1)];
        assert!(!h.server.window_translate(id, &area, 1, 0));

        let mut client = h.connect(1);
        h.server.window_update(id, &Surface::from_argb(2, 1, &[1, 2]));
        h.server.flush();
        client.commands();
        assert!(h.server.window_translate(id, &area, 1, 0));
        h.server.flush();
        assert_eq!(
            cmds_only(client.commands()),
            vec![OutputCommand::CopyRectangles { id, rects: area.to_vec(), dx: 1, dy: 0 }]
        );
        let surface = h.server.window(id).unwrap().last_surface().unwrap();
        assert_eq!((surface.pixel(0, 0), surface.pixel(1, 0)), (1, 1));
    }

    #[test]
    fn block_for_input_answers_from_queue_and_later() {
        let mut h = Harness::new(None);
        let client = h.connect(1);
        h.send(&client, "g4,0,0");

        let (tx, mut rx) = oneshot::channel();
        h.server.block_for_input('g', 4, true, tx);
        let msg = rx.try_recv().unwrap().unwrap();
        assert_eq!(msg.kind, MessageKind::GrabReply { result: 0 });
        h.server.dispatch_pending();
        assert!(h.events().is_empty());

        let (tx, mut rx) = oneshot::channel();
        h.server.block_for_input('u', 8, false, tx);
        assert!(rx.try_recv().is_err());
        h.send(&client, "u7,0,0");
        h.send(&client, "u8,0,1");
        let msg = rx.try_recv().unwrap().unwrap();
        assert_eq!((msg.serial, msg.kind), (8, MessageKind::UngrabReply { result: 1 }));
        h.server.dispatch_pending();
        assert_eq!(h.events().len(), 2);
    }

    #[test]
    fn block_for_input_without_client_returns_none() {
        let mut h = Harness::new(None);
        let (tx, mut rx) = oneshot::channel();
        h.server.block_for_input('g', 1, true, tx);
        assert_eq!(rx.try_recv().unwrap(), None);

        let client = h.connect(1);
        let (tx, mut rx) = oneshot::channel();
        h.server.block_for_input('g', 1, true, tx);
        h.server.disconnect(client.id);
        assert_eq!(rx.try_recv().unwrap(), None);
    }

    #[test]
    fn route_is_pure() {
        let grab = PointerGrab {
            window_id: 1,
            client_id: 5,
            owner_events: false,
            event_mask: 0,
            time: 0,
        };
        let key = MessageKind::KeyPress { mouse_window_id: 0, key: 1, state: 0 };
        let scroll = MessageKind::Scroll {
            pointer: PointerInfo {
                mouse_window_id: 0,
                event_window_id: 0,
                root_x: 0,
                root_y: 0,
                win_x: 0,
                win_y: 0,
                state: 0,
            },
            direction: 1,
        };
        assert_eq!(route(&scroll, Some(&grab)), Some(5));
        assert_eq!(route(&scroll, None), None);
        assert_eq!(route(&key, Some(&grab)), None);
    }
}
