//! The single task that owns [`Server`].
//!
//! Connection tasks and the toolkit layer talk to it over one channel of
//! [`LoopEvent`]s; nothing else touches display state. Queued input is
//! dispatched only when no event is ready, so a burst of reads is parsed
//! before any of it is delivered.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::message::InputMessage;
use crate::output::Rect;
use crate::state::{Connection, ConnectionId, DisplayEvent, GrabStatus, PointerState, Server};
use crate::surface::SurfaceHandle;

pub enum LoopEvent {
    /// A connection finished its WebSocket handshake.
    Attach {
        id: ConnectionId,
        conn: Connection,
        initial: Bytes,
    },
    Data {
        id: ConnectionId,
        data: Bytes,
    },
    Closed {
        id: ConnectionId,
    },
    Request(Request),
}

/// Window-system calls from the toolkit layer.
pub enum Request {
    NewWindow {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
        reply: oneshot::Sender<u32>,
    },
    DestroyWindow {
        id: u32,
        reply: oneshot::Sender<()>,
    },
    Show {
        id: u32,
        reply: oneshot::Sender<bool>,
    },
    Hide {
        id: u32,
        reply: oneshot::Sender<bool>,
    },
    MoveResize {
        id: u32,
        with_move: bool,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        reply: oneshot::Sender<bool>,
    },
    SetTransientFor {
        id: u32,
        parent: u32,
        reply: oneshot::Sender<bool>,
    },
    Translate {
        id: u32,
        area: Vec<Rect>,
        dx: i32,
        dy: i32,
        reply: oneshot::Sender<bool>,
    },
    Update {
        id: u32,
        surface: SurfaceHandle,
        reply: oneshot::Sender<()>,
    },
    GrabPointer {
        client_id: u32,
        id: u32,
        owner_events: bool,
        event_mask: u32,
        time: u32,
        reply: oneshot::Sender<GrabStatus>,
    },
    UngrabPointer {
        time: u32,
        reply: oneshot::Sender<Option<u32>>,
    },
    OpenSurface {
        id: u32,
        name: String,
        width: u32,
        height: u32,
        reply: oneshot::Sender<Option<SurfaceHandle>>,
    },
    QueryPointer {
        reply: oneshot::Sender<PointerState>,
    },
    ScreenSize {
        reply: oneshot::Sender<(i32, i32)>,
    },
    NextSerial {
        reply: oneshot::Sender<u32>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    BlockForInput {
        tag: char,
        serial: u32,
        remove: bool,
        reply: oneshot::Sender<Option<InputMessage>>,
    },
}

pub struct EventLoop {
    server: Server,
    rx: mpsc::UnboundedReceiver<LoopEvent>,
}

impl EventLoop {
    /// Build the loop, a handle to it, and the stream of routed input events.
    pub fn new(
        password: Option<String>,
    ) -> (Self, DisplayHandle, mpsc::UnboundedReceiver<DisplayEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let server = Server::new(password, events_tx);
        (Self { server, rx }, DisplayHandle { tx }, events_rx)
    }

    /// Run until `cancel` fires or every handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("display loop received cancel signal");
                    break;
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                () = std::future::ready(()), if self.server.has_pending_dispatch() => {
                    self.server.dispatch_pending();
                }
            }
        }
        self.server.dispatch_pending();
        self.server.flush();
    }

    fn handle(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Attach { id, conn, initial } => {
                self.server.attach(id, conn, &initial);
            }
            LoopEvent::Data { id, data } => {
                self.server.on_data(id, &data);
            }
            LoopEvent::Closed { id } => self.server.disconnect(id),
            LoopEvent::Request(request) => {
                self.handle_request(request);
                self.server.flush();
            }
        }
    }

    fn handle_request(&mut self, request: Request) {
        let server = &mut self.server;
        match request {
            Request::NewWindow {
                x,
                y,
                width,
                height,
                is_temp,
                reply,
            } => {
                let _ = reply.send(server.new_window(x, y, width, height, is_temp));
            }
            Request::DestroyWindow { id, reply } => {
                server.destroy_window(id);
                let _ = reply.send(());
            }
            Request::Show { id, reply } => {
                let _ = reply.send(server.window_show(id));
            }
            Request::Hide { id, reply } => {
                let _ = reply.send(server.window_hide(id));
            }
            Request::MoveResize {
                id,
                with_move,
                x,
                y,
                width,
                height,
                reply,
            } => {
                let _ = reply.send(server.window_move_resize(id, with_move, x, y, width, height));
            }
            Request::SetTransientFor { id, parent, reply } => {
                let _ = reply.send(server.window_set_transient_for(id, parent));
            }
            Request::Translate {
                id,
                area,
                dx,
                dy,
                reply,
            } => {
                let _ = reply.send(server.window_translate(id, &area, dx, dy));
            }
            Request::Update { id, surface, reply } => {
                server.window_update(id, &surface);
                let _ = reply.send(());
            }
            Request::GrabPointer {
                client_id,
                id,
                owner_events,
                event_mask,
                time,
                reply,
            } => {
                let _ = reply.send(server.grab_pointer(client_id, id, owner_events, event_mask, time));
            }
            Request::UngrabPointer { time, reply } => {
                let _ = reply.send(server.ungrab_pointer(time));
            }
            Request::OpenSurface {
                id,
                name,
                width,
                height,
                reply,
            } => {
                let _ = reply.send(server.open_surface(id, &name, width, height));
            }
            Request::QueryPointer { reply } => {
                let _ = reply.send(server.query_pointer());
            }
            Request::ScreenSize { reply } => {
                let _ = reply.send(server.screen_size());
            }
            Request::NextSerial { reply } => {
                let _ = reply.send(server.next_serial());
            }
            Request::Flush { reply } => {
                server.flush();
                let _ = reply.send(());
            }
            Request::BlockForInput {
                tag,
                serial,
                remove,
                reply,
            } => server.block_for_input(tag, serial, remove, reply),
        }
    }
}

/// Cloneable handle to the display loop.
#[derive(Clone)]
pub struct DisplayHandle {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl DisplayHandle {
    pub(crate) fn send_event(&self, event: LoopEvent) -> Result<(), ServerError> {
        self.tx.send(event).map_err(|_| ServerError::LoopClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send_event(LoopEvent::Request(make(reply)))?;
        rx.await.map_err(|_| ServerError::LoopClosed)
    }

    pub async fn new_window(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
    ) -> Result<u32, ServerError> {
        self.request(|reply| Request::NewWindow {
            x,
            y,
            width,
            height,
            is_temp,
            reply,
        })
        .await
    }

    pub async fn destroy_window(&self, id: u32) -> Result<(), ServerError> {
        self.request(|reply| Request::DestroyWindow { id, reply }).await
    }

    pub async fn window_show(&self, id: u32) -> Result<bool, ServerError> {
        self.request(|reply| Request::Show { id, reply }).await
    }

    pub async fn window_hide(&self, id: u32) -> Result<bool, ServerError> {
        self.request(|reply| Request::Hide { id, reply }).await
    }

    pub async fn window_move_resize(
        &self,
        id: u32,
        with_move: bool,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<bool, ServerError> {
        self.request(|reply| Request::MoveResize {
            id,
            with_move,
            x,
            y,
            width,
            height,
            reply,
        })
        .await
    }

    pub async fn window_set_transient_for(&self, id: u32, parent: u32) -> Result<bool, ServerError> {
        self.request(|reply| Request::SetTransientFor { id, parent, reply })
            .await
    }

    pub async fn window_translate(
        &self,
        id: u32,
        area: Vec<Rect>,
        dx: i32,
        dy: i32,
    ) -> Result<bool, ServerError> {
        self.request(|reply| Request::Translate {
            id,
            area,
            dx,
            dy,
            reply,
        })
        .await
    }

    pub async fn window_update(&self, id: u32, surface: SurfaceHandle) -> Result<(), ServerError> {
        self.request(|reply| Request::Update { id, surface, reply })
            .await
    }

    pub async fn grab_pointer(
        &self,
        client_id: u32,
        id: u32,
        owner_events: bool,
        event_mask: u32,
        time: u32,
    ) -> Result<GrabStatus, ServerError> {
        self.request(|reply| Request::GrabPointer {
            client_id,
            id,
            owner_events,
            event_mask,
            time,
            reply,
        })
        .await
    }

    pub async fn ungrab_pointer(&self, time: u32) -> Result<Option<u32>, ServerError> {
        self.request(|reply| Request::UngrabPointer { time, reply }).await
    }

    pub async fn open_surface(
        &self,
        id: u32,
        name: &str,
        width: u32,
        height: u32,
    ) -> Result<Option<SurfaceHandle>, ServerError> {
        let name = name.to_string();
        self.request(|reply| Request::OpenSurface {
            id,
            name,
            width,
            height,
            reply,
        })
        .await
    }

    pub async fn query_pointer(&self) -> Result<PointerState, ServerError> {
        self.request(|reply| Request::QueryPointer { reply }).await
    }

    pub async fn screen_size(&self) -> Result<(i32, i32), ServerError> {
        self.request(|reply| Request::ScreenSize { reply }).await
    }

    pub async fn next_serial(&self) -> Result<u32, ServerError> {
        self.request(|reply| Request::NextSerial { reply }).await
    }

    pub async fn flush(&self) -> Result<(), ServerError> {
        self.request(|reply| Request::Flush { reply }).await
    }

    /// Wait for the client's reply with `tag` and a serial of at least
    /// `serial`. `None` means no client is attached.
    pub async fn block_for_input(
        &self,
        tag: char,
        serial: u32,
        remove: bool,
    ) -> Result<Option<InputMessage>, ServerError> {
        self.request(|reply| Request::BlockForInput {
            tag,
            serial,
            remove,
            reply,
        })
        .await
    }

    /// Blocking form of [`block_for_input`](Self::block_for_input) for code
    /// running outside the runtime. Panics if called from an async context.
    pub fn block_for_input_blocking(
        &self,
        tag: char,
        serial: u32,
        remove: bool,
    ) -> Result<Option<InputMessage>, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send_event(LoopEvent::Request(Request::BlockForInput {
            tag,
            serial,
            remove,
            reply,
        }))?;
        rx.blocking_recv().map_err(|_| ServerError::LoopClosed)
    }
}
