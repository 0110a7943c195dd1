//! Broadway display server.
//!
//! Serves an HTML5 client over HTTP, accepts its WebSocket connection, and
//! keeps the authoritative window state that is mirrored to it. The toolkit
//! layer drives windows through a [`DisplayHandle`] and receives input as
//! [`DisplayEvent`]s.

pub mod assets;
pub mod auth;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event_loop;
pub mod framing;
pub mod handshake;
pub mod listener;
pub mod message;
pub mod output;
pub mod state;
pub mod surface;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use error::ServerError;
pub use event_loop::{DisplayHandle, EventLoop};
pub use state::DisplayEvent;

/// A server running on the current tokio runtime.
pub struct Running {
    pub addr: SocketAddr,
    pub handle: DisplayHandle,
    pub events: mpsc::UnboundedReceiver<DisplayEvent>,
    /// Stops the listener and the display loop.
    pub cancel: CancellationToken,
}

/// Bind `addr` and spawn the listener and display loop.
pub async fn start(
    addr: &str,
    password: Option<String>,
    max_request_size: usize,
) -> Result<Running, ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let local = listener.local_addr()?;

    let (event_loop, handle, events) = EventLoop::new(password);
    let cancel = CancellationToken::new();
    tokio::spawn(event_loop.run(cancel.clone()));

    let listener_handle = handle.clone();
    let listener_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) =
            listener::serve(listener, listener_handle, max_request_size, listener_cancel).await
        {
            tracing::error!(?e, "listener error");
        }
    });

    Ok(Running {
        addr: local,
        handle,
        events,
        cancel,
    })
}
