//! TCP front end: HTTP request handling, WebSocket upgrade, and the
//! per-connection reader and writer tasks feeding the display loop.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event_loop::{DisplayHandle, LoopEvent};
use crate::handshake::{self, HandshakeError, HandshakeOutcome, HttpRequest, RequestReader};
use crate::state::{Connection, ConnectionId};

/// Time allowed for a client to send its complete request head.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 4096;

/// Accept connections until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    handle: DisplayHandle,
    max_request_size: usize,
    cancel: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "broadway server listening");
    }

    let mut next_id: ConnectionId = 1;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("listener received cancel signal, stopping accept loop");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let id = next_id;
                        next_id += 1;
                        tracing::debug!(conn = id, %addr, "accepted connection");
                        let handle = handle.clone();
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, id, handle, max_request_size, cancel).await {
                                tracing::debug!(conn = id, ?e, "connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(?e, "failed to accept connection");
                        // Backoff to prevent tight loop under sustained accept errors
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    id: ConnectionId,
    handle: DisplayHandle,
    max_request_size: usize,
    cancel: CancellationToken,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);

    let request = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_request(&mut reader, max_request_size),
    )
    .await
    {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(RequestError::Http(e))) => return reject(reader.into_inner(), id, e).await,
        Ok(Err(RequestError::Io(e))) => return Err(e),
        Err(_) => {
            tracing::debug!(conn = id, "timed out waiting for request");
            return Ok(());
        }
    };

    // Whatever the client pipelined after the head.
    let mut body = reader.buffer().to_vec();
    let mut stream = reader.into_inner();
    if request.wants_legacy_key() && body.len() < handshake::LEGACY_KEY3_LEN {
        let mut rest = vec![0u8; handshake::LEGACY_KEY3_LEN - body.len()];
        // A short key falls through to the handshake and is answered with 400.
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut rest)).await {
            Ok(Ok(_)) => body.extend_from_slice(&rest),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!(conn = id, "peer stopped before the legacy key");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => tracing::debug!(conn = id, "timed out waiting for legacy key"),
        }
    }

    let upgrade = match handshake::respond(&request, &body) {
        Ok(HandshakeOutcome::Asset(response)) => {
            tracing::debug!(conn = id, path = %request.path, "serving asset");
            stream.write_all(&response).await?;
            return stream.shutdown().await;
        }
        Ok(HandshakeOutcome::Upgrade(upgrade)) => upgrade,
        Err(e) => return reject(stream, id, e).await,
    };

    stream.write_all(&upgrade.response).await?;
    stream.set_nodelay(true)?;
    tracing::info!(
        conn = id,
        variant = ?upgrade.variant,
        binary = upgrade.binary,
        "websocket connection established"
    );

    let (read_half, write_half) = stream.into_split();
    let (writer, writer_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write_half, writer_rx, cancel.clone()));

    let initial = Bytes::copy_from_slice(body.get(upgrade.consumed..).unwrap_or_default());
    let conn = Connection {
        variant: upgrade.variant,
        binary: upgrade.binary,
        writer,
        cancel: cancel.clone(),
    };
    if handle
        .send_event(LoopEvent::Attach { id, conn, initial })
        .is_err()
    {
        return Ok(());
    }

    let result = read_loop(read_half, id, &handle, &cancel).await;
    let _ = handle.send_event(LoopEvent::Closed { id });
    cancel.cancel();
    result
}

enum RequestError {
    Http(HandshakeError),
    Io(io::Error),
}

/// Read the request head. `None` means the peer closed before finishing it.
async fn read_request(
    reader: &mut BufReader<TcpStream>,
    limit: usize,
) -> Result<Option<HttpRequest>, RequestError> {
    let mut request = RequestReader::new(limit);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *reader)
            .take(limit as u64 + 2)
            .read_until(b'\n', &mut line)
            .await
            .map_err(RequestError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        let done = request
            .push_line(&String::from_utf8_lossy(&line))
            .map_err(RequestError::Http)?;
        if done {
            return request.finish().map(Some).map_err(RequestError::Http);
        }
        if !line.ends_with(b"\n") {
            // Cut off by the size bound or the peer; either way incomplete.
            return Err(RequestError::Http(HandshakeError::RequestTooLong));
        }
    }
}

async fn reject(mut stream: TcpStream, id: ConnectionId, error: HandshakeError) -> io::Result<()> {
    tracing::debug!(conn = id, %error, "rejecting request");
    stream.write_all(&error.to_response()).await?;
    stream.shutdown().await
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    id: ConnectionId,
    handle: &DisplayHandle,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(conn = id, "reader cancelled");
                return Ok(());
            }
            result = read_half.read_buf(&mut buf) => {
                match result? {
                    0 => {
                        tracing::debug!(conn = id, "peer closed connection");
                        return Ok(());
                    }
                    _ => {
                        let data = buf.split().freeze();
                        if handle.send_event(LoopEvent::Data { id, data }).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(data) = msg else { break };
                if let Err(e) = write_half.write_all(&data).await {
                    tracing::debug!(?e, "write failed");
                    return;
                }
            }
            _ = cancel.cancelled() => {
                // Deliver what the server queued before dropping us.
                while let Ok(data) = rx.try_recv() {
                    if write_half.write_all(&data).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = write_half.shutdown().await;
}
