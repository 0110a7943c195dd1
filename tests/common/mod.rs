#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use base64::Engine;
use broadway::output::{decode_all, OutputCommand};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server on an ephemeral loopback port.
pub async fn start_server(password: Option<String>) -> broadway::Running {
    broadway::start("127.0.0.1:0", password, broadway::handshake::MAX_REQUEST_SIZE)
        .await
        .expect("failed to start server")
}

pub async fn connect(addr: SocketAddr, path: &str) -> WsStream {
    let (ws, _) = tokio::time::timeout(TIMEOUT, connect_async(format!("ws://{addr}{path}")))
        .await
        .expect("timeout connecting")
        .expect("websocket handshake failed");
    ws
}

/// Receive the next output frame and decode its commands.
pub async fn recv_commands(ws: &mut WsStream) -> Vec<(u32, OutputCommand)> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => {
                let payload = base64::engine::general_purpose::STANDARD
                    .decode(text.as_str())
                    .expect("output frame is not base64");
                return decode_all(&payload);
            }
            Message::Binary(data) => return decode_all(&data),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
}

/// Receive frames until one carries `wanted`, returning every command seen.
pub async fn recv_until(ws: &mut WsStream, wanted: &OutputCommand) -> Vec<OutputCommand> {
    let mut seen = Vec::new();
    loop {
        for (_, cmd) in recv_commands(ws).await {
            let done = &cmd == wanted;
            seen.push(cmd);
            if done {
                return seen;
            }
        }
    }
}

/// Send a raw request and read until the server closes the connection.
pub async fn raw_request(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");
    stream.write_all(request).await.expect("write failed");
    let mut response = Vec::new();
    tokio::time::timeout(TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("timeout reading response")
        .expect("read failed");
    response
}

/// Split a raw HTTP response into its head and body.
pub fn split_response(response: &[u8]) -> (String, Vec<u8>) {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no end of headers");
    (
        String::from_utf8_lossy(&response[..end]).into_owned(),
        response[end + 4..].to_vec(),
    )
}
