//! WebSocket transport adapter.
//!
//! A thin front end that turns socket events into the three server
//! callbacks. The core never depends on this module; an embedder with its
//! own transport only needs to implement [`Connection`] and call the
//! callbacks itself. Listening-port configuration and TLS termination stay
//! with the surrounding application, which hands a bound listener over.
//!
//! Each accepted socket gets a writer task fed by an unbounded channel; the
//! [`Connection`] implementation pushes into that channel, so the delivery
//! queue's consumer never blocks on one peer's flow control. A client may
//! present its identity as a `client_id` query parameter on the upgrade
//! request, the WebSocket stand-in for the cookie the original design used.

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};
use tracing::{debug, error, info};

use crate::{
    connection::{Connection, ConnectionError},
    error::ServerError,
    server::SessionServer,
};

/// WebSocket listener bound to a local address.
pub struct WsTransport {
    listener: TcpListener,
}

impl WsTransport {
    /// Bind to `address` (e.g. `"0.0.0.0:8080"`).
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Transport(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        info!("websocket transport bound to {}", addr);

        Ok(Self { listener })
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::from)
    }

    /// Accept connections forever, feeding events into `server`.
    pub async fn run(self, server: SessionServer) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let server = server.clone();
                    tokio::spawn(async move {
                        handle_socket(stream, addr, server).await;
                    });
                },
                Err(err) => {
                    error!(%err, "accept failed");
                },
            }
        }
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").field("local_addr", &self.listener.local_addr()).finish()
    }
}

/// Drive one socket from handshake to close.
async fn handle_socket(stream: TcpStream, addr: SocketAddr, server: SessionServer) {
    let requested_id = Arc::new(Mutex::new(None::<String>));

    let capture = Arc::clone(&requested_id);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *capture.lock() = request.uri().query().and_then(client_id_from_query);
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%addr, %err, "websocket handshake failed");
            return;
        },
    };

    let (mut write, mut read) = ws_stream.split();

    // Writer task: the only place this socket is written to. The channel
    // keeps per-connection delivery order as handed over by the queue.
    let (frames_tx, mut frames_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = frames_rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let sink = Arc::new(WsConnection { frames: frames_tx });
    let requested = requested_id.lock().take();
    let conn_id = server.connection_opened(sink, requested);
    debug!(%addr, %conn_id, "websocket connection opened");

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                server.message_received(conn_id, text.as_str().to_owned());
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by the protocol layer on the next flush.
            Ok(_) => {},
            Err(err) => {
                debug!(%conn_id, %err, "websocket read failed");
                break;
            },
        }
    }

    server.connection_closed(conn_id);
    writer.abort();
    debug!(%addr, %conn_id, "websocket connection closed");
}

/// Extract `client_id` from a raw query string.
fn client_id_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "client_id" && !value.is_empty()).then(|| value.to_owned())
    })
}

/// Outbound half of one WebSocket connection.
struct WsConnection {
    frames: tokio::sync::mpsc::UnboundedSender<Message>,
}

impl Connection for WsConnection {
    fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        self.frames
            .send(Message::text(text.to_owned()))
            .map_err(|_| ConnectionError("peer is gone".to_owned()))
    }

    fn close(&self) {
        let _ = self.frames.send(Message::Close(None));
    }
}
