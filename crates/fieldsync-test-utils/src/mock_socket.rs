// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recording WebSocket server for realtime channel tests.
//!
//! Every accepted connection records its request URI, the text frames the
//! client sent, and the close code the client used. Tests can push frames to a
//! connection, close it with a code, or drop it abruptly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What the server saw on one client connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedConnection {
    /// Request path and query, e.g. `/socket?apikey=..&token=..`.
    pub uri: String,
    /// Text frames received from the client, in order.
    pub frames: Vec<String>,
    /// Close code from the client's close frame, if it sent one.
    pub close_code: Option<u16>,
    /// Set once the connection ended for any reason.
    pub closed: bool,
}

enum ServerCommand {
    Text(String),
    Close(u16),
    Drop,
}

#[derive(Default)]
struct ServerState {
    connections: Vec<RecordedConnection>,
    senders: Vec<mpsc::UnboundedSender<ServerCommand>>,
}

/// A WebSocket server bound to an ephemeral localhost port.
pub struct MockSocketServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    accept_task: JoinHandle<()>,
}

impl MockSocketServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(handle_connection(stream, state));
            }
        });

        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    /// `ws://` URL of the server root.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connections(&self) -> Vec<RecordedConnection> {
        self.state.lock().await.connections.clone()
    }

    /// Poll the recorded connections until `check` holds or `timeout` passes.
    pub async fn wait_until<F>(&self, timeout: Duration, check: F) -> bool
    where
        F: Fn(&[RecordedConnection]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check(&self.state.lock().await.connections) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Push a text frame to connection `index`.
    pub async fn send_text(&self, index: usize, text: impl Into<String>) {
        self.command(index, ServerCommand::Text(text.into())).await;
    }

    /// Close connection `index` with a close frame carrying `code`.
    pub async fn close(&self, index: usize, code: u16) {
        self.command(index, ServerCommand::Close(code)).await;
    }

    /// Drop connection `index` without a close handshake.
    pub async fn drop_connection(&self, index: usize) {
        self.command(index, ServerCommand::Drop).await;
    }

    async fn command(&self, index: usize, command: ServerCommand) {
        let state = self.state.lock().await;
        if let Some(sender) = state.senders.get(index) {
            let _ = sender.send(command);
        }
    }
}

impl Drop for MockSocketServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, state: Arc<Mutex<ServerState>>) {
    let uri = Arc::new(std::sync::Mutex::new(String::new()));
    let captured = Arc::clone(&uri);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if let Ok(mut slot) = captured.lock() {
            *slot = request.uri().to_string();
        }
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(error = %e, "mock socket handshake failed");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let index = {
        let mut state = state.lock().await;
        let uri = uri.lock().map(|u| u.clone()).unwrap_or_default();
        state.connections.push(RecordedConnection {
            uri,
            ..RecordedConnection::default()
        });
        state.senders.push(tx);
        state.connections.len() - 1
    };

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(ServerCommand::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "server close".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                Some(ServerCommand::Drop) | None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.lock().await.connections[index].frames.push(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    state.lock().await.connections[index].close_code = code;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }

    state.lock().await.connections[index].closed = true;
}
