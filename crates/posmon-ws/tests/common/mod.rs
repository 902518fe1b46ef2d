//! Mock venue WebSocket server for stream integration tests.
//!
//! Records every text frame and request path it sees, and lets the test push
//! frames to (or abruptly drop) all open connections.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
enum ServerCmd {
    Push(String),
    DropAll,
}

pub struct MockVenueServer {
    addr: SocketAddr,
    messages: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    cmd_tx: broadcast::Sender<ServerCmd>,
}

impl MockVenueServer {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Server that refuses every upgrade with `status`.
    pub async fn start_rejecting(status: u16) -> Self {
        Self::start_with(Some(status)).await
    }

    async fn start_with(reject_status: Option<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let (cmd_tx, _) = broadcast::channel(64);

        let server = Self {
            addr,
            messages: messages.clone(),
            paths: paths.clone(),
            connections: connections.clone(),
            cmd_tx: cmd_tx.clone(),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    messages.clone(),
                    paths.clone(),
                    connections.clone(),
                    cmd_tx.subscribe(),
                    reject_status,
                ));
            }
        });

        server
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received_messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn request_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn push(&self, text: &str) {
        let _ = self.cmd_tx.send(ServerCmd::Push(text.to_string()));
    }

    pub fn drop_connections(&self) {
        let _ = self.cmd_tx.send(ServerCmd::DropAll);
    }

    /// Poll until a received frame satisfies `pred`.
    pub async fn wait_for_message(&self, pred: impl Fn(&str) -> bool) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(found) = self.received_messages().into_iter().find(|m| pred(m)) {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for frame")
    }

    /// Poll until at least `count` received frames satisfy `pred`.
    pub async fn wait_for_messages(&self, count: usize, pred: impl Fn(&str) -> bool) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let found: Vec<String> = self
                    .received_messages()
                    .into_iter()
                    .filter(|m| pred(m))
                    .collect();
                if found.len() >= count {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for frames")
    }

    pub async fn wait_for_connections(&self, count: u32) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connection_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for connection");
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    mut cmd_rx: broadcast::Receiver<ServerCmd>,
    reject_status: Option<u16>,
) {
    let record_path = paths.clone();
    let callback = move |req: &Request, resp: Response| {
        record_path.lock().unwrap().push(req.uri().to_string());
        match reject_status {
            Some(status) => {
                let mut rejection = ErrorResponse::new(Some("rejected".to_string()));
                *rejection.status_mut() = StatusCode::from_u16(status).unwrap();
                Err(rejection)
            }
            None => Ok(resp),
        }
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    messages.lock().unwrap().push(text.clone());
                    if text.contains("\"SUBSCRIBE\"") || text.contains("\"UNSUBSCRIBE\"") {
                        let id = serde_json::from_str::<serde_json::Value>(&text)
                            .ok()
                            .and_then(|v| v.get("id").cloned())
                            .unwrap_or(serde_json::Value::Null);
                        let ack = serde_json::json!({ "result": null, "id": id });
                        let _ = write.send(Message::Text(ack.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            cmd = cmd_rx.recv() => match cmd {
                Ok(ServerCmd::Push(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(ServerCmd::DropAll) | Err(_) => break,
            },
        }
    }
}
