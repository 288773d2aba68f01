// Scripted fake controller for tests that need control over the wire:
// chunked framing, stalled bodies and the notification WebSocket.
#![allow(dead_code, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use unidoor_api::session::{NOTIFICATION_PATH, TOPOLOGY_PATH};
use unidoor_api::{ControllerSession, Credentials, TransportConfig};

/// What the fake controller answers.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Raw bytes written for the topology request (status line included).
    pub topology_response: Vec<u8>,
    /// Keep the topology connection open after writing instead of closing.
    pub hold_topology_open: bool,
    /// Text frames pushed to every notification client after the handshake.
    pub ws_frames: Vec<String>,
    /// Close the WebSocket right after the frames.
    pub close_ws_after_frames: bool,
}

pub struct FakeController {
    pub addr: SocketAddr,
    /// `Cookie` header of the last WebSocket upgrade.
    pub ws_cookie: Arc<Mutex<Option<String>>>,
    pub ws_connections: Arc<AtomicUsize>,
}

impl FakeController {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ws_cookie = Arc::new(Mutex::new(None));
        let ws_connections = Arc::new(AtomicUsize::new(0));

        let script = Arc::new(script);
        let cookie = Arc::clone(&ws_cookie);
        let connections = Arc::clone(&ws_connections);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let script = Arc::clone(&script);
                let cookie = Arc::clone(&cookie);
                let connections = Arc::clone(&connections);
                tokio::spawn(async move {
                    if is_websocket(&stream).await {
                        connections.fetch_add(1, Ordering::SeqCst);
                        serve_ws(stream, &script, &cookie).await;
                    } else {
                        let _ = serve_http(stream, &script).await;
                    }
                });
            }
        });

        Self {
            addr,
            ws_cookie,
            ws_connections,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn session(&self) -> ControllerSession {
        session_for(&self.url())
    }
}

pub fn session_for(url: &str) -> ControllerSession {
    let password: SecretString = "pw".to_string().into();
    let credentials = Credentials::new(url, "admin", password).unwrap();
    ControllerSession::new(credentials, &TransportConfig::default()).unwrap()
}

/// Encode `payload` as chunked framing with chunks of `size` bytes.
pub fn chunked(payload: &[u8], size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in payload.chunks(size.max(1)) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// A `200 OK` head announcing a chunked body.
pub fn chunked_head() -> Vec<u8> {
    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n".to_vec()
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

async fn is_websocket(stream: &TcpStream) -> bool {
    let wanted = format!("GET {NOTIFICATION_PATH}");
    let mut buf = vec![0u8; wanted.len()];
    for _ in 0..50 {
        match stream.peek(&mut buf).await {
            Ok(n) if n >= wanted.len() => return buf == wanted.as_bytes(),
            Ok(0) | Err(_) => return false,
            Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    false
}

async fn serve_ws(stream: TcpStream, script: &Script, cookie: &Mutex<Option<String>>) {
    let capture = |req: &Request, resp: Response| {
        *cookie.lock().unwrap() = req
            .headers()
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(resp)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, capture).await else {
        return;
    };

    for frame in &script.ws_frames {
        if ws.send(Message::text(frame.clone())).await.is_err() {
            return;
        }
    }
    if script.close_ws_after_frames {
        let _ = ws.close(None).await;
        return;
    }
    while let Some(Ok(_)) = ws.next().await {}
}

async fn serve_http(stream: TcpStream, script: &Script) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    let response: Vec<u8> = match (method, target) {
        ("GET", "/") => b"HTTP/1.1 200 OK\r\nX-Csrf-Token: initial\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        ("POST", "/api/auth/login") => b"HTTP/1.1 200 OK\r\nSet-Cookie: TOKEN=abc123; path=/\r\nX-Updated-Csrf-Token: def456\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}".to_vec(),
        ("GET", TOPOLOGY_PATH) => {
            write.write_all(&script.topology_response).await?;
            write.flush().await?;
            if script.hold_topology_open {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            return write.shutdown().await;
        }
        _ => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
    };

    write.write_all(&response).await?;
    write.shutdown().await
}
