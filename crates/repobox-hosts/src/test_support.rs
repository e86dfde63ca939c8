//! A minimal loopback HTTP server for the client tests in this crate.
//! Each call to [`MockServer::start`] serves the given `(status, body)`
//! pairs in order, one per accepted connection, then closes the
//! connection so a retrying client opens a fresh one for its next
//! attempt. No network access beyond localhost; no external mocking
//! dependency.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct MockServer {
    addr: std::net::SocketAddr,
    request_count: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        let request_count = Arc::new(AtomicUsize::new(0));
        let counter = request_count.clone();
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let next = queue.lock().expect("lock poisoned").pop_front();
                let Some((status, body)) = next else {
                    return;
                };

                let mut buf = [0u8; 8192];
                // Read whatever the client has sent so far; we don't need to
                // parse it, just drain it so the client's write completes.
                let _ = tokio::time::timeout(
                    std::time::Duration::from_millis(200),
                    stream.read(&mut buf),
                )
                .await;

                let reason = reason_phrase(status);
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
                    len = body.len(),
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { addr, request_count }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        401 => "Unauthorized",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Error",
    }
}
