//! Shared utilities for integration tests.
//!
//! The proxy's transport is blocking, so tests are plain `#[test]`s and every
//! mock server runs on its own Tokio runtime in a background thread.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use header_proxy::config::{HeaderProxyConfig, ServerConfig};
use header_proxy::DirectiveServer;

/// Run `serve` on a fresh runtime in a background thread, after binding an
/// ephemeral port. Returns the bound address.
fn spawn_server<F, Fut>(serve: F) -> SocketAddr
where
    F: FnOnce(TcpListener) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            serve(listener).await;
        });
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

/// Start the reference directive backend.
pub fn start_directive_server() -> SocketAddr {
    spawn_server(|listener| async move {
        let server = DirectiveServer::new(&ServerConfig::default());
        let _ = server.run_until(listener, std::future::pending()).await;
    })
}

/// Start a mock backend that answers every request with `(status, body)`
/// from `f`. Returns the address and a request counter.
#[allow(dead_code)]
pub fn start_programmable_backend<F>(f: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let f = Arc::new(f);

    let addr = spawn_server(move |listener| async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let f = f.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                counter.fetch_add(1, Ordering::SeqCst);

                let (status, body) = f(&request);
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, hits)
}

/// Start a backend that accepts connections and never answers.
#[allow(dead_code)]
pub fn start_silent_backend() -> SocketAddr {
    spawn_server(|listener| async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    })
}

/// A config fetching directives from `addr`.
pub fn config_for(addr: SocketAddr) -> HeaderProxyConfig {
    let mut config = HeaderProxyConfig::default();
    config.fetch.url = Some(format!("http://{addr}/directives"));
    config.fetch.timeout_secs = 2.0;
    config.pool.gc_sample_rate = 0.0;
    config
}
