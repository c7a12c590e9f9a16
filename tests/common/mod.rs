//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use campaign_gateway::config::{GatewayConfig, RouteConfig, ServiceConfig};
use campaign_gateway::{Gateway, Shutdown};

/// What a mock backend saw.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_health_probe(&self) -> bool {
        self.path == "/health"
    }
}

/// A running mock backend.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Non-probe requests received so far.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock backend that answers every request with 200 and `body`.
pub async fn start_mock_backend(body: &'static str) -> MockBackend {
    start_programmable_backend(move |_, _| (200, body.to_string())).await
}

/// Start a backend whose response is computed per request. The closure gets
/// the request and the number of earlier non-probe hits.
pub async fn start_programmable_backend<F>(f: F) -> MockBackend
where
    F: Fn(&CapturedRequest, u32) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicU32::new(0)),
        requests: Arc::default(),
    };
    let f = Arc::new(f);

    let state = backend.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    let state = state.clone();
                    tokio::spawn(async move {
                        let _ = serve_one(socket, f.as_ref(), &state).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    backend
}

async fn serve_one<F>(mut socket: TcpStream, f: &F, state: &MockBackend) -> std::io::Result<()>
where
    F: Fn(&CapturedRequest, u32) -> (u16, String),
{
    let Some(request) = read_request(&mut socket).await? else {
        return Ok(());
    };

    let previous = if request.is_health_probe() {
        state.hits.load(Ordering::SeqCst)
    } else {
        state.hits.fetch_add(1, Ordering::SeqCst)
    };
    state.requests.lock().unwrap().push(request.clone());

    let (status, body) = f(&request, previous);
    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}

/// Read a request head and discard any body.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<CapturedRequest>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    let mut remaining = content_length.saturating_sub(buf.len() - head_end);
    while remaining > 0 {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    Ok(Some(CapturedRequest {
        method,
        path,
        headers,
    }))
}

/// Config routing `/` to one service backed by `instances`, with background
/// probing off and short timeouts.
pub fn config_for(instances: &[&MockBackend]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.services.push(ServiceConfig {
        name: "campaigns".into(),
        instances: instances.iter().map(|b| b.url()).collect(),
    });
    config.routes.push(RouteConfig {
        name: "campaigns".into(),
        path_prefix: "/".into(),
        host: None,
        service: "campaigns".into(),
        endpoint_class: None,
        strip_prefix: false,
        priority: 0,
    });
    config.health_check.enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.timeouts.attempt_ms = 2_000;
    config.observability.metrics_enabled = false;
    config
}

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let gateway = Gateway::build(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = gateway.run(listener, run_shutdown).await;
    });
    // Give the server a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestGateway { addr, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
