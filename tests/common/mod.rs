//! In-process HTTP fixture for end-to-end crawl tests.
//!
//! A tiny hand-rolled HTTP/1.1 server over a `tokio::net::TcpListener`: it
//! parses the request line and headers, hands them to the test's handler,
//! and writes the response with `Connection: close`. Every request is
//! recorded so tests can assert on what the crawler actually sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scuttle::{CrawlEvent, Crawler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A canned response from the fixture.
pub struct Response {
    pub code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn html(body: &str) -> Self {
        Response {
            code: 200,
            headers: vec![("Content-Type".into(), "text/html".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn not_found() -> Self {
        Response {
            code: 404,
            headers: vec![("Content-Type".into(), "text/plain".into())],
            body: b"not found".to_vec(),
        }
    }

    pub fn redirect(code: u16, location: &str) -> Self {
        Response {
            code,
            headers: vec![("Location".into(), location.into())],
            body: Vec::new(),
        }
    }

    pub fn status(code: u16) -> Self {
        Response {
            code,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One recorded request: path plus lowercased header map.
pub type Hit = (String, HashMap<String, String>);

pub struct TestServer {
    pub addr: SocketAddr,
    pub hits: Arc<Mutex<Vec<Hit>>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits_for(&self, path: &str) -> Vec<Hit> {
        self.hits
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .cloned()
            .collect()
    }
}

static TRACING: std::sync::Once = std::sync::Once::new();

/// Honors `RUST_LOG` when tests are run with logging enabled.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Starts the fixture with a routing function from (path, headers) to a
/// response.
pub async fn start_server<F>(handler: F) -> TestServer
where
    F: Fn(&str, &HashMap<String, String>) -> Response + Send + Sync + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits: Arc<Mutex<Vec<Hit>>> = Arc::new(Mutex::new(Vec::new()));

    let handler = Arc::new(handler);
    let hits_for_task = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let hits = hits_for_task.clone();
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 1024];
                // GET requests only: read until the end of the header block.
                while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                    }
                }

                let text = String::from_utf8_lossy(&buffer);
                let mut lines = text.lines();
                let request_line = lines.next().unwrap_or_default();
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let mut headers = HashMap::new();
                for line in lines {
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        headers.insert(
                            name.trim().to_ascii_lowercase(),
                            value.trim().to_string(),
                        );
                    }
                }

                hits.lock().push((path.clone(), headers.clone()));
                let response = handler(&path, &headers);

                let reason = match response.code {
                    200 => "OK",
                    301 => "Moved Permanently",
                    304 => "Not Modified",
                    404 => "Not Found",
                    410 => "Gone",
                    _ => "Response",
                };
                let mut out = format!("HTTP/1.1 {} {}\r\n", response.code, reason);
                out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
                out.push_str("Connection: close\r\n");
                for (name, value) in &response.headers {
                    out.push_str(&format!("{}: {}\r\n", name, value));
                }
                out.push_str("\r\n");

                let _ = stream.write_all(out.as_bytes()).await;
                let _ = stream.write_all(&response.body).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    TestServer { addr, hits }
}

/// Starts the crawler and collects events until `Complete` (panicking if the
/// crawl does not finish within the timeout).
pub async fn run_to_complete(crawler: &Crawler, timeout: Duration) -> Vec<CrawlEvent> {
    let mut rx = crawler.subscribe();
    crawler.start();

    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => {
                let done = matches!(event, CrawlEvent::Complete);
                events.push(event);
                if done {
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => panic!("crawl did not complete within {:?}", timeout),
        }
    }
    events
}

pub fn count_matching(events: &[CrawlEvent], predicate: impl Fn(&CrawlEvent) -> bool) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}
