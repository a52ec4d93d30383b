//! Test doubles for the fetcher and the extraction capability, plus a
//! throwaway local HTTP server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ExtractError;
use crate::extract::{Category, ExtractionInput, StructuredExtractor, Target};
use crate::fetcher::{FetchedImage, FetchedPage, PageFetcher};

// ── Extraction ──

type Script = VecDeque<Result<Value, ExtractError>>;

/// Replays queued responses per (category, text/image). An exhausted queue
/// answers `ExtractError::Empty`.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<(Category, bool), Script>>,
    inputs: Mutex<Vec<(Category, String)>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, category: Category, response: Result<Value, ExtractError>) -> Self {
        self.push(category, false, response);
        self
    }

    pub fn then_image(self, category: Category, response: Result<Value, ExtractError>) -> Self {
        self.push(category, true, response);
        self
    }

    fn push(&self, category: Category, image: bool, response: Result<Value, ExtractError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry((category, image))
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (category, text or data URI) of every call, in order.
    pub fn inputs(&self) -> Vec<(Category, String)> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        input: ExtractionInput<'_>,
        target: &Target,
    ) -> Result<Value, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (image, raw) = match input {
            ExtractionInput::Text(t) => (false, t.to_string()),
            ExtractionInput::Image(uri) => (true, uri.to_string()),
        };
        self.inputs.lock().unwrap().push((target.category, raw));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&(target.category, image))
            .and_then(|q| q.pop_front())
            .unwrap_or(Err(ExtractError::Empty))
    }
}

// ── Fetching ──

/// Serves canned pages and images by exact URL and records every request.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    images: HashMap<String, FetchedImage>,
    requested: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn image(mut self, url: &str, bytes: &[u8]) -> Self {
        self.images.insert(
            url.to_string(),
            FetchedImage {
                content_type: "image/jpeg".into(),
                bytes: bytes.to_vec(),
            },
        );
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Option<FetchedPage> {
        self.requested.lock().unwrap().push(url.to_string());
        self.pages.get(url).map(|html| FetchedPage {
            url: url.to_string(),
            html: html.clone(),
        })
    }

    async fn fetch_image(&self, url: &str) -> Option<FetchedImage> {
        self.requested.lock().unwrap().push(url.to_string());
        self.images.get(url).cloned()
    }
}

/// Filler long enough to pass the minimum-text check.
pub fn page_html(body: &str) -> String {
    format!(
        "<html><body><h1>Studio jogi</h1><p>Zapraszamy na zajęcia jogi dla początkujących \
         i zaawansowanych w samym centrum miasta.</p>{}</body></html>",
        body
    )
}

// ── Local HTTP server ──

#[derive(Clone)]
pub struct Route {
    path: String,
    status: u16,
    content_type: String,
    body: Vec<u8>,
    location: Option<String>,
    head_status: Option<u16>,
}

impl Route {
    pub fn ok(path: &str, content_type: &str, body: &[u8]) -> Self {
        Self {
            path: path.into(),
            status: 200,
            content_type: content_type.into(),
            body: body.to_vec(),
            location: None,
            head_status: None,
        }
    }

    pub fn status(path: &str, status: u16) -> Self {
        Self {
            status,
            ..Self::ok(path, "text/plain", b"")
        }
    }

    pub fn redirect(path: &str, to: &str) -> Self {
        Self {
            status: 301,
            location: Some(to.into()),
            ..Self::ok(path, "text/plain", b"")
        }
    }

    /// Answers GET normally but refuses HEAD with 405.
    pub fn get_only(path: &str, content_type: &str, body: &[u8]) -> Self {
        Self {
            head_status: Some(405),
            ..Self::ok(path, content_type, body)
        }
    }
}

/// Serve `routes` on an ephemeral local port until the test runtime ends.
/// Unknown paths answer 404. Returns the base URL with a trailing slash.
pub async fn serve(routes: Vec<Route>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut len = 0;
                while len < buf.len() {
                    match socket.read(&mut buf[len..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => len += n,
                    }
                    if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..len]);
                let mut first = request.lines().next().unwrap_or("").split_whitespace();
                let method = first.next().unwrap_or("GET").to_string();
                let path = first.next().unwrap_or("/").to_string();

                let mut route = routes
                    .iter()
                    .find(|r| r.path == path)
                    .cloned()
                    .unwrap_or_else(|| Route::status(&path, 404));
                if method == "HEAD" {
                    if let Some(status) = route.head_status {
                        route.status = status;
                    }
                }

                let mut head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    route.status,
                    route.content_type,
                    route.body.len()
                );
                if let Some(location) = &route.location {
                    head.push_str(&format!("Location: {}\r\n", location));
                }
                head.push_str("\r\n");

                let _ = socket.write_all(head.as_bytes()).await;
                if method != "HEAD" {
                    let _ = socket.write_all(&route.body).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/", addr)
}
