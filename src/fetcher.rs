use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "pl-PL,pl;q=0.9,en;q=0.5";
/// Larger images are skipped rather than inlined into a prompt.
const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Raw markup of a fetched page and the URL it was served from after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FetchedImage {
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Page retrieval. Failures are logged by the implementation and surface as `None`.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<FetchedPage>;
    async fn fetch_image(&self, url: &str) -> Option<FetchedImage>;
}

/// HTTP fetcher owning one connection pool for the duration of a batch run.
/// The client is built on first use and dropped with the fetcher.
pub struct HttpFetcher {
    client: OnceLock<reqwest::Client>,
    connect_timeout: Duration,
    timeout: Duration,
    max_image_bytes: usize,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: OnceLock::new(),
            connect_timeout: settings.connect_timeout(),
            timeout: settings.request_timeout(),
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }

    fn client(&self) -> Result<&reqwest::Client, FetchError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = build_client(self.connect_timeout, self.timeout)?;
        Ok(self.client.get_or_init(|| built))
    }

    async fn try_fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::EmptyUrl);
        }
        let response = self.client()?.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let final_url = response.url().to_string();
        let html = response.text().await?;
        debug!(url, final_url = %final_url, bytes = html.len(), "fetched page");
        Ok(FetchedPage { url: final_url, html })
    }

    async fn try_fetch_image(&self, url: &str) -> Result<FetchedImage, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::EmptyUrl);
        }
        let mut response = self.client()?.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(FetchError::NotAnImage(content_type));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_image_bytes as u64 {
                return Err(FetchError::TooLarge(self.max_image_bytes));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_image_bytes {
                return Err(FetchError::TooLarge(self.max_image_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(FetchedImage { content_type, bytes })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Option<FetchedPage> {
        match self.try_fetch(url).await {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(url, error = %e, "fetch failed");
                None
            }
        }
    }

    async fn fetch_image(&self, url: &str) -> Option<FetchedImage> {
        match self.try_fetch_image(url).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(url, error = %e, "image fetch failed");
                None
            }
        }
    }
}

/// Many studio sites ship broken certificate chains, so validation is off.
/// Fetched content is only ever treated as text.
pub(crate) fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<reqwest::Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| FetchError::Client(e.to_string()))
}
