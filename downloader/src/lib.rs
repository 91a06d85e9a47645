use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use reqwest::Client;
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::{Error, NetworkError, Result};
use scrapy_lab_core::request::{Method, Request};
use scrapy_lab_core::response::Response;
use scrapy_lab_core::zyte::{ZYTE_API_AUTOMAP_META_KEY, ZYTE_API_META_KEY};
use tokio::sync::Semaphore;

pub mod zyte;

pub use zyte::{ZyteApiClient, ZyteApiConfig, ZyteApiDownloader};

/// Configuration for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Maximum number of concurrent requests
    pub concurrent_requests: usize,

    /// User agent string
    pub user_agent: String,

    /// Default request timeout in seconds
    pub timeout: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: 16,
            user_agent: format!("scrapy_lab/{}", env!("CARGO_PKG_VERSION")),
            timeout: 180,
        }
    }
}

/// Trait for downloaders
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// Download a single request
    async fn download(&self, request: Request) -> Result<Response>;

    /// Download multiple requests concurrently
    async fn download_many(&self, requests: Vec<Request>) -> Vec<Result<Response>> {
        let futures = requests.into_iter().map(|req| self.download(req));
        join_all(futures).await
    }
}

/// HTTP downloader implementation
pub struct HttpDownloader {
    /// HTTP client
    client: Client,

    /// Semaphore to limit concurrent requests
    semaphore: Arc<Semaphore>,

    config: DownloaderConfig,

    warned_zyte_meta: AtomicBool,
}

impl HttpDownloader {
    /// Create a new HTTP downloader with the given configuration
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| Error::other(format!("Failed to create HTTP client: {}", e)))?;

        let semaphore = Arc::new(Semaphore::new(config.concurrent_requests.max(1)));

        Ok(Self {
            client,
            semaphore,
            config,
            warned_zyte_meta: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    fn build_reqwest_request(&self, request: &Request) -> reqwest::RequestBuilder {
        let mut req_builder = self.client.request(
            match request.method {
                Method::GET => reqwest::Method::GET,
                Method::POST => reqwest::Method::POST,
                Method::PUT => reqwest::Method::PUT,
                Method::DELETE => reqwest::Method::DELETE,
                Method::HEAD => reqwest::Method::HEAD,
                Method::OPTIONS => reqwest::Method::OPTIONS,
                Method::PATCH => reqwest::Method::PATCH,
            },
            request.url.clone(),
        );

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = &request.body {
            req_builder = req_builder.body(body.clone());
        }

        req_builder
    }

    fn warn_on_zyte_meta(&self, request: &Request) {
        let has_zyte_meta = request.meta.contains_key(ZYTE_API_META_KEY)
            || request.meta.contains_key(ZYTE_API_AUTOMAP_META_KEY);
        if has_zyte_meta && !self.warned_zyte_meta.swap(true, Ordering::Relaxed) {
            warn!(
                "Request to {} carries Zyte API meta but the Zyte API addon is not enabled; \
                 sending plain HTTP requests",
                request.url
            );
        }
    }
}

/// Map a transport failure to a crawl error
pub(crate) fn network_error(error: reqwest::Error, timeout: Duration) -> Error {
    let kind = if error.is_timeout() {
        NetworkError::Timeout(timeout)
    } else if error.is_redirect() {
        NetworkError::TooManyRedirects
    } else if error.is_connect() {
        NetworkError::Connection(error.to_string())
    } else {
        NetworkError::Other(error.to_string())
    };

    let mut err = Error::network(kind);
    if let Some(url) = error.url() {
        err = err.with_url(url.as_str());
    }
    err
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, request: Request) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::other(format!("Failed to acquire semaphore permit: {}", e)))?;

        self.warn_on_zyte_meta(&request);
        debug!("Downloading URL: {}", request.url);

        let timeout = Duration::from_secs(self.config.timeout);
        let response = self
            .build_reqwest_request(&request)
            .send()
            .await
            .map_err(|e| network_error(e, timeout).with_component("downloader"))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(e, timeout).with_component("downloader"))?
            .to_vec();

        let mut rs_response = Response::new(request, status, headers, body);
        rs_response.url = final_url;

        Ok(rs_response)
    }
}
