use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, info, warn};
use rand::Rng;
use regex::Regex;
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::request::Request;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::spider::Spider;
use tokio::sync::Mutex;
use tokio::time::sleep;

pub mod robots;

pub use robots::{RobotsTxt, RobotsTxtMiddleware};

/// Priority level for middleware execution
/// Higher priority middleware will be executed first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MiddlewarePriority {
    /// Highest priority, executed first
    Highest = 1000,
    /// High priority
    High = 800,
    /// Normal priority (default)
    #[default]
    Normal = 500,
    /// Low priority
    Low = 200,
    /// Lowest priority, executed last
    Lowest = 0,
}

/// Trait for request middleware
#[async_trait]
pub trait RequestMiddleware: Send + Sync + 'static {
    /// Process a request before it is sent.
    ///
    /// Returning [`Error::IgnoreRequest`] drops the request without
    /// counting it as a failure.
    async fn process_request(&self, request: Request, spider: &dyn Spider) -> Result<Request>;

    /// Called when a spider is opened
    async fn spider_opened(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Called when a spider is closed
    async fn spider_closed(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Get the priority of this middleware
    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Normal
    }

    /// Get the name of this middleware
    fn name(&self) -> &str;

    /// Whether this middleware should be applied to the given request
    fn should_process_request(&self, _request: &Request, _spider: &dyn Spider) -> bool {
        true
    }
}

/// Trait for response middleware
#[async_trait]
pub trait ResponseMiddleware: Send + Sync + 'static {
    /// Process a response after it is received
    async fn process_response(&self, response: Response, spider: &dyn Spider) -> Result<Response>;

    /// Called when a spider is opened
    async fn spider_opened(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Called when a spider is closed
    async fn spider_closed(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Get the priority of this middleware
    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Normal
    }

    /// Get the name of this middleware
    fn name(&self) -> &str;

    /// Whether this middleware should be applied to the given response
    fn should_process_response(&self, _response: &Response, _spider: &dyn Spider) -> bool {
        true
    }
}

/// Log level for the ResponseLoggerMiddleware
#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// Adds the user agent and default headers to requests that do not set
/// them already
pub struct DefaultHeadersMiddleware {
    /// Headers to add to requests
    headers: HashMap<String, String>,
    /// Priority of this middleware
    priority: MiddlewarePriority,
}

impl DefaultHeadersMiddleware {
    /// Create a new DefaultHeadersMiddleware with the given headers
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self {
            headers,
            priority: MiddlewarePriority::High,
        }
    }

    /// Browser-like Accept headers plus the given user agent
    pub fn common(user_agent: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), user_agent.to_string());
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        );
        headers.insert("Accept-Language".to_string(), "en".to_string());
        Self::new(headers)
    }

    /// Add a header to the middleware
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the priority of this middleware
    pub fn with_priority(mut self, priority: MiddlewarePriority) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl RequestMiddleware for DefaultHeadersMiddleware {
    async fn process_request(&self, mut request: Request, _spider: &dyn Spider) -> Result<Request> {
        for (key, value) in &self.headers {
            if request.header(key).is_none() {
                request.headers.insert(key.clone(), value.clone());
            }
        }
        Ok(request)
    }

    fn priority(&self) -> MiddlewarePriority {
        self.priority
    }

    fn name(&self) -> &str {
        "DefaultHeadersMiddleware"
    }
}

/// Spaces out request starts by a fixed delay, optionally randomised to
/// between 0.5 and 1.5 times the delay
pub struct DownloadDelayMiddleware {
    delay: Duration,
    randomize: bool,
    last_request: Mutex<Option<Instant>>,
}

impl DownloadDelayMiddleware {
    pub fn new(delay: Duration, randomize: bool) -> Self {
        Self {
            delay,
            randomize,
            last_request: Mutex::new(None),
        }
    }

    /// Delay from a number of seconds as found in settings
    pub fn from_secs_f64(secs: f64, randomize: bool) -> Self {
        Self::new(Duration::from_secs_f64(secs.max(0.0)), randomize)
    }

    fn next_delay(&self) -> Duration {
        if self.randomize {
            self.delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.5))
        } else {
            self.delay
        }
    }
}

#[async_trait]
impl RequestMiddleware for DownloadDelayMiddleware {
    async fn process_request(&self, request: Request, _spider: &dyn Spider) -> Result<Request> {
        // Held across the sleep so concurrent requests queue up behind it
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let delay = self.next_delay();
            let elapsed = previous.elapsed();
            if elapsed < delay {
                let wait = delay - elapsed;
                debug!("Download delay: sleeping {:?} before {}", wait, request.url);
                sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
        Ok(request)
    }

    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Low
    }

    fn name(&self) -> &str {
        "DownloadDelayMiddleware"
    }

    fn should_process_request(&self, _request: &Request, _spider: &dyn Spider) -> bool {
        !self.delay.is_zero()
    }
}

/// Drops requests to hosts outside the spider's allowed domains.
/// Subdomains of an allowed domain are allowed too.
pub struct OffsiteMiddleware {
    host_pattern: RwLock<Option<Regex>>,
}

impl OffsiteMiddleware {
    /// Take the allowed domains from the spider when it opens
    pub fn new() -> Self {
        Self {
            host_pattern: RwLock::new(None),
        }
    }

    /// Fixed list of allowed domains
    pub fn for_domains(domains: &[String]) -> Result<Self> {
        Ok(Self {
            host_pattern: RwLock::new(Self::build_pattern(domains)?),
        })
    }

    fn build_pattern(domains: &[String]) -> Result<Option<Regex>> {
        let domains: Vec<String> = domains
            .iter()
            .map(|domain| domain.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .map(|domain| regex::escape(&domain))
            .collect();

        if domains.is_empty() {
            return Ok(None);
        }

        let pattern = format!(r"^(.*\.)?({})$", domains.join("|"));
        Regex::new(&pattern)
            .map(Some)
            .map_err(|e| Error::middleware(format!("Invalid allowed domain pattern: {}", e)))
    }

    fn is_allowed(&self, request: &Request) -> bool {
        let guard = match self.host_pattern.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match (guard.as_ref(), request.url.host_str()) {
            (None, _) => true,
            (Some(pattern), Some(host)) => pattern.is_match(&host.to_ascii_lowercase()),
            (Some(_), None) => false,
        }
    }
}

impl Default for OffsiteMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestMiddleware for OffsiteMiddleware {
    async fn process_request(&self, request: Request, _spider: &dyn Spider) -> Result<Request> {
        if request.dont_filter || self.is_allowed(&request) {
            return Ok(request);
        }

        Err(Error::IgnoreRequest(format!(
            "offsite request to {}",
            request.url.host_str().unwrap_or_default()
        )))
    }

    async fn spider_opened(&self, spider: &dyn Spider) -> Result<()> {
        let domains = spider.allowed_domains();
        if domains.is_empty() {
            return Ok(());
        }

        let pattern = Self::build_pattern(&domains)?;
        let mut guard = match self.host_pattern.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = pattern;
        Ok(())
    }

    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Highest
    }

    fn name(&self) -> &str {
        "OffsiteMiddleware"
    }
}

/// A middleware that logs responses
pub struct ResponseLoggerMiddleware {
    /// Log level to use
    level: LogLevel,
}

impl ResponseLoggerMiddleware {
    /// Create a new ResponseLoggerMiddleware with the given log level
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Create a new ResponseLoggerMiddleware with INFO level
    pub fn info() -> Self {
        Self::new(LogLevel::Info)
    }

    /// Create a new ResponseLoggerMiddleware with DEBUG level
    pub fn debug() -> Self {
        Self::new(LogLevel::Debug)
    }
}

#[async_trait]
impl ResponseMiddleware for ResponseLoggerMiddleware {
    async fn process_response(&self, response: Response, _spider: &dyn Spider) -> Result<Response> {
        let via = if response.is_api_response() {
            "zyte_api"
        } else {
            "http"
        };
        match self.level {
            LogLevel::Debug => debug!(
                "Crawled ({}) <{}> via {}, {} bytes",
                response.status,
                response.url,
                via,
                response.body.len()
            ),
            LogLevel::Info => info!(
                "Crawled ({}) <{}> via {}, {} bytes",
                response.status,
                response.url,
                via,
                response.body.len()
            ),
            LogLevel::Warn => warn!(
                "Crawled ({}) <{}> via {}, {} bytes",
                response.status,
                response.url,
                via,
                response.body.len()
            ),
        }

        Ok(response)
    }

    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Lowest
    }

    fn name(&self) -> &str {
        "ResponseLoggerMiddleware"
    }
}

/// Runs request middlewares in priority order, highest first. Middlewares
/// of equal priority keep the order they were added in.
#[derive(Default)]
pub struct ChainedRequestMiddleware {
    middlewares: Vec<Box<dyn RequestMiddleware>>,
}

impl ChainedRequestMiddleware {
    /// Create a new ChainedRequestMiddleware with the given middlewares
    pub fn new(middlewares: Vec<Box<dyn RequestMiddleware>>) -> Self {
        let mut chain = Self { middlewares };
        chain.sort();
        chain
    }

    /// Add a middleware to the chain
    pub fn add<M: RequestMiddleware>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Box::new(middleware));
        self.sort();
        self
    }

    fn sort(&mut self) {
        self.middlewares
            .sort_by(|a, b| b.priority().cmp(&a.priority()));

        if log::log_enabled!(log::Level::Debug) {
            let names: Vec<String> = self
                .middlewares
                .iter()
                .map(|m| format!("{}({})", m.name(), m.priority() as u32))
                .collect();
            debug!("Request middleware order: {}", names.join(", "));
        }
    }

    /// Names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

#[async_trait]
impl RequestMiddleware for ChainedRequestMiddleware {
    async fn process_request(&self, mut request: Request, spider: &dyn Spider) -> Result<Request> {
        for middleware in &self.middlewares {
            if middleware.should_process_request(&request, spider) {
                request = middleware.process_request(request, spider).await?;
            }
        }

        Ok(request)
    }

    async fn spider_opened(&self, spider: &dyn Spider) -> Result<()> {
        let futures = self.middlewares.iter().map(|m| m.spider_opened(spider));

        for result in join_all(futures).await {
            result?;
        }

        Ok(())
    }

    async fn spider_closed(&self, spider: &dyn Spider) -> Result<()> {
        let futures = self.middlewares.iter().map(|m| m.spider_closed(spider));

        for result in join_all(futures).await {
            result?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "ChainedRequestMiddleware"
    }
}

/// Runs response middlewares in priority order, highest first
#[derive(Default)]
pub struct ChainedResponseMiddleware {
    middlewares: Vec<Box<dyn ResponseMiddleware>>,
}

impl ChainedResponseMiddleware {
    /// Create a new ChainedResponseMiddleware with the given middlewares
    pub fn new(middlewares: Vec<Box<dyn ResponseMiddleware>>) -> Self {
        let mut chain = Self { middlewares };
        chain.sort();
        chain
    }

    /// Add a middleware to the chain
    pub fn add<M: ResponseMiddleware>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Box::new(middleware));
        self.sort();
        self
    }

    fn sort(&mut self) {
        self.middlewares
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

#[async_trait]
impl ResponseMiddleware for ChainedResponseMiddleware {
    async fn process_response(
        &self,
        mut response: Response,
        spider: &dyn Spider,
    ) -> Result<Response> {
        for middleware in &self.middlewares {
            if middleware.should_process_response(&response, spider) {
                response = middleware.process_response(response, spider).await?;
            }
        }

        Ok(response)
    }

    async fn spider_opened(&self, spider: &dyn Spider) -> Result<()> {
        let futures = self.middlewares.iter().map(|m| m.spider_opened(spider));

        for result in join_all(futures).await {
            result?;
        }

        Ok(())
    }

    async fn spider_closed(&self, spider: &dyn Spider) -> Result<()> {
        let futures = self.middlewares.iter().map(|m| m.spider_closed(spider));

        for result in join_all(futures).await {
            result?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "ChainedResponseMiddleware"
    }
}
