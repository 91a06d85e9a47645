use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

/// Error context information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// URL associated with the error
    pub url: Option<String>,

    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,

    /// Spider name
    pub spider_name: Option<String>,

    /// Component where the error occurred
    pub component: Option<String>,

    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the status code
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Set the spider name
    pub fn with_spider_name(mut self, spider_name: impl Into<String>) -> Self {
        self.spider_name = Some(spider_name.into());
        self
    }

    /// Set the component
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.status_code.is_none()
            && self.spider_name.is_none()
            && self.component.is_none()
            && self.metadata.is_empty()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();

        if let Some(ref url) = self.url {
            parts.push(format!("url={}", url));
        }

        if let Some(status_code) = self.status_code {
            parts.push(format!("status={}", status_code));
        }

        if let Some(ref spider_name) = self.spider_name {
            parts.push(format!("spider={}", spider_name));
        }

        if let Some(ref component) = self.component {
            parts.push(format!("component={}", component));
        }

        let mut metadata: Vec<_> = self.metadata.iter().collect();
        metadata.sort();
        for (key, value) in metadata {
            parts.push(format!("{}={}", key, value));
        }

        write!(f, "[{}]", parts.join(", "))
    }
}

/// Network error types
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NetworkError {
    /// Connection refused or reset
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Request timeout
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// Too many redirects
    #[error("Too many redirects")]
    TooManyRedirects,

    /// Other network error
    #[error("Network error: {0}")]
    Other(String),
}

/// HTTP error types
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum HttpError {
    /// Client error (4xx)
    #[error("Client error: {status} {message}")]
    ClientError {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Server error (5xx)
    #[error("Server error: {status} {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },
}

/// Parse error types
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ResponseParseError {
    /// Body could not be decoded as text
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// JSON parse error
    #[error("JSON parse error: {0}")]
    JsonError(String),

    /// CSS selector error
    #[error("CSS selector error: {0}")]
    CssSelectorError(String),

    /// Other parse error
    #[error("Parse error: {0}")]
    Other(String),
}

/// Error types for scrapy_lab
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Error when parsing a URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] ParseError),

    /// Network error
    #[error("Network error: {error} {context}")]
    Network {
        /// The network error
        error: NetworkError,
        /// Error context
        context: ErrorContext,
    },

    /// HTTP error
    #[error("HTTP error: {error} {context}")]
    Http {
        /// The HTTP error
        error: HttpError,
        /// Error context
        context: ErrorContext,
    },

    /// Error reported by the Zyte API
    #[error("Zyte API error: {status} {title}: {detail} {context}")]
    ZyteApi {
        /// HTTP status returned by the API
        status: u16,
        /// Problem title
        title: String,
        /// Problem detail
        detail: String,
        /// Error context
        context: ErrorContext,
    },

    /// Unsupported combination of Zyte API parameters
    #[error("Invalid Zyte API parameters: {0}")]
    InvalidParams(String),

    /// Error when parsing response content
    #[error("Parse error: {error} {context}")]
    Parse {
        /// The parse error
        error: ResponseParseError,
        /// Error context
        context: ErrorContext,
    },

    /// Error when processing an item
    #[error("Item processing error: {message} {context}")]
    Item {
        /// Error message
        message: String,
        /// Error context
        context: ErrorContext,
    },

    /// Error in middleware
    #[error("Middleware error: {message} {context}")]
    Middleware {
        /// Error message
        message: String,
        /// Error context
        context: ErrorContext,
    },

    /// A middleware decided the request must not be sent
    #[error("Request ignored: {0}")]
    IgnoreRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serde error
    #[error("Serialization error: {0}")]
    SerdeError(String),

    /// Generic error
    #[error("{message} {context}")]
    Other {
        /// Error message
        message: String,
        /// Error context
        context: ErrorContext,
    },
}

impl Error {
    /// Create a new network error
    pub fn network(error: NetworkError) -> Self {
        Self::Network {
            error,
            context: ErrorContext::new(),
        }
    }

    /// Create a new HTTP error
    pub fn http(error: HttpError) -> Self {
        Self::Http {
            error,
            context: ErrorContext::new(),
        }
    }

    /// Create a new Zyte API error
    pub fn zyte_api(status: u16, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ZyteApi {
            status,
            title: title.into(),
            detail: detail.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new parse error
    pub fn parse(error: ResponseParseError) -> Self {
        Self::Parse {
            error,
            context: ErrorContext::new(),
        }
    }

    /// Create a new item error
    pub fn item(message: impl Into<String>) -> Self {
        Self::Item {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new middleware error
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::Middleware {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Network { context, .. }
            | Self::Http { context, .. }
            | Self::ZyteApi { context, .. }
            | Self::Parse { context, .. }
            | Self::Item { context, .. }
            | Self::Middleware { context, .. }
            | Self::Other { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get a mutable reference to the error context
    pub fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::Network { context, .. }
            | Self::Http { context, .. }
            | Self::ZyteApi { context, .. }
            | Self::Parse { context, .. }
            | Self::Item { context, .. }
            | Self::Middleware { context, .. }
            | Self::Other { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Set the URL in the error context
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.url = Some(url.into());
        }
        self
    }

    /// Set the status code in the error context
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.status_code = Some(status_code);
        }
        self
    }

    /// Set the spider name in the error context
    pub fn with_spider_name(mut self, spider_name: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.spider_name = Some(spider_name.into());
        }
        self
    }

    /// Set the component in the error context
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.component = Some(component.into());
        }
        self
    }

    /// Whether the request was dropped on purpose rather than failing
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::IgnoreRequest(_))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { error, .. } => !matches!(error, NetworkError::TooManyRedirects),
            Self::Http { error, .. } => match error {
                HttpError::ServerError { status, .. } => *status >= 500 && *status < 600,
                HttpError::ClientError { status, .. } => *status == 429,
            },
            // Temporary Zyte API conditions: rate limiting, overload, temporary download errors
            Self::ZyteApi { status, .. } => matches!(status, 429 | 503 | 520 | 521),
            _ => false,
        }
    }
}

/// Result type for scrapy_lab operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerdeError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        let err = Error::other("boom")
            .with_url("https://example.com/")
            .with_spider_name("quotes")
            .with_component("downloader");

        let msg = err.to_string();
        assert!(msg.starts_with("boom ["));
        assert!(msg.contains("url=https://example.com/"));
        assert!(msg.contains("spider=quotes"));
        assert!(msg.contains("component=downloader"));
    }

    #[test]
    fn test_zyte_api_retryable_statuses() {
        for status in [429, 503, 520, 521] {
            assert!(Error::zyte_api(status, "temporary", "").is_retryable());
        }
        for status in [400, 401, 403, 422, 500] {
            assert!(!Error::zyte_api(status, "permanent", "").is_retryable());
        }
    }

    #[test]
    fn test_network_errors_retryable() {
        assert!(Error::network(NetworkError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!Error::network(NetworkError::TooManyRedirects).is_retryable());
        assert!(!Error::InvalidParams("x".into()).is_retryable());
    }

    #[test]
    fn test_ignore_request() {
        let err = Error::IgnoreRequest("offsite".to_string());
        assert!(err.is_ignored());
        assert!(err.context().is_none());
        assert!(!Error::other("x").is_ignored());
    }
}
