use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use url::Url;

use crate::error::{Error, Result};

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
}

impl Method {
    /// Upper-case method name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

/// Represents an HTTP request to be made by the crawler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The URL to request
    pub url: Url,

    /// The HTTP method to use
    #[serde(default)]
    pub method: Method,

    /// HTTP headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body (for POST, PUT, etc.)
    #[serde(default)]
    pub body: Option<Vec<u8>>,

    /// Metadata associated with this request.
    ///
    /// `zyte_api` and `zyte_api_automap` select how the request is sent
    /// through the Zyte API.
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,

    /// Name of the spider routine that handles the response
    #[serde(default)]
    pub callback: Option<String>,

    /// Whether duplicates of this request are allowed
    #[serde(default)]
    pub dont_filter: bool,
}

impl Request {
    fn with_method(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(Error::UrlParseError)?;
        Ok(Self {
            url,
            method,
            headers: HashMap::new(),
            body: None,
            meta: HashMap::new(),
            callback: None,
            dont_filter: false,
        })
    }

    /// Create a new GET request
    pub fn get<U: AsRef<str>>(url: U) -> Result<Self> {
        Self::with_method(Method::GET, url.as_ref())
    }

    /// Create a new POST request
    pub fn post<U: AsRef<str>, B: Into<Vec<u8>>>(url: U, body: B) -> Result<Self> {
        let mut request = Self::with_method(Method::POST, url.as_ref())?;
        request.body = Some(body.into());
        Ok(request)
    }

    /// Add a header to the request
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add metadata to the request
    pub fn with_meta<K: Into<String>, V: Into<serde_json::Value>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Set the callback for this request
    pub fn with_callback<C: Into<String>>(mut self, callback: C) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// Set whether to filter this request
    pub fn with_dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Identity used for duplicate filtering: method, URL and body
    pub fn fingerprint(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.method.hash(&mut hasher);
        self.url.as_str().hash(&mut hasher);
        self.body.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.method == other.method
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.as_str().hash(state);
        std::mem::discriminant(&self.method).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_get() {
        let req = Request::get("https://example.com").unwrap();
        assert_eq!(req.url.as_str(), "https://example.com/");
        assert_eq!(req.method, Method::GET);
        assert!(req.body.is_none());
        assert!(!req.dont_filter);
    }

    #[test]
    fn test_request_post() {
        let body = "test body";
        let req = Request::post("https://example.com", body).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body.unwrap(), body.as_bytes());
    }

    #[test]
    fn test_request_invalid_url() {
        assert!(matches!(
            Request::get("not a url"),
            Err(Error::UrlParseError(_))
        ));
    }

    #[test]
    fn test_request_with_header() {
        let req = Request::get("https://example.com")
            .unwrap()
            .with_header("Accept-Language", "en-US,en;q=0.9");

        assert_eq!(req.header("accept-language"), Some("en-US,en;q=0.9"));
        assert_eq!(req.header("Referer"), None);
    }

    #[test]
    fn test_request_with_meta() {
        let req = Request::get("https://example.com")
            .unwrap()
            .with_meta("zyte_api_automap", true);

        assert_eq!(
            req.meta.get("zyte_api_automap").unwrap(),
            &serde_json::json!(true)
        );
    }

    #[test]
    fn test_fingerprint() {
        let a = Request::get("https://example.com/page").unwrap();
        let b = Request::get("https://example.com/page")
            .unwrap()
            .with_meta("zyte_api_automap", true);
        let c = Request::post("https://example.com/page", "x").unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
