use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{Error, ResponseParseError, Result};
use crate::extract::FieldExtractor;
use crate::item::DynamicItem;
use crate::request::Request;
use crate::selector::Document;

/// Represents an HTTP response received by the crawler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The URL of the response
    pub url: Url,

    /// The HTTP status code
    pub status: u16,

    /// HTTP headers received, names lower-cased
    pub headers: HashMap<String, String>,

    /// Response body
    pub body: Vec<u8>,

    /// The request that generated this response
    pub request: Request,

    /// Metadata associated with this response
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,

    /// Full JSON returned by the Zyte API when the response came through it
    #[serde(default)]
    pub raw_api_response: Option<serde_json::Value>,
}

impl Response {
    /// Create a new response
    pub fn new(
        request: Request,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: request.url.clone(),
            status,
            headers,
            body,
            meta: request.meta.clone(),
            request,
            raw_api_response: None,
        }
    }

    /// Attach the raw Zyte API response
    pub fn with_raw_api_response(mut self, raw: serde_json::Value) -> Self {
        self.raw_api_response = Some(raw);
        self
    }

    /// The body decoded with the charset from `Content-Type`, else from a
    /// `<meta>` tag near the top of the document, else UTF-8. A byte order
    /// mark wins over both. Malformed sequences become U+FFFD.
    pub fn text(&self) -> Result<String> {
        let encoding = self.encoding();
        let (text, used, had_errors) = encoding.decode(&self.body);
        if had_errors {
            debug!(
                "Malformed {} in body of {}, replaced invalid bytes",
                used.name(),
                self.url
            );
        }
        Ok(text.into_owned())
    }

    /// Encoding declared for the body, UTF-8 when none is recognised
    pub fn encoding(&self) -> &'static Encoding {
        self.header("content-type")
            .and_then(charset_label)
            .or_else(|| {
                let head = &self.body[..self.body.len().min(1024)];
                charset_label(&String::from_utf8_lossy(head))
            })
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8)
    }

    /// Parse the response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::parse(ResponseParseError::JsonError(e.to_string())).with_url(self.url.as_str())
        })
    }

    /// Parse the body as an HTML document
    pub fn document(&self) -> Result<Document> {
        Ok(Document::parse(&self.text()?))
    }

    /// Shortcut for `document()?.css(query)?.getall()`
    pub fn css(&self, query: &str) -> Result<Vec<String>> {
        Ok(self.document()?.css(query)?.getall())
    }

    /// Run an extractor over the body
    pub fn extract(&self, extractor: &FieldExtractor) -> Result<Vec<DynamicItem>> {
        Ok(extractor.extract(&self.document()?))
    }

    /// Build a request for a link found in this response, resolved against
    /// the response URL. Keeps the callback and Zyte API meta of the
    /// request that produced this response.
    pub fn follow(&self, href: &str) -> Result<Request> {
        let url = self.url.join(href.trim())?;
        let mut request = Request::get(url.as_str())?;
        request.meta = self.request.meta.clone();
        request.callback = self.request.callback.clone();
        Ok(request)
    }

    /// Decoded screenshot bytes from the Zyte API response
    pub fn screenshot(&self) -> Option<Result<Vec<u8>>> {
        let encoded = self.raw_api_response.as_ref()?.get("screenshot")?.as_str()?;
        Some(BASE64.decode(encoded).map_err(|e| {
            Error::parse(ResponseParseError::DecodeError(format!(
                "Invalid screenshot encoding: {}",
                e
            )))
        }))
    }

    /// Whether this response came through the Zyte API
    pub fn is_api_response(&self) -> bool {
        self.raw_api_response.is_some()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add metadata to the response
    pub fn with_meta<K: Into<String>, V: Into<serde_json::Value>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Check if the response was successful (status code 200-299)
    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Check if the response is a redirect
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Get the redirect URL if this response is a redirect
    pub fn redirect_url(&self) -> Option<Result<Url>> {
        if !self.is_redirect() {
            return None;
        }

        self.header("location")
            .map(|location| self.url.join(location).map_err(Error::UrlParseError))
    }
}

/// Value of the first `charset=` parameter in `text`, which may be a
/// `Content-Type` value or the start of an HTML document
fn charset_label(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("charset=")? + "charset=".len();
    let label: String = lower[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| !matches!(c, '"' | '\'' | ';' | '>' | '/') && !c.is_whitespace())
        .collect();
    (!label.is_empty()).then_some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn html_response(url: &str, body: &str) -> Response {
        let request = Request::get(url).unwrap();
        Response::new(request, 200, HashMap::new(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_response_text() {
        let response = html_response("https://example.com", "Hello, world!");
        assert_eq!(response.text().unwrap(), "Hello, world!");

        // Undeclared and not UTF-8: replaced, not an error
        let request = Request::get("https://example.com").unwrap();
        let invalid = Response::new(request, 200, HashMap::new(), b"caf\xe9".to_vec());
        assert_eq!(invalid.text().unwrap(), "caf\u{fffd}");
    }

    #[test]
    fn test_response_text_uses_declared_charset() {
        let body = b"<html><body><p class=\"name\">caf\xe9</p></body></html>".to_vec();

        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/html; charset=ISO-8859-1".to_string(),
        );
        let request = Request::get("https://example.com").unwrap();
        let response = Response::new(request, 200, headers, body.clone());
        assert_eq!(response.encoding().name(), "windows-1252");
        assert_eq!(response.css("p.name::text").unwrap(), vec!["caf\u{e9}"]);

        let mut html = b"<html><head><meta charset=\"iso-8859-1\"></head>".to_vec();
        html.extend_from_slice(&body);
        let request = Request::get("https://example.com").unwrap();
        let response = Response::new(request, 200, HashMap::new(), html);
        assert_eq!(response.css("p.name::text").unwrap(), vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_charset_label() {
        assert_eq!(
            charset_label("text/html; charset=\"Shift_JIS\"").as_deref(),
            Some("shift_jis")
        );
        assert_eq!(
            charset_label(r#"<meta http-equiv="Content-Type" content="text/html; charset=koi8-r">"#)
                .as_deref(),
            Some("koi8-r")
        );
        assert_eq!(charset_label("text/html"), None);
    }

    #[test]
    fn test_response_json() {
        let response = html_response("https://example.com", r#"{"message": "Hello, world!"}"#);
        let json: serde_json::Value = response.json().unwrap();
        assert_eq!(json["message"], "Hello, world!");
    }

    #[test]
    fn test_response_css() {
        let response = html_response(
            "https://quotes.toscrape.com/",
            r#"<div class="quote"><span class="text">A</span></div>
               <div class="quote"><span class="text">B</span></div>"#,
        );
        assert_eq!(response.css("span.text::text").unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_response_follow_keeps_callback_and_meta() {
        let request = Request::get("https://quotes.toscrape.com/page/1/")
            .unwrap()
            .with_callback("parse_simple")
            .with_meta("zyte_api_automap", true);
        let response = Response::new(request, 200, HashMap::new(), Vec::new());

        let next = response.follow("/page/2/").unwrap();
        assert_eq!(next.url.as_str(), "https://quotes.toscrape.com/page/2/");
        assert_eq!(next.callback.as_deref(), Some("parse_simple"));
        assert_eq!(next.meta.get("zyte_api_automap"), Some(&json!(true)));
    }

    #[test]
    fn test_response_screenshot() {
        let response = html_response("https://example.com", "<html></html>");
        assert!(response.screenshot().is_none());
        assert!(!response.is_api_response());

        let response = response.with_raw_api_response(json!({
            "url": "https://example.com",
            "screenshot": BASE64.encode(b"\x89PNG"),
        }));
        assert_eq!(response.screenshot().unwrap().unwrap(), b"\x89PNG");
        assert!(response.is_api_response());
    }

    #[test]
    fn test_response_is_success() {
        let request = Request::get("https://example.com").unwrap();
        let response = Response::new(request.clone(), 200, HashMap::new(), Vec::new());
        assert!(response.is_success());

        let response = Response::new(request, 404, HashMap::new(), Vec::new());
        assert!(!response.is_success());
    }

    #[test]
    fn test_response_redirect_url() {
        let request = Request::get("https://example.com").unwrap();
        let mut headers = HashMap::new();
        headers.insert("Location".to_string(), "/new-page".to_string());

        let response = Response::new(request, 301, headers, Vec::new());

        assert!(response.is_redirect());
        let redirect_url = response.redirect_url().unwrap().unwrap();
        assert_eq!(redirect_url.as_str(), "https://example.com/new-page");
    }
}
