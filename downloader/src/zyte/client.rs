//! Minimal client for the Zyte API extract endpoint.

use std::collections::HashMap;
use std::time::Duration;

use backoff::future::retry_notify;
use backoff::ExponentialBackoffBuilder;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, warn};
use scrapy_lab_core::error::{Error, ResponseParseError, Result};
use scrapy_lab_core::request::Request;
use scrapy_lab_core::response::Response;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::network_error;

pub const DEFAULT_API_URL: &str = "https://api.zyte.com/v1/extract";

/// Retry policy for temporary API errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,

    /// First wait between attempts, doubled after each one
    pub initial_interval: Duration,

    /// Give up once this much time has passed since the first attempt
    pub max_elapsed_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

/// RFC 7807 problem details returned on API errors
#[derive(Debug, Default, Deserialize)]
struct Problem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Successful extract response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZyteApiResponse {
    pub url: String,

    #[serde(default)]
    pub status_code: Option<u16>,

    /// Base64 encoded body
    #[serde(default)]
    pub http_response_body: Option<String>,

    #[serde(default)]
    pub http_response_headers: Option<Vec<HeaderEntry>>,

    #[serde(default)]
    pub browser_html: Option<String>,

    /// Base64 encoded PNG
    #[serde(default)]
    pub screenshot: Option<String>,

    /// The whole JSON document as received
    #[serde(skip)]
    pub raw: Value,
}

impl ZyteApiResponse {
    fn from_raw(raw: Value) -> Result<Self> {
        let mut response: ZyteApiResponse = serde_json::from_value(raw.clone())
            .map_err(|e| Error::parse(ResponseParseError::JsonError(e.to_string())))?;
        response.raw = raw;
        Ok(response)
    }

    /// Convert into the crawl response for `request`.
    ///
    /// The body is the browser HTML when present, otherwise the decoded
    /// HTTP body.
    pub fn into_response(self, request: Request) -> Result<Response> {
        let mut headers: HashMap<String, String> = self
            .http_response_headers
            .unwrap_or_default()
            .into_iter()
            .map(|header| (header.name.to_ascii_lowercase(), header.value))
            .collect();

        let body = if let Some(html) = self.browser_html {
            headers.insert(
                "content-type".to_string(),
                "text/html; charset=utf-8".to_string(),
            );
            html.into_bytes()
        } else if let Some(encoded) = self.http_response_body {
            BASE64.decode(encoded).map_err(|e| {
                Error::parse(ResponseParseError::DecodeError(format!(
                    "Invalid httpResponseBody encoding: {}",
                    e
                )))
                .with_url(request.url.as_str())
            })?
        } else {
            Vec::new()
        };

        let status = self.status_code.unwrap_or(200);
        let final_url = Url::parse(&self.url).unwrap_or_else(|_| request.url.clone());

        let mut response = Response::new(request, status, headers, body).with_raw_api_response(self.raw);
        response.url = final_url;
        Ok(response)
    }
}

/// Zyte API client authenticating with the API key as basic-auth user
pub struct ZyteApiClient {
    client: reqwest::Client,
    api_key: String,
    api_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ZyteApiClient {
    pub fn new(
        api_key: impl Into<String>,
        api_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::other(format!("Failed to create Zyte API client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            api_url: Url::parse(api_url)?,
            timeout,
            retry,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Fetch `url` with the given parameters, retrying temporary failures
    pub async fn extract(&self, url: &Url, params: &Map<String, Value>) -> Result<ZyteApiResponse> {
        let mut body = Map::new();
        body.insert("url".to_string(), Value::from(url.as_str()));
        for (key, value) in params {
            body.insert(key.clone(), value.clone());
        }
        let body = Value::Object(body);

        debug!("Zyte API request for {}: {}", url, body);

        if !self.retry.enabled {
            return self.extract_once(&body).await.map_err(|e| e.with_url(url.as_str()));
        }

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_elapsed_time(Some(self.retry.max_elapsed_time))
            .build();

        let body = &body;
        retry_notify(
            policy,
            || async move {
                self.extract_once(body).await.map_err(|e| {
                    if e.is_retryable() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            },
            |err: Error, wait: Duration| {
                warn!("Retrying Zyte API request for {} in {:?}: {}", url, wait, err);
            },
        )
        .await
        .map_err(|e| e.with_url(url.as_str()))
    }

    async fn extract_once(&self, body: &Value) -> Result<ZyteApiResponse> {
        let resp = self
            .client
            .post(self.api_url.clone())
            .basic_auth(&self.api_key, Some(""))
            .json(body)
            .send()
            .await
            .map_err(|e| network_error(e, self.timeout).with_component("zyte_api"))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| network_error(e, self.timeout).with_component("zyte_api"))?;

        if !status.is_success() {
            let problem: Problem = serde_json::from_slice(&bytes).unwrap_or_default();
            let title = problem
                .title
                .or(problem.kind)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            let detail = problem
                .detail
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(Error::zyte_api(status.as_u16(), title, detail).with_component("zyte_api"));
        }

        let raw: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::parse(ResponseParseError::JsonError(e.to_string())))?;
        ZyteApiResponse::from_raw(raw)
    }
}
