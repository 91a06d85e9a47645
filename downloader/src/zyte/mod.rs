//! Zyte API support: parameter resolution, the API client and a
//! downloader that routes each request to the API or to plain HTTP.

pub mod client;
pub mod params;

use std::time::Duration;

use log::debug;
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::Result;
use scrapy_lab_core::request::Request;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::zyte::ZyteMode;
use serde_json::{Map, Value};

pub use client::{RetryPolicy, ZyteApiClient, ZyteApiResponse, DEFAULT_API_URL};
pub use params::ParamSettings;

use crate::{Downloader, DownloaderConfig, HttpDownloader};

/// Configuration of the Zyte API addon
#[derive(Debug, Clone)]
pub struct ZyteApiConfig {
    pub api_key: String,

    pub api_url: String,

    /// Route requests without Zyte API meta through the API
    pub transparent_mode: bool,

    pub automap_params: Map<String, Value>,

    pub default_params: Map<String, Value>,

    pub retry: RetryPolicy,
}

impl ZyteApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            transparent_mode: true,
            automap_params: Map::new(),
            default_params: Map::new(),
            retry: RetryPolicy::default(),
        }
    }

    fn param_settings(&self) -> ParamSettings {
        ParamSettings {
            transparent_mode: self.transparent_mode,
            automap_params: self.automap_params.clone(),
            default_params: self.default_params.clone(),
        }
    }
}

/// Sends requests through the Zyte API when their meta (or transparent
/// mode) asks for it, and through [`HttpDownloader`] otherwise
pub struct ZyteApiDownloader {
    client: ZyteApiClient,
    http: HttpDownloader,
    params: ParamSettings,
}

impl ZyteApiDownloader {
    pub fn new(config: ZyteApiConfig, downloader_config: DownloaderConfig) -> Result<Self> {
        let client = ZyteApiClient::new(
            config.api_key.clone(),
            &config.api_url,
            Duration::from_secs(downloader_config.timeout),
            config.retry.clone(),
        )?;
        let http = HttpDownloader::new(downloader_config)?;

        Ok(Self {
            client,
            http,
            params: config.param_settings(),
        })
    }

    pub fn transparent_mode(&self) -> bool {
        self.params.transparent_mode
    }
}

#[async_trait]
impl Downloader for ZyteApiDownloader {
    async fn download(&self, request: Request) -> Result<Response> {
        let Some(params) = params::resolve(&request, &self.params)? else {
            debug!("Sending {} without Zyte API", request.url);
            return self.http.download(request).await;
        };

        debug!(
            "Sending {} through Zyte API ({} mode)",
            request.url,
            ZyteMode::from_meta(&request.meta)
        );

        let api_response = self.client.extract(&request.url, &params).await?;
        api_response.into_response(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapy_lab_core::zyte::{RequestDescriptor, ZyteParams};
    use scrapy_lab_core::Error;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(transparent_mode: bool) -> (MockServer, ZyteApiDownloader) {
        let server = MockServer::start().await;
        let config = ZyteApiConfig {
            api_url: format!("{}/v1/extract", server.uri()),
            transparent_mode,
            retry: RetryPolicy {
                enabled: false,
                ..RetryPolicy::default()
            },
            ..ZyteApiConfig::new("test-key")
        };
        let downloader = ZyteApiDownloader::new(config, DownloaderConfig::default()).unwrap();
        (server, downloader)
    }

    #[tokio::test]
    async fn test_manual_request_goes_through_api() {
        let (server, downloader) = setup(false).await;

        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .and(body_partial_json(json!({"browserHtml": true, "screenshot": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("{}/js/", server.uri()),
                "statusCode": 200,
                "browserHtml": "<div class=\"quote\">rendered</div>",
                "screenshot": "iVBORw0KGgo="
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = RequestDescriptor::manual(
            &format!("{}/js/", server.uri()),
            ZyteParams::browser().with_screenshot(),
        )
        .unwrap()
        .into_request();

        let response = downloader.download(request).await.unwrap();
        assert!(response.is_api_response());
        assert!(response.text().unwrap().contains("rendered"));
        assert!(response.screenshot().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_automap_off_uses_plain_http() {
        let (server, downloader) = setup(true).await;

        Mock::given(method("GET"))
            .and(path("/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain"))
            .expect(1)
            .mount(&server)
            .await;

        let request = RequestDescriptor::off(&format!("{}/plain", server.uri()))
            .unwrap()
            .into_request();

        let response = downloader.download(request).await.unwrap();
        assert!(!response.is_api_response());
        assert_eq!(response.text().unwrap(), "plain");
    }

    #[tokio::test]
    async fn test_transparent_mode_routes_unmarked_requests() {
        let (server, downloader) = setup(true).await;

        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .and(body_partial_json(json!({
                "httpResponseBody": true,
                "httpResponseHeaders": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://quotes.toscrape.com/",
                "statusCode": 200,
                "httpResponseBody": "PGh0bWw+PC9odG1sPg==",
                "httpResponseHeaders": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::get("https://quotes.toscrape.com/").unwrap();
        let response = downloader.download(request).await.unwrap();
        assert_eq!(response.text().unwrap(), "<html></html>");
    }

    #[tokio::test]
    async fn test_invalid_meta_is_reported() {
        let (_server, downloader) = setup(true).await;

        let request = Request::get("https://quotes.toscrape.com/")
            .unwrap()
            .with_meta("zyte_api_automap", "yes");

        let err = downloader.download(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
