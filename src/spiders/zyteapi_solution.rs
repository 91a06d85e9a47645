use std::collections::HashMap;

use log::{info, warn};
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::Result;
use scrapy_lab_core::request::Request;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::spider::{ParseOutput, Spider};
use scrapy_lab_core::zyte::{RequestDescriptor, ZyteParams};
use serde_json::{json, Value};

use super::modes::zyte_addon_settings;
use super::quotes::{base_url, quotes_on};
use crate::settings::Settings;

/// The traditional spider with one change: its requests ask the Zyte API
/// for browser-rendered HTML
pub struct ZyteApiSolutionSpider {
    base_url: String,
    start_urls: Vec<String>,
}

impl ZyteApiSolutionSpider {
    pub const NAME: &'static str = "zyteapi_solution";

    pub fn new(settings: &Settings) -> Self {
        let base_url = base_url(settings);
        Self {
            start_urls: vec![format!("{}/js/", base_url)],
            base_url,
        }
    }
}

#[async_trait]
impl Spider for ZyteApiSolutionSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allowed_domains(&self) -> Vec<String> {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .into_iter()
            .collect()
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        self.start_urls
            .iter()
            .map(|url| RequestDescriptor::manual(url, ZyteParams::browser()).map(|d| d.into_request()))
            .collect()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        info!("Response length: {}", response.text()?.len());

        let quotes = quotes_on(&response)?;
        info!("Quotes found: {}", quotes.len());

        if quotes.is_empty() {
            warn!("No quotes found - browserHtml might not be working");
        } else {
            info!("SUCCESS! JavaScript rendered with browserHtml!");
        }

        let mut output = ParseOutput::new();
        for quote in &quotes {
            output.add_record(quote.record(&[("method", json!("zyte_api_browser"))]));
        }

        Ok(output)
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiders::quotes::tests::{html_response, QUOTES_HTML};
    use scrapy_lab_core::zyte::{ZyteMode, ZYTE_API_META_KEY};

    #[test]
    fn test_start_requests_ask_for_browser_html() {
        let spider = ZyteApiSolutionSpider::new(&Settings::new());
        let requests: Vec<Request> = spider
            .start_requests()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.as_str(), "https://quotes.toscrape.com/js/");
        assert_eq!(ZyteMode::from_meta(&requests[0].meta), ZyteMode::Manual);
        assert_eq!(
            requests[0].meta.get(ZYTE_API_META_KEY),
            Some(&json!({"browserHtml": true}))
        );
        assert_eq!(spider.allowed_domains(), vec!["quotes.toscrape.com"]);

        let settings = Settings::new().with_overrides(&spider.settings());
        assert!(crate::config_adapters::zyte_api_enabled(&settings));
    }

    #[tokio::test]
    async fn test_parse() {
        let spider = ZyteApiSolutionSpider::new(&Settings::new());
        let response = html_response("https://quotes.toscrape.com/js/", QUOTES_HTML);

        let output = spider.parse(response).await.unwrap();
        assert_eq!(output.items.len(), 2);
        assert_eq!(output.items[1].get_str("author"), Some("J.K. Rowling"));
        assert_eq!(output.items[1].get_str("method"), Some("zyte_api_browser"));
    }
}
