use log::{info, warn};
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::Result;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::spider::{ParseOutput, Spider};
use serde_json::json;

use super::quotes::{base_url, quotes_on};
use crate::settings::Settings;

/// Fetches the JavaScript version of quotes.toscrape.com with plain HTTP.
/// The quotes are rendered client side, so this usually finds nothing.
pub struct TraditionalSpider {
    start_urls: Vec<String>,
}

impl TraditionalSpider {
    pub const NAME: &'static str = "traditional";

    pub fn new(settings: &Settings) -> Self {
        Self {
            start_urls: vec![format!("{}/js/", base_url(settings))],
        }
    }
}

#[async_trait]
impl Spider for TraditionalSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        info!("Response length: {}", response.text()?.len());

        let quotes = quotes_on(&response)?;
        info!("Quotes found: {}", quotes.len());

        if quotes.is_empty() {
            warn!("NO QUOTES FOUND - Page might be JavaScript-rendered!");
            warn!("Or we might be getting blocked...");
        }

        let success = !quotes.is_empty();
        let mut output = ParseOutput::new();
        for quote in &quotes {
            output.add_record(quote.record(&[
                ("method", json!("traditional_scrapy")),
                ("success", json!(success)),
            ]));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiders::quotes::tests::{html_response, QUOTES_HTML};

    #[tokio::test]
    async fn test_parse_rendered_page() {
        let spider = TraditionalSpider::new(&Settings::new());
        assert_eq!(spider.start_urls(), vec!["https://quotes.toscrape.com/js/"]);

        let response = html_response("https://quotes.toscrape.com/js/", QUOTES_HTML);
        let output = spider.parse(response).await.unwrap();

        assert_eq!(output.items.len(), 2);
        assert_eq!(output.items[0].get_str("method"), Some("traditional_scrapy"));
        assert_eq!(output.items[0].get("success"), Some(&json!(true)));
        assert!(output.requests.is_empty());
    }

    #[tokio::test]
    async fn test_parse_unrendered_page() {
        let spider = TraditionalSpider::new(&Settings::new());
        let html = r#"<html><body><script src="/static/jquery.js"></script></body></html>"#;

        let output = spider
            .parse(html_response("https://quotes.toscrape.com/js/", html))
            .await
            .unwrap();
        assert!(output.is_empty());
    }
}
