//! One spider per way of routing requests through the Zyte API.

use std::collections::HashMap;

use log::info;
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::Result;
use scrapy_lab_core::request::Request;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::spider::{ParseOutput, Spider};
use scrapy_lab_core::zyte::{Action, RequestDescriptor, ZyteParams};
use serde_json::{json, Value};

use super::quotes::{base_url, quotes_on};
use crate::settings::Settings;

/// Where the automap spider sends its plain HTTP request
pub const DEFAULT_AUTOMAP_BYPASS_URL: &str = "https://httpbin.org/json";

/// Custom settings enabling the Zyte API addon
pub fn zyte_addon_settings(transparent_mode: bool) -> HashMap<String, Value> {
    let mut settings = HashMap::new();
    settings.insert(
        "ADDONS".to_string(),
        json!({"scrapy_zyte_api.Addon": 500}),
    );
    if !transparent_mode {
        settings.insert("ZYTE_API_TRANSPARENT_MODE".to_string(), json!(false));
    }
    settings
}

async fn parse_quotes(response: Response, mode: &str) -> Result<ParseOutput> {
    let quotes = quotes_on(&response)?;
    info!("[{}] {} quotes on {}", mode, quotes.len(), response.url);

    let mut output = ParseOutput::new();
    for quote in &quotes {
        output.add_record(quote.record(&[("mode", json!(mode))]));
    }
    Ok(output)
}

/// Every request goes through the API without any per-request choice
pub struct TransparentSpider {
    start_urls: Vec<String>,
}

impl TransparentSpider {
    pub const NAME: &'static str = "transparent";

    pub fn new(settings: &Settings) -> Self {
        Self {
            start_urls: vec![format!("{}/js/", base_url(settings))],
        }
    }
}

#[async_trait]
impl Spider for TransparentSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        parse_quotes(response, "transparent").await
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(true)
    }
}

/// Chooses per request: inferred parameters, browser rendering, or no API
pub struct AutomapSpider {
    base_url: String,
    bypass_url: String,
}

impl AutomapSpider {
    pub const NAME: &'static str = "automap";

    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: base_url(settings),
            bypass_url: settings.get_or(
                "AUTOMAP_BYPASS_URL",
                DEFAULT_AUTOMAP_BYPASS_URL.to_string(),
            ),
        }
    }

    fn descriptors(&self) -> Result<Vec<RequestDescriptor>> {
        Ok(vec![
            RequestDescriptor::automap(&format!("{}/", self.base_url))?,
            RequestDescriptor::automap_with(
                &format!("{}/js/", self.base_url),
                ZyteParams::browser(),
            )?,
            RequestDescriptor::off(&self.bypass_url)?,
        ])
    }
}

#[async_trait]
impl Spider for AutomapSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        vec![
            format!("{}/", self.base_url),
            format!("{}/js/", self.base_url),
            self.bypass_url.clone(),
        ]
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        match self.descriptors() {
            Ok(descriptors) => descriptors
                .into_iter()
                .map(|d| Ok(d.into_request().with_callback("parse")))
                .collect(),
            Err(e) => vec![Err(e)],
        }
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        parse_quotes(response, "automap").await
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(false)
    }
}

/// Spells out every API parameter, including browser actions
pub struct ManualSpider {
    base_url: String,
}

impl ManualSpider {
    pub const NAME: &'static str = "manual";

    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: base_url(settings),
        }
    }

    fn descriptors(&self) -> Result<Vec<RequestDescriptor>> {
        Ok(vec![
            RequestDescriptor::manual(&format!("{}/", self.base_url), ZyteParams::http())?,
            RequestDescriptor::manual(
                &format!("{}/js/", self.base_url),
                ZyteParams::browser()
                    .with_screenshot()
                    .with_action(Action::wait_for_selector("div.quote", 10)),
            )?,
        ])
    }
}

#[async_trait]
impl Spider for ManualSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        vec![
            format!("{}/", self.base_url),
            format!("{}/js/", self.base_url),
        ]
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        match self.descriptors() {
            Ok(descriptors) => descriptors
                .into_iter()
                .map(|d| Ok(d.into_request().with_callback("parse")))
                .collect(),
            Err(e) => vec![Err(e)],
        }
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        parse_quotes(response, "manual").await
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_adapters::zyte_api_config_from_settings;
    use crate::spiders::quotes::tests::{html_response, QUOTES_HTML};
    use scrapy_lab_core::zyte::{ZyteMode, ZYTE_API_AUTOMAP_META_KEY, ZYTE_API_META_KEY};

    fn requests(spider: &dyn Spider) -> Vec<Request> {
        spider
            .start_requests()
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_transparent_requests_carry_no_meta() {
        let spider = TransparentSpider::new(&Settings::new());
        let requests = requests(&spider);

        assert_eq!(requests.len(), 1);
        assert!(requests[0].meta.is_empty());
    }

    #[test]
    fn test_transparent_spider_routes_everything_through_the_api() {
        let spider = TransparentSpider::new(&Settings::new());

        // Project settings as shipped, addon not enabled there
        let mut project = Settings::new();
        project.set("BOT_NAME", "scrapy_lab").unwrap();
        project.set("ZYTE_API_KEY", "test-key").unwrap();
        let settings = project.with_overrides(&spider.settings());

        let config = zyte_api_config_from_settings(&settings).unwrap().unwrap();
        assert!(config.transparent_mode);
    }

    #[test]
    fn test_automap_requests() {
        let spider = AutomapSpider::new(&Settings::new());
        let requests = requests(&spider);

        let modes: Vec<ZyteMode> = requests
            .iter()
            .map(|r| ZyteMode::from_meta(&r.meta))
            .collect();
        assert_eq!(modes, vec![ZyteMode::Automap, ZyteMode::Automap, ZyteMode::Off]);

        assert_eq!(requests[0].meta.get(ZYTE_API_AUTOMAP_META_KEY), Some(&json!(true)));
        assert_eq!(
            requests[1].meta.get(ZYTE_API_AUTOMAP_META_KEY),
            Some(&json!({"browserHtml": true}))
        );
        assert_eq!(requests[2].url.as_str(), DEFAULT_AUTOMAP_BYPASS_URL);
        assert!(requests.iter().all(|r| !r.meta.contains_key(ZYTE_API_META_KEY)));

        let settings = spider.settings();
        assert_eq!(settings.get("ZYTE_API_TRANSPARENT_MODE"), Some(&json!(false)));
    }

    #[test]
    fn test_manual_requests() {
        let spider = ManualSpider::new(&Settings::new());
        let requests = requests(&spider);

        assert_eq!(
            requests[0].meta.get(ZYTE_API_META_KEY),
            Some(&json!({"httpResponseBody": true, "httpResponseHeaders": true}))
        );
        assert_eq!(
            requests[1].meta.get(ZYTE_API_META_KEY),
            Some(&json!({
                "browserHtml": true,
                "screenshot": true,
                "actions": [{"action": "waitForSelector", "selector": "div.quote", "timeout": 10}]
            }))
        );
        assert!(requests
            .iter()
            .all(|r| !r.meta.contains_key(ZYTE_API_AUTOMAP_META_KEY)));
    }

    #[tokio::test]
    async fn test_mode_field() {
        let spider = ManualSpider::new(&Settings::new());
        let output = spider
            .parse(html_response("https://quotes.toscrape.com/", QUOTES_HTML))
            .await
            .unwrap();

        assert_eq!(output.items.len(), 2);
        assert!(output.items.iter().all(|i| i.get_str("mode") == Some("manual")));
    }
}
