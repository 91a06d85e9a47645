//! Starter spiders for four kinds of sites: plain HTML, JavaScript
//! rendered, protected, and a mix of the first two.
//!
//! Each template reads its URLs and selectors from settings under a
//! `TEMPLATE_<KIND>_` prefix:
//!
//! | suffix | type | meaning |
//! |---|---|---|
//! | `START_URLS` | list of URLs | pages to start from |
//! | `ITEM_SELECTOR` | CSS | one match per record |
//! | `FIELDS` | `{name: CSS}` | replaces or adds field selectors |
//! | `NEXT_PAGE_SELECTOR` | CSS | pagination link, `""` disables |
//!
//! Defaults target quotes.toscrape.com (or `QUOTES_BASE_URL`).

use std::collections::HashMap;

use log::{debug, info, warn};
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::extract::FieldExtractor;
use scrapy_lab_core::item::DynamicItem;
use scrapy_lab_core::request::Request;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::spider::{ParseOutput, Spider};
use scrapy_lab_core::zyte::{RequestDescriptor, ZyteParams};
use serde_json::{json, Map, Value};

use super::modes::zyte_addon_settings;
use super::quotes::base_url;
use crate::settings::Settings;

struct TemplateDefaults {
    /// Paths joined to the base URL
    start_paths: &'static [&'static str],
    item_selector: &'static str,
    fields: &'static [(&'static str, &'static str)],
    next_page: Option<&'static str>,
}

/// Start URLs plus the extractor applied to every page
pub struct PageTemplate {
    pub start_urls: Vec<String>,
    pub extractor: FieldExtractor,
}

impl PageTemplate {
    fn from_settings(settings: &Settings, prefix: &str, defaults: &TemplateDefaults) -> Result<Self> {
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);
        let base = base_url(settings);

        let start_urls: Vec<String> = settings.get_or(
            &key("START_URLS"),
            defaults
                .start_paths
                .iter()
                .map(|path| format!("{}{}", base, path))
                .collect(),
        );

        let item_selector: String =
            settings.get_or(&key("ITEM_SELECTOR"), defaults.item_selector.to_string());

        let mut fields: Vec<(String, String)> = defaults
            .fields
            .iter()
            .map(|(name, selector)| (name.to_string(), selector.to_string()))
            .collect();
        let overrides: Map<String, Value> = settings.get_or(&key("FIELDS"), Map::new());
        for (name, selector) in overrides {
            let Value::String(selector) = selector else {
                return Err(Error::other(format!(
                    "{}: selector for {} must be a string",
                    key("FIELDS"),
                    name
                )));
            };
            match fields.iter_mut().find(|(existing, _)| *existing == name) {
                Some(field) => field.1 = selector,
                None => fields.push((name, selector)),
            }
        }

        let mut extractor = FieldExtractor::new(&item_selector)?.with_item_type(prefix.to_lowercase());
        for (name, selector) in &fields {
            extractor = extractor.field(name.clone(), selector)?;
        }

        let next_page: String = settings.get_or(
            &key("NEXT_PAGE_SELECTOR"),
            defaults.next_page.unwrap_or_default().to_string(),
        );
        if !next_page.trim().is_empty() {
            extractor = extractor.next_page(&next_page)?;
        }

        Ok(Self {
            start_urls,
            extractor,
        })
    }

    fn extract(&self, response: &Response) -> Result<(Vec<DynamicItem>, Option<String>)> {
        let document = response.document()?;
        let records = self.extractor.extract(&document);
        let next_page = self.extractor.next_page_link(&document);
        Ok((records, next_page))
    }
}

/// Append the same fields to every record
fn stamp(records: &mut [DynamicItem], fields: &[(&str, Value)]) {
    for record in records {
        for (name, value) in fields {
            record.set(*name, value.clone());
        }
    }
}

fn warn_if_empty(records: &[DynamicItem], template: &PageTemplate, response: &Response) {
    if records.is_empty() {
        warn!(
            "No items matched {:?} on {}; check the selector or try browserHtml",
            template.extractor.item_selector(),
            response.url
        );
    }
}

const SIMPLE_DEFAULTS: TemplateDefaults = TemplateDefaults {
    start_paths: &["/", "/page/2/"],
    item_selector: "div.quote",
    fields: &[
        ("title", "span.text::text"),
        ("price", ".price::text"),
        ("description", "small.author::text"),
        ("link", "a::attr(href)"),
        ("image", "img::attr(src)"),
    ],
    next_page: Some("li.next a::attr(href)"),
};

/// Template A: regular HTML pages through transparent mode, following
/// pagination
pub struct SimpleSiteSpider {
    template: PageTemplate,
}

impl SimpleSiteSpider {
    pub const NAME: &'static str = "my_simple_spider";

    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            template: PageTemplate::from_settings(settings, "TEMPLATE_SIMPLE", &SIMPLE_DEFAULTS)?,
        })
    }
}

#[async_trait]
impl Spider for SimpleSiteSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        self.template.start_urls.clone()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        let (mut records, next_page) = self.template.extract(&response)?;
        info!("Found {} items on {}", records.len(), response.url);
        warn_if_empty(&records, &self.template, &response);

        stamp(
            &mut records,
            &[
                ("scraped_from", json!(response.url.as_str())),
                ("scraped_with", json!("zyte_api")),
            ],
        );

        let mut output = ParseOutput::new();
        output.items = records;
        if let Some(href) = next_page {
            output.add_request(response.follow(&href)?);
        }
        Ok(output)
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(true)
    }
}

const JS_DEFAULTS: TemplateDefaults = TemplateDefaults {
    start_paths: &["/js/", "/js/page/2/"],
    item_selector: "div.quote",
    fields: &[
        ("title", "span.text::text"),
        ("content", "small.author::text"),
        ("data_attribute", "[data-id]::attr(data-id)"),
    ],
    next_page: None,
};

/// Template B: browser-rendered HTML plus a screenshot for every page
pub struct JsSiteSpider {
    template: PageTemplate,
}

impl JsSiteSpider {
    pub const NAME: &'static str = "my_js_spider";

    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            template: PageTemplate::from_settings(settings, "TEMPLATE_JS", &JS_DEFAULTS)?,
        })
    }
}

#[async_trait]
impl Spider for JsSiteSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        self.template.start_urls.clone()
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        let params = ZyteParams::browser().with_screenshot();
        self.template
            .start_urls
            .iter()
            .map(|url| RequestDescriptor::manual(url, params.clone()).map(|d| d.into_request()))
            .collect()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        match response.screenshot() {
            Some(Ok(png)) => debug!("Screenshot of {}: {} bytes", response.url, png.len()),
            Some(Err(e)) => warn!("Unreadable screenshot for {}: {}", response.url, e),
            None => debug!("No screenshot for {}", response.url),
        }

        let (mut records, _) = self.template.extract(&response)?;
        info!("Found {} JS-rendered items on {}", records.len(), response.url);
        warn_if_empty(&records, &self.template, &response);

        stamp(
            &mut records,
            &[
                ("scraped_from", json!(response.url.as_str())),
                ("scraped_with", json!("zyte_api_browser")),
                ("has_screenshot", json!(true)),
            ],
        );

        let mut output = ParseOutput::new();
        output.items = records;
        Ok(output)
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(false)
    }
}

const PROTECTED_DEFAULTS: TemplateDefaults = TemplateDefaults {
    start_paths: &["/js/"],
    item_selector: "div.quote",
    fields: &[
        ("title", "span.text::text"),
        ("content", "small.author::text"),
    ],
    next_page: None,
};

/// Template C: browser rendering from a US address with browser-like
/// headers, waiting for the content and scrolling before capture
pub struct ProtectedSiteSpider {
    template: PageTemplate,
    wait_selector: String,
}

impl ProtectedSiteSpider {
    pub const NAME: &'static str = "my_protected_spider";

    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            template: PageTemplate::from_settings(
                settings,
                "TEMPLATE_PROTECTED",
                &PROTECTED_DEFAULTS,
            )?,
            wait_selector: settings.get_or(
                "TEMPLATE_PROTECTED_WAIT_SELECTOR",
                "div.quote".to_string(),
            ),
        })
    }
}

#[async_trait]
impl Spider for ProtectedSiteSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        self.template.start_urls.clone()
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        let params = ZyteParams::protected(self.wait_selector.clone());
        self.template
            .start_urls
            .iter()
            .map(|url| RequestDescriptor::manual(url, params.clone()).map(|d| d.into_request()))
            .collect()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        let (mut records, _) = self.template.extract(&response)?;
        info!("Bypassed protection! Found {} items", records.len());
        warn_if_empty(&records, &self.template, &response);

        stamp(
            &mut records,
            &[
                ("scraped_from", json!(response.url.as_str())),
                ("scraped_with", json!("zyte_api_protected")),
                ("bypassed_protection", json!(true)),
            ],
        );

        let mut output = ParseOutput::new();
        output.items = records;
        Ok(output)
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(false)
    }
}

const MIXED_SIMPLE_DEFAULTS: TemplateDefaults = TemplateDefaults {
    start_paths: &["/", "/page/2/"],
    item_selector: "div.quote",
    fields: &[
        ("title", "span.text::text"),
        ("content", "small.author::text"),
    ],
    next_page: None,
};

const MIXED_JS_DEFAULTS: TemplateDefaults = TemplateDefaults {
    start_paths: &["/js/", "/js/page/2/"],
    item_selector: "div.quote",
    fields: &[("name", "span.text::text"), ("price", ".price::text")],
    next_page: None,
};

/// Template D: plain pages through automap with inferred parameters,
/// JavaScript pages through automap with browser rendering, each with its
/// own parse routine
pub struct MixedSiteSpider {
    simple: PageTemplate,
    javascript: PageTemplate,
}

impl MixedSiteSpider {
    pub const NAME: &'static str = "my_mixed_spider";

    pub const PARSE_SIMPLE: &'static str = "parse_simple";

    pub const PARSE_JAVASCRIPT: &'static str = "parse_javascript";

    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            simple: PageTemplate::from_settings(
                settings,
                "TEMPLATE_MIXED_SIMPLE",
                &MIXED_SIMPLE_DEFAULTS,
            )?,
            javascript: PageTemplate::from_settings(
                settings,
                "TEMPLATE_MIXED_JS",
                &MIXED_JS_DEFAULTS,
            )?,
        })
    }

    fn parse_page(
        &self,
        response: &Response,
        template: &PageTemplate,
        page_type: &str,
    ) -> Result<ParseOutput> {
        let (mut records, _) = template.extract(response)?;
        info!("Found {} {} items on {}", records.len(), page_type, response.url);
        warn_if_empty(&records, template, response);

        stamp(&mut records, &[("page_type", json!(page_type))]);

        let mut output = ParseOutput::new();
        output.items = records;
        Ok(output)
    }
}

#[async_trait]
impl Spider for MixedSiteSpider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_urls(&self) -> Vec<String> {
        self.simple
            .start_urls
            .iter()
            .chain(&self.javascript.start_urls)
            .cloned()
            .collect()
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        let simple = self.simple.start_urls.iter().map(|url| {
            RequestDescriptor::automap(url)
                .map(|d| d.into_request().with_callback(Self::PARSE_SIMPLE))
        });
        let javascript = self.javascript.start_urls.iter().map(|url| {
            RequestDescriptor::automap_with(url, ZyteParams::browser())
                .map(|d| d.into_request().with_callback(Self::PARSE_JAVASCRIPT))
        });
        simple.chain(javascript).collect()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        match response.request.callback.as_deref() {
            Some(Self::PARSE_JAVASCRIPT) => {
                self.parse_page(&response, &self.javascript, "javascript_rendered")
            }
            None | Some(Self::PARSE_SIMPLE) => {
                self.parse_page(&response, &self.simple, "simple_html")
            }
            Some(other) => Err(Error::other(format!(
                "{} has no parse routine named {}",
                Self::NAME,
                other
            ))),
        }
    }

    fn settings(&self) -> HashMap<String, Value> {
        zyte_addon_settings(false)
    }
}
