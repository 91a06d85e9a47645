use std::collections::HashMap;

use log::{info, warn};

use crate::async_trait;
use crate::error::Result;
use crate::extract::FieldExtractor;
use crate::item::{DynamicItem, Item};
use crate::request::Request;
use crate::response::Response;

/// Trait for spiders that crawl websites
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// Get the name of the spider
    fn name(&self) -> &str;

    /// Get the allowed domains for this spider
    fn allowed_domains(&self) -> Vec<String> {
        Vec::new()
    }

    /// Get the start URLs for this spider
    fn start_urls(&self) -> Vec<String>;

    /// Convert start URLs to requests
    fn start_requests(&self) -> Vec<Result<Request>> {
        self.start_urls().into_iter().map(Request::get).collect()
    }

    /// Process a response and return items and/or requests.
    ///
    /// `response.request.callback` names the routine the request was
    /// created for; spiders with several routines dispatch on it.
    async fn parse(&self, response: Response) -> Result<ParseOutput>;

    /// Called when the spider is closed
    async fn closed(&self) -> Result<()> {
        Ok(())
    }

    /// Custom settings for this spider, applied over the project settings
    fn settings(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }
}

/// Output from parsing a response
#[derive(Debug, Default)]
pub struct ParseOutput {
    /// Items extracted from the response
    pub items: Vec<DynamicItem>,

    /// Requests to follow
    pub requests: Vec<Request>,
}

impl ParseOutput {
    /// Create a new empty parse output
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed item to the output
    pub fn add_item<I: Item>(&mut self, item: I) -> Result<&mut Self> {
        self.items.push(item.to_dynamic()?);
        Ok(self)
    }

    /// Add an already dynamic record to the output
    pub fn add_record(&mut self, record: DynamicItem) -> &mut Self {
        self.items.push(record);
        self
    }

    /// Add a request to the output
    pub fn add_request(&mut self, request: Request) -> &mut Self {
        self.requests.push(request);
        self
    }

    /// Create a parse output with a single request
    pub fn request(request: Request) -> Self {
        let mut output = Self::new();
        output.add_request(request);
        output
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.requests.is_empty()
    }
}

/// A spider driven entirely by configuration: start requests plus an
/// optional [`FieldExtractor`] applied to every response.
pub struct BasicSpider {
    /// The name of the spider
    name: String,

    /// The allowed domains for this spider
    allowed_domains: Vec<String>,

    /// The start URLs for this spider
    start_urls: Vec<String>,

    /// Prebuilt start requests, used instead of `start_urls` when set
    start_requests: Vec<Request>,

    extractor: Option<FieldExtractor>,

    /// Custom settings for this spider
    settings: HashMap<String, serde_json::Value>,
}

impl BasicSpider {
    /// Create a new basic spider
    pub fn new<S: Into<String>>(name: S, start_urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            allowed_domains: Vec::new(),
            start_urls,
            start_requests: Vec::new(),
            extractor: None,
            settings: HashMap::new(),
        }
    }

    /// Set the allowed domains for this spider
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains;
        self
    }

    /// Start from these requests instead of plain GETs of the start URLs
    pub fn with_start_requests(mut self, requests: Vec<Request>) -> Self {
        self.start_requests = requests;
        self
    }

    /// Extract records from every response with `extractor`, following
    /// its next-page link when there is one
    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set a custom setting for this spider
    pub fn with_setting<K: Into<String>, V: Into<serde_json::Value>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Spider for BasicSpider {
    fn name(&self) -> &str {
        &self.name
    }

    fn allowed_domains(&self) -> Vec<String> {
        self.allowed_domains.clone()
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    fn start_requests(&self) -> Vec<Result<Request>> {
        if self.start_requests.is_empty() {
            self.start_urls().into_iter().map(Request::get).collect()
        } else {
            self.start_requests.iter().cloned().map(Ok).collect()
        }
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        let mut output = ParseOutput::new();
        let Some(extractor) = &self.extractor else {
            return Ok(output);
        };

        let document = response.document()?;
        let records = extractor.extract(&document);
        info!("Found {} items on {}", records.len(), response.url);
        if records.is_empty() {
            warn!(
                "No items matched {:?} on {}",
                extractor.item_selector(),
                response.url
            );
        }
        output.items = records;

        if let Some(href) = extractor.next_page_link(&document) {
            output.add_request(response.follow(&href)?);
        }

        Ok(output)
    }

    fn settings(&self) -> HashMap<String, serde_json::Value> {
        self.settings.clone()
    }
}
