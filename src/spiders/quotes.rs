//! Quote extraction shared by the tutorial spiders.

use scrapy_lab_core::error::Result;
use scrapy_lab_core::item::{DynamicItem, Item};
use scrapy_lab_core::response::Response;
use scrapy_lab_core::selector::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::Settings;

/// Site the tutorial spiders crawl unless `QUOTES_BASE_URL` says otherwise
pub const DEFAULT_QUOTES_BASE_URL: &str = "https://quotes.toscrape.com";

/// A quote from quotes.toscrape.com
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub text: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub url: Option<String>,
}

impl Item for QuoteItem {
    fn item_type(&self) -> &'static str {
        "quote"
    }
}

impl QuoteItem {
    /// The `text` and `author` fields followed by `extra`, in that order
    pub fn record(&self, extra: &[(&str, Value)]) -> DynamicItem {
        let mut record = DynamicItem::new(self.item_type());
        record
            .set("text", self.text.clone())
            .set("author", self.author.clone());
        for (name, value) in extra {
            record.set(*name, value.clone());
        }
        record
    }
}

/// Every `div.quote` block of the response
pub fn quotes_on(response: &Response) -> Result<Vec<QuoteItem>> {
    let document = response.document()?;
    quotes_in(&document, response.url.as_str())
}

fn quotes_in(document: &Document, url: &str) -> Result<Vec<QuoteItem>> {
    let blocks = document.css("div.quote")?;

    let mut quotes = Vec::with_capacity(blocks.len());
    for block in blocks.iter() {
        quotes.push(QuoteItem {
            text: block.css("span.text::text")?.get(),
            author: block.css("small.author::text")?.get(),
            tags: block.css("div.tags a.tag::text")?.getall(),
            url: Some(url.to_string()),
        });
    }

    Ok(quotes)
}

/// `QUOTES_BASE_URL` without a trailing slash
pub fn base_url(settings: &Settings) -> String {
    let base: String = settings.get_or("QUOTES_BASE_URL", DEFAULT_QUOTES_BASE_URL.to_string());
    base.trim_end_matches('/').to_string()
}
