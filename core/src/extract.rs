//! Record extraction driven by a table of named CSS selectors.

use serde_json::Value;

use crate::error::Result;
use crate::item::DynamicItem;
use crate::selector::{CssQuery, Document, Selected};

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    query: CssQuery,
    all: bool,
}

/// Turns every match of an item selector into one [`DynamicItem`].
///
/// Field selectors run relative to the item match. A field that matches
/// nothing is recorded as `null` (or `[]` for list fields) so one bad
/// selector never drops the record. Selector syntax errors surface while
/// the extractor is being built.
///
/// ```
/// use scrapy_lab_core::extract::FieldExtractor;
/// use scrapy_lab_core::selector::Document;
///
/// let extractor = FieldExtractor::new("div.quote")?
///     .field("text", "span.text::text")?
///     .field("author", "small.author::text")?;
///
/// let doc = Document::parse(r#"<div class="quote"><span class="text">Hi</span></div>"#);
/// let records = extractor.extract(&doc);
/// assert_eq!(records.len(), 1);
/// assert!(records[0].is_absent("author"));
/// # Ok::<(), scrapy_lab_core::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    item: CssQuery,
    item_type: String,
    fields: Vec<FieldRule>,
    constants: Vec<(String, Value)>,
    next_page: Option<CssQuery>,
}

impl FieldExtractor {
    /// Create an extractor for blocks matching `item_selector`
    pub fn new(item_selector: &str) -> Result<Self> {
        Ok(Self {
            item: CssQuery::parse(item_selector)?,
            item_type: "record".to_string(),
            fields: Vec::new(),
            constants: Vec::new(),
            next_page: None,
        })
    }

    /// Name recorded as the item type of extracted records
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    /// A field holding the first match, or `null`
    pub fn field(mut self, name: impl Into<String>, selector: &str) -> Result<Self> {
        self.fields.push(FieldRule {
            name: name.into(),
            query: CssQuery::parse(selector)?,
            all: false,
        });
        Ok(self)
    }

    /// A field holding every match in order, possibly empty
    pub fn list_field(mut self, name: impl Into<String>, selector: &str) -> Result<Self> {
        self.fields.push(FieldRule {
            name: name.into(),
            query: CssQuery::parse(selector)?,
            all: true,
        });
        Ok(self)
    }

    /// A value attached unchanged to every record
    pub fn constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.push((name.into(), value.into()));
        self
    }

    /// Selector for the link to the next page
    pub fn next_page(mut self, selector: &str) -> Result<Self> {
        self.next_page = Some(CssQuery::parse(selector)?);
        Ok(self)
    }

    pub fn item_selector(&self) -> &str {
        self.item.as_str()
    }

    /// Field names in output order, constants last
    pub fn field_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|rule| rule.name.as_str())
            .chain(self.constants.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    /// Extract one record per item match
    pub fn extract(&self, document: &Document) -> Vec<DynamicItem> {
        document
            .select(&self.item)
            .iter()
            .map(|block| self.record(block))
            .collect()
    }

    fn record(&self, block: &Selected<'_>) -> DynamicItem {
        let mut record = DynamicItem::new(self.item_type.clone());

        for rule in &self.fields {
            let matches = block.select(&rule.query);
            let value = if rule.all {
                Value::from(matches.getall())
            } else {
                matches.get().map_or(Value::Null, Value::from)
            };
            record.set(rule.name.clone(), value);
        }

        for (name, value) in &self.constants {
            record.set(name.clone(), value.clone());
        }

        record
    }

    /// The next-page link as written in the document, if any
    pub fn next_page_link(&self, document: &Document) -> Option<String> {
        let query = self.next_page.as_ref()?;
        document
            .select(query)
            .get()
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty())
    }
}
