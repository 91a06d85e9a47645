use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trait for items scraped by spiders
pub trait Item: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    /// Get the item type name
    fn item_type(&self) -> &'static str;

    /// Convert the item to a field map
    fn to_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::item("Item is not an object")),
        }
    }

    /// Convert the item to JSON
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerdeError(e.to_string()))
    }

    /// Convert the item to a `DynamicItem`
    fn to_dynamic(&self) -> Result<DynamicItem> {
        Ok(DynamicItem {
            item_type_name: self.item_type().to_string(),
            fields: self.to_map()?,
        })
    }
}

/// A record of named fields in insertion order.
///
/// Absent values are stored as `null` so every record of one extraction
/// pass carries the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicItem {
    /// The type of the item, not exported
    #[serde(skip)]
    pub item_type_name: String,

    /// The fields of the item
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl DynamicItem {
    /// Create a new dynamic item
    pub fn new<S: Into<String>>(item_type_name: S) -> Self {
        Self {
            item_type_name: item_type_name.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Set a field value
    pub fn set<K: Into<String>, V: Into<serde_json::Value>>(
        &mut self,
        key: K,
        value: V,
    ) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Get a field as a string, `None` when absent or not a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(serde_json::Value::as_str)
    }

    /// Check if a field exists (it may still hold `null`)
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Whether a field is missing or `null`
    pub fn is_absent(&self, key: &str) -> bool {
        self.fields.get(key).map_or(true, serde_json::Value::is_null)
    }

    /// Field names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl Item for DynamicItem {
    fn item_type(&self) -> &'static str {
        "dynamic_item"
    }

    fn to_dynamic(&self) -> Result<DynamicItem> {
        Ok(self.clone())
    }
}
