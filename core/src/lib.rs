pub mod error;
pub mod extract;
pub mod item;
pub mod request;
pub mod response;
pub mod selector;
pub mod spider;
pub mod zyte;

pub use error::{Error, ErrorContext, HttpError, NetworkError, ResponseParseError, Result};
pub use extract::FieldExtractor;
pub use item::{DynamicItem, Item};
pub use request::{Method, Request};
pub use response::Response;
pub use selector::{CssQuery, Document, Selected, SelectorList};
pub use spider::{BasicSpider, ParseOutput, Spider};
pub use zyte::{Action, RequestDescriptor, Strategy, ZyteMode, ZyteParams};

/// Re-export commonly used crates
pub use async_trait::async_trait;
pub use serde;
pub use serde_json;
pub use url;
