//! # scrapy_lab
//!
//! Scrapy-style spiders that fetch pages through the Zyte API.
//!
//! A request reaches the API in one of three ways:
//!
//! - **Transparent**: every request goes through the API with its default
//!   parameters, no per-request setup.
//! - **Automap**: the request carries `zyte_api_automap` metadata; the API
//!   infers parameters and the response looks like a plain HTTP response.
//! - **Manual**: the request carries explicit `zyte_api` parameters and the
//!   spider reads the raw API result.
//!
//! ## Components
//!
//! - **Core**: requests, responses, items, spiders, CSS extraction and the
//!   Zyte request helpers.
//! - **Downloader**: plain HTTP and the Zyte API client.
//! - **Middleware**: default headers, offsite filtering, robots.txt and
//!   download delay.
//! - **Pipeline**: item logging and JSON feed export.
//! - **Engine**: schedules requests and drives the crawl.
//! - **Settings**: `settings.py`/TOML/JSON loading plus `.env` support.
//!
//! ## Example
//!
//! ```rust,no_run
//! use scrapy_lab::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     env_logger::init();
//!
//!     let extractor = FieldExtractor::new("div.quote")?
//!         .field("text", "span.text::text")?
//!         .field("author", "small.author::text")?
//!         .next_page("li.next a::attr(href)")?;
//!     let spider = Arc::new(
//!         BasicSpider::new("quotes", vec!["https://quotes.toscrape.com/".to_string()])
//!             .with_extractor(extractor),
//!     );
//!
//!     let mut engine = Engine::new(spider)?;
//!     let stats = engine.run().await?;
//!     println!("{}", stats);
//!
//!     Ok(())
//! }
//! ```

pub use scrapy_lab_core as core;
pub use scrapy_lab_downloader as downloader;
pub use scrapy_lab_engine as engine;
pub use scrapy_lab_middleware as middleware;
pub use scrapy_lab_pipeline as pipeline;

pub mod config_adapters;
pub mod settings;
pub mod spiders;

/// Prelude module that re-exports commonly used types
pub mod prelude {
    pub use scrapy_lab_core::error::{Error, Result};
    pub use scrapy_lab_core::extract::FieldExtractor;
    pub use scrapy_lab_core::item::{DynamicItem, Item};
    pub use scrapy_lab_core::request::{Method, Request};
    pub use scrapy_lab_core::response::Response;
    pub use scrapy_lab_core::spider::{BasicSpider, ParseOutput, Spider};
    pub use scrapy_lab_core::zyte::{Action, RequestDescriptor, ZyteMode, ZyteParams};
    pub use scrapy_lab_downloader::{
        Downloader, DownloaderConfig, HttpDownloader, ZyteApiConfig, ZyteApiDownloader,
    };
    pub use scrapy_lab_engine::{Engine, EngineConfig, EngineStats};
    pub use scrapy_lab_middleware::{
        ChainedRequestMiddleware, ChainedResponseMiddleware, DefaultHeadersMiddleware,
        OffsiteMiddleware, RequestMiddleware, ResponseLoggerMiddleware, ResponseMiddleware,
    };
    pub use scrapy_lab_pipeline::{
        FeedFormat, JsonFilePipeline, JsonLinesPipeline, LogPipeline, Pipeline, PipelineType,
    };

    pub use crate::settings::{Settings, SettingsError, SettingsFormat};
}
