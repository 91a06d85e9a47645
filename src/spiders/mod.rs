//! Spiders shipped with the project, looked up by name from the CLI.

pub mod modes;
pub mod quotes;
pub mod templates;
pub mod traditional;
pub mod zyteapi_solution;

use std::sync::Arc;

use scrapy_lab_core::error::Result;
use scrapy_lab_core::spider::Spider;

use crate::settings::Settings;

pub use modes::{AutomapSpider, ManualSpider, TransparentSpider};
pub use quotes::QuoteItem;
pub use templates::{JsSiteSpider, MixedSiteSpider, ProtectedSiteSpider, SimpleSiteSpider};
pub use traditional::TraditionalSpider;
pub use zyteapi_solution::ZyteApiSolutionSpider;

/// Every registered spider name with a one-line description
pub const SPIDER_NAMES: [(&str, &str); 9] = [
    (TraditionalSpider::NAME, "plain HTTP against the JavaScript page"),
    (ZyteApiSolutionSpider::NAME, "browser rendering through the Zyte API"),
    (TransparentSpider::NAME, "transparent mode, no per-request setup"),
    (AutomapSpider::NAME, "automap mode with selective browser rendering"),
    (ManualSpider::NAME, "manual mode with explicit API parameters"),
    (SimpleSiteSpider::NAME, "template for simple HTML sites"),
    (JsSiteSpider::NAME, "template for JavaScript-heavy sites"),
    (ProtectedSiteSpider::NAME, "template for sites with bot protection"),
    (MixedSiteSpider::NAME, "template for sites mixing both page kinds"),
];

/// Build the spider registered as `name`, or `None` if there is none.
///
/// Template spiders read their selectors from `settings` and fail on an
/// invalid one.
pub fn create_spider(name: &str, settings: &Settings) -> Result<Option<Arc<dyn Spider>>> {
    let spider: Arc<dyn Spider> = match name {
        TraditionalSpider::NAME => Arc::new(TraditionalSpider::new(settings)),
        ZyteApiSolutionSpider::NAME => Arc::new(ZyteApiSolutionSpider::new(settings)),
        TransparentSpider::NAME => Arc::new(TransparentSpider::new(settings)),
        AutomapSpider::NAME => Arc::new(AutomapSpider::new(settings)),
        ManualSpider::NAME => Arc::new(ManualSpider::new(settings)),
        SimpleSiteSpider::NAME => Arc::new(SimpleSiteSpider::new(settings)?),
        JsSiteSpider::NAME => Arc::new(JsSiteSpider::new(settings)?),
        ProtectedSiteSpider::NAME => Arc::new(ProtectedSiteSpider::new(settings)?),
        MixedSiteSpider::NAME => Arc::new(MixedSiteSpider::new(settings)?),
        _ => return Ok(None),
    };
    Ok(Some(spider))
}
