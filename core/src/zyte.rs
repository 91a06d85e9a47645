//! Zyte API request configuration.
//!
//! A [`RequestDescriptor`] pairs a URL with one of four [`ZyteMode`]s and
//! the Zyte API options that mode uses. Converting it into a [`Request`]
//! stores the options under the meta key the downloader looks for:
//!
//! | mode        | meta                                   |
//! |-------------|----------------------------------------|
//! | Transparent | none                                   |
//! | Automap     | `zyte_api_automap: true` or `{options}` |
//! | Manual      | `zyte_api: {options}`                  |
//! | Off         | `zyte_api_automap: false`              |

use std::collections::{BTreeMap, HashMap};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{Error, Result};
use crate::request::Request;

/// Meta key holding manually specified Zyte API parameters
pub const ZYTE_API_META_KEY: &str = "zyte_api";

/// Meta key holding the automap switch or automap parameter overrides
pub const ZYTE_API_AUTOMAP_META_KEY: &str = "zyte_api_automap";

/// Parameters that make the API return something
pub const OUTPUT_PARAMS: &[&str] = &[
    "httpResponseBody",
    "browserHtml",
    "screenshot",
    "product",
    "productList",
    "productNavigation",
    "article",
    "articleList",
    "articleNavigation",
    "jobPosting",
    "serp",
];

/// How a request uses the Zyte API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZyteMode {
    /// Sent through the API with inferred parameters, no per-request choice
    Transparent,
    /// Per-request opt-in with inferred parameters and optional overrides
    Automap,
    /// Per-request explicit parameters
    Manual,
    /// Bypass the API
    Off,
}

impl ZyteMode {
    /// Work out which mode a request was configured with from its meta
    pub fn from_meta(meta: &HashMap<String, Value>) -> Self {
        if meta.contains_key(ZYTE_API_META_KEY) {
            return ZyteMode::Manual;
        }
        match meta.get(ZYTE_API_AUTOMAP_META_KEY) {
            Some(Value::Bool(false)) => ZyteMode::Off,
            Some(_) => ZyteMode::Automap,
            None => ZyteMode::Transparent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZyteMode::Transparent => "transparent",
            ZyteMode::Automap => "automap",
            ZyteMode::Manual => "manual",
            ZyteMode::Off => "off",
        }
    }
}

impl std::fmt::Display for ZyteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A browser action run by the API before the page is captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// Wait until a CSS selector matches, up to `timeout` seconds
    WaitForSelector { selector: String, timeout: u32 },
    /// Wait a fixed number of seconds
    WaitForTimeout { timeout: u32 },
    /// Scroll to an `[x, y]` coordinate
    Scroll { coordinate: [i64; 2] },
    /// Scroll to the bottom of the page
    ScrollBottom,
    /// Click the first element matching a selector
    Click { selector: String },
    /// Type text into the first element matching a selector
    Type { selector: String, text: String },
}

impl Action {
    pub fn wait_for_selector(selector: impl Into<String>, timeout: u32) -> Self {
        Action::WaitForSelector {
            selector: selector.into(),
            timeout,
        }
    }

    pub fn scroll(x: i64, y: i64) -> Self {
        Action::Scroll { coordinate: [x, y] }
    }
}

/// Typed Zyte API parameters. Unset fields are left out of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZyteParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response_body: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response_headers: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_html: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<bool>,

    /// ISO 3166-1 alpha-2 country the request should originate from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,

    /// Any other API parameter, passed through as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ZyteParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw HTTP body plus headers, the headers being needed to decode the body
    pub fn http() -> Self {
        Self {
            http_response_body: Some(true),
            http_response_headers: Some(true),
            ..Self::default()
        }
    }

    /// Browser-rendered HTML
    pub fn browser() -> Self {
        Self {
            browser_html: Some(true),
            ..Self::default()
        }
    }

    /// Browser rendering tuned for sites that block plain scrapers: US
    /// origin, browser-like headers, wait for `content_selector` then
    /// scroll to trigger lazy loading
    pub fn protected(content_selector: impl Into<String>) -> Self {
        Self::browser()
            .with_geolocation("US")
            .with_request_header("Accept-Language", "en-US,en;q=0.9")
            .with_request_header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .with_action(Action::wait_for_selector(content_selector, 10))
            .with_action(Action::scroll(0, 1000))
    }

    pub fn with_screenshot(mut self) -> Self {
        self.screenshot = Some(true);
        self
    }

    pub fn with_geolocation(mut self, country: impl Into<String>) -> Self {
        self.geolocation = Some(country.into());
        self
    }

    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Set an arbitrary API parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parameters as a JSON object
    pub fn to_options(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::InvalidParams("parameters are not an object".into())),
        }
    }
}

/// The four ways a request can be configured
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Plain fetch; the API applies its defaults to every request
    Plain,
    /// Selective enhancement with inferred parameters plus optional overrides
    Enhanced(Option<ZyteParams>),
    /// Every parameter given explicitly
    Manual(ZyteParams),
    /// Skip the API for this request
    Bypass,
}

/// A URL plus the Zyte API options for one outgoing request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    url: Url,
    mode: ZyteMode,
    options: Map<String, Value>,
}

/// Build a descriptor for `url` following `strategy`
pub fn configure(url: &str, strategy: Strategy) -> Result<RequestDescriptor> {
    let url = Url::parse(url)?;
    let (mode, options) = match strategy {
        Strategy::Plain => (ZyteMode::Transparent, Map::new()),
        Strategy::Enhanced(None) => (ZyteMode::Automap, Map::new()),
        Strategy::Enhanced(Some(params)) => (ZyteMode::Automap, params.to_options()?),
        Strategy::Manual(params) => {
            let mut options = params.to_options()?;
            validate_manual(&mut options)?;
            (ZyteMode::Manual, options)
        }
        Strategy::Bypass => (ZyteMode::Off, Map::new()),
    };

    Ok(RequestDescriptor { url, mode, options })
}

impl RequestDescriptor {
    /// Every request goes through the API; nothing is attached
    pub fn transparent(url: &str) -> Result<Self> {
        configure(url, Strategy::Plain)
    }

    /// Opt in to the API with inferred parameters
    pub fn automap(url: &str) -> Result<Self> {
        configure(url, Strategy::Enhanced(None))
    }

    /// Opt in to the API, overriding some inferred parameters
    pub fn automap_with(url: &str, params: ZyteParams) -> Result<Self> {
        configure(url, Strategy::Enhanced(Some(params)))
    }

    /// Explicit API parameters
    pub fn manual(url: &str, params: ZyteParams) -> Result<Self> {
        configure(url, Strategy::Manual(params))
    }

    /// Plain HTTP, bypassing the API
    pub fn off(url: &str) -> Result<Self> {
        configure(url, Strategy::Bypass)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn mode(&self) -> ZyteMode {
        self.mode
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// Build the crawl request carrying this configuration
    pub fn to_request(&self) -> Request {
        let request = Request {
            url: self.url.clone(),
            method: Default::default(),
            headers: HashMap::new(),
            body: None,
            meta: HashMap::new(),
            callback: None,
            dont_filter: false,
        };

        match self.mode {
            ZyteMode::Transparent => request,
            ZyteMode::Automap if self.options.is_empty() => {
                request.with_meta(ZYTE_API_AUTOMAP_META_KEY, true)
            }
            ZyteMode::Automap => {
                request.with_meta(ZYTE_API_AUTOMAP_META_KEY, Value::Object(self.options.clone()))
            }
            ZyteMode::Manual => {
                request.with_meta(ZYTE_API_META_KEY, Value::Object(self.options.clone()))
            }
            ZyteMode::Off => request.with_meta(ZYTE_API_AUTOMAP_META_KEY, false),
        }
    }

    pub fn into_request(self) -> Request {
        self.to_request()
    }
}

fn is_true(options: &Map<String, Value>, key: &str) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Check a set of manual parameters, pairing `httpResponseBody` with
/// `httpResponseHeaders` when the latter is missing
pub fn validate_manual(options: &mut Map<String, Value>) -> Result<()> {
    let body = is_true(options, "httpResponseBody");
    let browser = is_true(options, "browserHtml");
    let screenshot = is_true(options, "screenshot");

    if body && browser {
        return Err(Error::InvalidParams(
            "browserHtml and httpResponseBody cannot be requested together".into(),
        ));
    }

    let has_actions = options
        .get("actions")
        .and_then(Value::as_array)
        .map_or(false, |actions| !actions.is_empty());
    if has_actions && !browser && !screenshot {
        return Err(Error::InvalidParams(
            "actions require browserHtml or screenshot".into(),
        ));
    }

    let has_output = OUTPUT_PARAMS.iter().any(|key| match options.get(*key) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Null) | None => false,
        Some(_) => true,
    });
    if !has_output {
        return Err(Error::InvalidParams(format!(
            "no output requested, expected one of {}",
            OUTPUT_PARAMS.join(", ")
        )));
    }

    if body && !options.contains_key("httpResponseHeaders") {
        warn!("httpResponseBody requested without httpResponseHeaders; adding httpResponseHeaders so the body can be decoded");
        options.insert("httpResponseHeaders".into(), Value::Bool(true));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(descriptor: &RequestDescriptor) -> Vec<&str> {
        let mut keys: Vec<&str> = descriptor.options().keys().map(String::as_str).collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_transparent_has_no_options() {
        let descriptor = RequestDescriptor::transparent("https://quotes.toscrape.com/js/").unwrap();
        assert_eq!(descriptor.mode(), ZyteMode::Transparent);
        assert!(descriptor.options().is_empty());

        let request = descriptor.into_request();
        assert!(request.meta.is_empty());
        assert_eq!(ZyteMode::from_meta(&request.meta), ZyteMode::Transparent);
    }

    #[test]
    fn test_automap_default_and_override() {
        let request = RequestDescriptor::automap("https://quotes.toscrape.com/")
            .unwrap()
            .into_request();
        assert_eq!(request.meta.get(ZYTE_API_AUTOMAP_META_KEY), Some(&json!(true)));
        assert!(!request.meta.contains_key(ZYTE_API_META_KEY));

        let descriptor =
            RequestDescriptor::automap_with("https://quotes.toscrape.com/js/", ZyteParams::browser())
                .unwrap();
        assert_eq!(keys(&descriptor), vec!["browserHtml"]);
        let request = descriptor.into_request();
        assert_eq!(
            request.meta.get(ZYTE_API_AUTOMAP_META_KEY),
            Some(&json!({"browserHtml": true}))
        );
        assert_eq!(ZyteMode::from_meta(&request.meta), ZyteMode::Automap);
    }

    #[test]
    fn test_manual_browser_has_flag_and_no_automap_key() {
        let descriptor = RequestDescriptor::manual(
            "https://quotes.toscrape.com/js/",
            ZyteParams::browser()
                .with_screenshot()
                .with_action(Action::wait_for_selector("div.quote", 10)),
        )
        .unwrap();

        assert_eq!(descriptor.mode(), ZyteMode::Manual);
        assert_eq!(keys(&descriptor), vec!["actions", "browserHtml", "screenshot"]);

        let request = descriptor.into_request();
        assert!(!request.meta.contains_key(ZYTE_API_AUTOMAP_META_KEY));
        assert_eq!(
            request.meta.get(ZYTE_API_META_KEY),
            Some(&json!({
                "browserHtml": true,
                "screenshot": true,
                "actions": [
                    {"action": "waitForSelector", "selector": "div.quote", "timeout": 10}
                ]
            }))
        );
    }

    #[test]
    fn test_manual_http_pairs_headers() {
        let descriptor = RequestDescriptor::manual("https://quotes.toscrape.com/", ZyteParams::http())
            .unwrap();
        assert_eq!(keys(&descriptor), vec!["httpResponseBody", "httpResponseHeaders"]);

        let body_only = ZyteParams {
            http_response_body: Some(true),
            ..ZyteParams::default()
        };
        let descriptor = RequestDescriptor::manual("https://quotes.toscrape.com/", body_only).unwrap();
        assert_eq!(
            descriptor.options().get("httpResponseHeaders"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_protected_preset() {
        let descriptor = RequestDescriptor::manual(
            "https://example.com/",
            ZyteParams::protected("div.content"),
        )
        .unwrap();

        let options = descriptor.options();
        assert_eq!(options["geolocation"], json!("US"));
        assert_eq!(options["requestHeaders"]["Accept-Language"], json!("en-US,en;q=0.9"));
        assert_eq!(
            options["actions"],
            json!([
                {"action": "waitForSelector", "selector": "div.content", "timeout": 10},
                {"action": "scroll", "coordinate": [0, 1000]}
            ])
        );
    }

    #[test]
    fn test_manual_rejects_invalid_combinations() {
        let both = ZyteParams::http().with_param("browserHtml", true);
        assert!(matches!(
            RequestDescriptor::manual("https://example.com/", both),
            Err(Error::InvalidParams(_))
        ));

        let actions_only = ZyteParams::http().with_action(Action::scroll(0, 10));
        assert!(matches!(
            RequestDescriptor::manual("https://example.com/", actions_only),
            Err(Error::InvalidParams(_))
        ));

        let nothing = ZyteParams::new().with_geolocation("US");
        assert!(matches!(
            RequestDescriptor::manual("https://example.com/", nothing),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_off_bypasses() {
        let descriptor = RequestDescriptor::off("https://httpbin.org/json").unwrap();
        assert!(descriptor.options().is_empty());
        let request = descriptor.into_request();
        assert_eq!(request.meta.get(ZYTE_API_AUTOMAP_META_KEY), Some(&json!(false)));
        assert_eq!(ZyteMode::from_meta(&request.meta), ZyteMode::Off);
    }

    #[test]
    fn test_extra_params_pass_through() {
        let descriptor = RequestDescriptor::manual(
            "https://example.com/product",
            ZyteParams::new().with_param("product", true),
        )
        .unwrap();
        assert_eq!(keys(&descriptor), vec!["product"]);
    }

    #[test]
    fn test_invalid_url() {
        assert!(RequestDescriptor::transparent("quotes.toscrape.com").is_err());
    }
}
