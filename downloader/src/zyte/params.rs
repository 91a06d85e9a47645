//! Resolve the Zyte API parameters of a crawl request.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::warn;
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::request::{Method, Request};
use scrapy_lab_core::zyte::{
    validate_manual, OUTPUT_PARAMS, ZYTE_API_AUTOMAP_META_KEY, ZYTE_API_META_KEY,
};
use serde_json::{json, Map, Value};

/// Settings that shape parameter resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSettings {
    /// Send requests without Zyte API meta through the API
    pub transparent_mode: bool,

    /// Merged into every automap request
    pub automap_params: Map<String, Value>,

    /// Merged under every manual request's own parameters
    pub default_params: Map<String, Value>,
}

const HTTP_DEFAULTS: &[&str] = &["httpResponseBody", "httpResponseHeaders"];

/// Headers handled by the API itself
const SKIPPED_HEADERS: &[&str] = &["user-agent", "cookie", "content-length", "host"];

/// Work out the API parameters for `request`.
///
/// `Ok(None)` means the request is sent as plain HTTP.
pub fn resolve(request: &Request, settings: &ParamSettings) -> Result<Option<Map<String, Value>>> {
    if let Some(manual) = request.meta.get(ZYTE_API_META_KEY) {
        return manual_params(manual, settings).map(Some);
    }

    match request.meta.get(ZYTE_API_AUTOMAP_META_KEY) {
        Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => automap_params(request, &Map::new(), settings).map(Some),
        Some(Value::Object(overrides)) => automap_params(request, overrides, settings).map(Some),
        Some(other) => Err(Error::InvalidParams(format!(
            "{} must be a boolean or an object, got {}",
            ZYTE_API_AUTOMAP_META_KEY, other
        ))),
        None if settings.transparent_mode => {
            automap_params(request, &Map::new(), settings).map(Some)
        }
        None => Ok(None),
    }
}

fn manual_params(value: &Value, settings: &ParamSettings) -> Result<Map<String, Value>> {
    let mut params = settings.default_params.clone();
    match value {
        Value::Bool(true) => {}
        Value::Object(own) => {
            for (key, value) in own {
                params.insert(key.clone(), value.clone());
            }
        }
        other => {
            return Err(Error::InvalidParams(format!(
                "{} must be an object, got {}",
                ZYTE_API_META_KEY, other
            )))
        }
    }

    validate_manual(&mut params)?;
    Ok(params)
}

fn automap_params(
    request: &Request,
    overrides: &Map<String, Value>,
    settings: &ParamSettings,
) -> Result<Map<String, Value>> {
    let mut requested = settings.automap_params.clone();
    for (key, value) in overrides {
        requested.insert(key.clone(), value.clone());
    }

    let wants_browser = ["browserHtml", "screenshot"]
        .iter()
        .any(|key| requested.get(*key).and_then(Value::as_bool).unwrap_or(false));

    let mut params = Map::new();
    if !wants_browser {
        for key in HTTP_DEFAULTS {
            params.insert((*key).to_string(), Value::Bool(true));
        }
    }

    for (key, value) in requested {
        if value == Value::Bool(false) && HTTP_DEFAULTS.contains(&key.as_str()) {
            params.remove(&key);
        } else {
            params.insert(key, value);
        }
    }

    let http = params
        .get("httpResponseBody")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    map_method_and_body(request, http, &mut params);
    map_headers(request, http, &mut params);

    let has_output = OUTPUT_PARAMS
        .iter()
        .any(|key| params.get(*key).map_or(false, |value| value != &Value::Bool(false)));
    if !has_output {
        return Err(Error::InvalidParams(format!(
            "automap parameters for {} do not request any output",
            request.url
        )));
    }

    Ok(params)
}

fn map_method_and_body(request: &Request, http: bool, params: &mut Map<String, Value>) {
    let has_body = request.body.as_ref().map_or(false, |body| !body.is_empty());
    if request.method == Method::GET && !has_body {
        return;
    }

    if !http {
        warn!(
            "Ignoring method {} and body of browser request to {}",
            request.method.as_str(),
            request.url
        );
        return;
    }

    if request.method != Method::GET && !params.contains_key("httpRequestMethod") {
        params.insert(
            "httpRequestMethod".into(),
            Value::from(request.method.as_str()),
        );
    }

    if let Some(body) = request.body.as_ref().filter(|body| !body.is_empty()) {
        if !params.contains_key("httpRequestBody") {
            params.insert("httpRequestBody".into(), Value::from(BASE64.encode(body)));
        }
    }
}

fn map_headers(request: &Request, http: bool, params: &mut Map<String, Value>) {
    if http {
        if params.contains_key("customHttpRequestHeaders") {
            return;
        }
        let mut headers: Vec<(&String, &String)> = request
            .headers
            .iter()
            .filter(|(name, _)| !SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .collect();
        headers.sort();
        if !headers.is_empty() {
            let entries: Vec<Value> = headers
                .into_iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect();
            params.insert("customHttpRequestHeaders".into(), Value::Array(entries));
        }
    } else if !params.contains_key("requestHeaders") {
        if let Some(referer) = request.header("Referer") {
            params.insert("requestHeaders".into(), json!({"referer": referer}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(transparent_mode: bool) -> ParamSettings {
        ParamSettings {
            transparent_mode,
            ..ParamSettings::default()
        }
    }

    fn get(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    #[test]
    fn test_transparent_mode_defaults() {
        let request = get("https://quotes.toscrape.com/");

        let params = resolve(&request, &settings(true)).unwrap().unwrap();
        assert_eq!(
            Value::Object(params),
            json!({"httpResponseBody": true, "httpResponseHeaders": true})
        );

        assert!(resolve(&request, &settings(false)).unwrap().is_none());
    }

    #[test]
    fn test_automap_off_is_plain_http() {
        let request = get("https://quotes.toscrape.com/").with_meta(ZYTE_API_AUTOMAP_META_KEY, false);
        assert!(resolve(&request, &settings(true)).unwrap().is_none());
    }

    #[test]
    fn test_automap_browser_drops_http_defaults() {
        let request = get("https://quotes.toscrape.com/js/")
            .with_header("Referer", "https://quotes.toscrape.com/")
            .with_header("User-Agent", "bot")
            .with_meta(ZYTE_API_AUTOMAP_META_KEY, json!({"browserHtml": true}));

        let params = resolve(&request, &settings(false)).unwrap().unwrap();
        assert_eq!(
            Value::Object(params),
            json!({
                "browserHtml": true,
                "requestHeaders": {"referer": "https://quotes.toscrape.com/"}
            })
        );
    }

    #[test]
    fn test_automap_http_maps_method_body_and_headers() {
        let request = Request::post("https://httpbin.org/post", "a=1")
            .unwrap()
            .with_header("User-Agent", "bot")
            .with_header("Accept-Language", "en")
            .with_meta(ZYTE_API_AUTOMAP_META_KEY, true);

        let params = resolve(&request, &settings(false)).unwrap().unwrap();
        assert_eq!(params["httpRequestMethod"], json!("POST"));
        assert_eq!(params["httpRequestBody"], json!(BASE64.encode("a=1")));
        assert_eq!(
            params["customHttpRequestHeaders"],
            json!([{"name": "Accept-Language", "value": "en"}])
        );
    }

    #[test]
    fn test_automap_false_removes_default() {
        let request = get("https://example.com/")
            .with_meta(ZYTE_API_AUTOMAP_META_KEY, json!({"httpResponseHeaders": false}));

        let params = resolve(&request, &settings(false)).unwrap().unwrap();
        assert_eq!(Value::Object(params), json!({"httpResponseBody": true}));
    }

    #[test]
    fn test_automap_settings_merged() {
        let mut settings = settings(true);
        settings
            .automap_params
            .insert("geolocation".into(), json!("US"));

        let params = resolve(&get("https://example.com/"), &settings).unwrap().unwrap();
        assert_eq!(params["geolocation"], json!("US"));
        assert_eq!(params["httpResponseBody"], json!(true));
    }

    #[test]
    fn test_manual_params_with_defaults() {
        let mut settings = settings(false);
        settings
            .default_params
            .insert("geolocation".into(), json!("DE"));

        let request = get("https://quotes.toscrape.com/js/")
            .with_meta(ZYTE_API_META_KEY, json!({"browserHtml": true, "geolocation": "US"}));

        let params = resolve(&request, &settings).unwrap().unwrap();
        assert_eq!(
            Value::Object(params),
            json!({"geolocation": "US", "browserHtml": true})
        );
    }

    #[test]
    fn test_manual_params_invalid() {
        let request = get("https://example.com/").with_meta(ZYTE_API_META_KEY, "browserHtml");
        assert!(matches!(
            resolve(&request, &settings(true)),
            Err(Error::InvalidParams(_))
        ));

        let request = get("https://example.com/").with_meta(ZYTE_API_META_KEY, json!({}));
        assert!(matches!(
            resolve(&request, &settings(true)),
            Err(Error::InvalidParams(_))
        ));
    }
}
