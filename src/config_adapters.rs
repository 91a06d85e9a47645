use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use scrapy_lab_core::spider::Spider;
use scrapy_lab_downloader::zyte::RetryPolicy;
use scrapy_lab_downloader::{
    Downloader, DownloaderConfig, HttpDownloader, ZyteApiConfig, ZyteApiDownloader,
};
use scrapy_lab_engine::{Engine, EngineConfig};
use scrapy_lab_middleware::{
    ChainedRequestMiddleware, ChainedResponseMiddleware, DefaultHeadersMiddleware,
    DownloadDelayMiddleware, OffsiteMiddleware, ResponseLoggerMiddleware, RobotsTxtMiddleware,
};
use scrapy_lab_pipeline::{FeedFormat, LogPipeline, PipelineType};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::settings::{Result, Settings, SettingsError, ZYTE_API_KEY_ENV};

/// `ADDONS` entries that turn the Zyte API integration on
pub const ZYTE_API_ADDONS: [&str; 2] = ["scrapy_zyte_api.Addon", "zyte_api"];

/// Whether `ADDONS` enables the Zyte API. An entry set to `None` disables it.
pub fn zyte_api_enabled(settings: &Settings) -> bool {
    settings
        .get::<Map<String, Value>>("ADDONS")
        .map(|addons| {
            ZYTE_API_ADDONS
                .iter()
                .any(|name| matches!(addons.get(*name), Some(v) if !v.is_null()))
        })
        .unwrap_or(false)
}

/// `USER_AGENT`, or `<BOT_NAME>/<version>`
pub fn user_agent(settings: &Settings) -> String {
    settings.get("USER_AGENT").unwrap_or_else(|_| {
        let bot_name: String = settings.get_or("BOT_NAME", "scrapy_lab".to_string());
        format!("{}/{}", bot_name, env!("CARGO_PKG_VERSION"))
    })
}

/// Adapter function to create EngineConfig from Settings
pub fn engine_config_from_settings(settings: &Settings) -> Result<EngineConfig> {
    let closespider_itemcount: usize = settings.get_or("CLOSESPIDER_ITEMCOUNT", 0);

    Ok(EngineConfig {
        concurrent_requests: settings.get_or("CONCURRENT_REQUESTS", 16),
        concurrent_items: settings.get_or("CONCURRENT_ITEMS", 100),
        closespider_itemcount: (closespider_itemcount > 0).then_some(closespider_itemcount),
        log_stats: settings.get_or("LOG_STATS", true),
        stats_interval_secs: settings.get_or("LOGSTATS_INTERVAL", 60),
    })
}

/// Adapter function to create DownloaderConfig from Settings
pub fn downloader_config_from_settings(settings: &Settings) -> Result<DownloaderConfig> {
    Ok(DownloaderConfig {
        concurrent_requests: settings.get_or("CONCURRENT_REQUESTS", 16),
        user_agent: user_agent(settings),
        timeout: settings.get_or("DOWNLOAD_TIMEOUT", 180),
    })
}

/// Zyte API configuration, or `None` when the addon is not enabled.
///
/// Fails with [`SettingsError::MissingSetting`] when the addon is enabled
/// without an API key.
pub fn zyte_api_config_from_settings(settings: &Settings) -> Result<Option<ZyteApiConfig>> {
    if !zyte_api_enabled(settings) {
        return Ok(None);
    }

    let api_key: String = settings.get_or(ZYTE_API_KEY_ENV, String::new());
    let api_key = api_key.trim();
    if api_key.is_empty() || api_key.starts_with("your_") {
        return Err(SettingsError::MissingSetting(ZYTE_API_KEY_ENV.to_string()));
    }

    let mut config = ZyteApiConfig::new(api_key);
    if let Ok(api_url) = settings.get::<String>("ZYTE_API_URL") {
        config.api_url = api_url;
    }
    config.transparent_mode = settings.get_or("ZYTE_API_TRANSPARENT_MODE", true);
    config.automap_params = settings.get_or("ZYTE_API_AUTOMAP_PARAMS", Map::new());
    config.default_params = settings.get_or("ZYTE_API_DEFAULT_PARAMS", Map::new());
    config.retry = RetryPolicy {
        enabled: settings.get_or("ZYTE_API_RETRY_ENABLED", true),
        max_elapsed_time: Duration::from_secs_f64(
            settings.get_or("ZYTE_API_MAX_RETRY_TIME", 60.0f64).max(0.0),
        ),
        ..RetryPolicy::default()
    };

    Ok(Some(config))
}

/// The Zyte API downloader when the addon is enabled, plain HTTP otherwise
pub fn create_downloader_from_settings(settings: &Settings) -> Result<Arc<dyn Downloader>> {
    let downloader_config = downloader_config_from_settings(settings)?;
    let component_error = |e: scrapy_lab_core::Error| SettingsError::InvalidValue {
        key: "downloader".to_string(),
        message: e.to_string(),
    };

    match zyte_api_config_from_settings(settings)? {
        Some(zyte_config) => {
            info!(
                "Zyte API enabled (transparent mode: {})",
                zyte_config.transparent_mode
            );
            let downloader = ZyteApiDownloader::new(zyte_config, downloader_config)
                .map_err(component_error)?;
            Ok(Arc::new(downloader))
        }
        None => {
            info!("Zyte API disabled, sending plain HTTP requests");
            let downloader = HttpDownloader::new(downloader_config).map_err(component_error)?;
            Ok(Arc::new(downloader))
        }
    }
}

/// Default headers, offsite filtering, robots.txt and download delay
pub fn request_middlewares_from_settings(settings: &Settings) -> Result<ChainedRequestMiddleware> {
    let user_agent = user_agent(settings);

    let mut headers_middleware = DefaultHeadersMiddleware::common(&user_agent);
    let default_headers: HashMap<String, String> =
        settings.get_or("DEFAULT_REQUEST_HEADERS", HashMap::new());
    for (name, value) in default_headers {
        headers_middleware = headers_middleware.with_header(name, value);
    }

    let mut chain = ChainedRequestMiddleware::default();
    chain.add(headers_middleware);
    chain.add(OffsiteMiddleware::new());

    if settings.get_or("ROBOTSTXT_OBEY", false) {
        chain.add(RobotsTxtMiddleware::new(user_agent));
    }

    let delay: f64 = settings.get_or("DOWNLOAD_DELAY", 0.0);
    if delay > 0.0 {
        chain.add(DownloadDelayMiddleware::from_secs_f64(
            delay,
            settings.get_or("RANDOMIZE_DOWNLOAD_DELAY", true),
        ));
    }

    Ok(chain)
}

pub fn response_middlewares_from_settings(
    _settings: &Settings,
) -> Result<ChainedResponseMiddleware> {
    let mut chain = ChainedResponseMiddleware::default();
    chain.add(ResponseLoggerMiddleware::info());
    Ok(chain)
}

/// Item logging plus a feed export when an output file is given
pub fn pipelines_from_settings(
    settings: &Settings,
    output: Option<(&Path, FeedFormat)>,
) -> Result<PipelineType> {
    let encoding: String = settings.get_or("FEED_EXPORT_ENCODING", "utf-8".to_string());
    if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
        warn!(
            "FEED_EXPORT_ENCODING {:?} is not supported, writing utf-8",
            encoding
        );
    }

    let mut pipelines = vec![PipelineType::Log(LogPipeline::debug())];
    if let Some((path, format)) = output {
        pipelines.push(PipelineType::feed(path, format));
    }

    Ok(PipelineType::Chained(pipelines))
}

/// Build an engine for `spider`. `settings` should already include the
/// spider's custom settings.
pub fn create_engine(
    spider: Arc<dyn Spider>,
    settings: &Settings,
    output: Option<(&Path, FeedFormat)>,
) -> Result<Engine> {
    let downloader = create_downloader_from_settings(settings)?;
    let pipelines = pipelines_from_settings(settings, output)?;
    let request_middlewares = request_middlewares_from_settings(settings)?;
    let response_middlewares = response_middlewares_from_settings(settings)?;
    let config = engine_config_from_settings(settings)?;

    Ok(Engine::with_components(
        spider,
        downloader,
        Arc::new(pipelines),
        Arc::new(request_middlewares),
        Arc::new(response_middlewares),
        config,
    ))
}
