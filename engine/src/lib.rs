use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::request::Request;
use scrapy_lab_core::spider::{ParseOutput, Spider};
use scrapy_lab_downloader::{Downloader, DownloaderConfig, HttpDownloader};
use scrapy_lab_middleware::{
    ChainedRequestMiddleware, ChainedResponseMiddleware, DefaultHeadersMiddleware,
    OffsiteMiddleware, RequestMiddleware, ResponseLoggerMiddleware, ResponseMiddleware,
};
use scrapy_lab_pipeline::{LogPipeline, Pipeline, PipelineType};
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;

pub mod config;
pub mod stats;

pub use config::EngineConfig;
pub use stats::EngineStats;

/// Finish reason when the queue ran dry
pub const FINISHED: &str = "finished";

/// Finish reason when `closespider_itemcount` was reached
pub const CLOSESPIDER_ITEMCOUNT: &str = "closespider_itemcount";

/// The crawler engine
pub struct Engine {
    /// The spider to use
    spider: Arc<dyn Spider>,

    /// The downloader to use
    downloader: Arc<dyn Downloader>,

    /// The item pipelines to use
    pipelines: Arc<dyn Pipeline>,

    /// The request middlewares to use
    request_middlewares: Arc<dyn RequestMiddleware>,

    /// The response middlewares to use
    response_middlewares: Arc<dyn ResponseMiddleware>,

    /// The engine configuration
    config: EngineConfig,

    /// The engine statistics
    stats: Arc<RwLock<EngineStats>>,

    /// Whether the engine is running
    running: Arc<RwLock<bool>>,
}

/// Everything a request task needs once spawned
struct CrawlContext {
    spider: Arc<dyn Spider>,
    downloader: Arc<dyn Downloader>,
    request_middlewares: Arc<dyn RequestMiddleware>,
    response_middlewares: Arc<dyn ResponseMiddleware>,
    stats: Arc<RwLock<EngineStats>>,
}

impl CrawlContext {
    async fn count_error(&self) {
        self.stats.write().await.error_count += 1;
    }
}

impl Engine {
    /// Create a new engine with the given spider and default components:
    /// plain HTTP downloads, offsite filtering and item logging
    pub fn new(spider: Arc<dyn Spider>) -> Result<Self> {
        let config = EngineConfig::default();

        let downloader_config = DownloaderConfig {
            concurrent_requests: config.concurrent_requests,
            ..DownloaderConfig::default()
        };
        let user_agent = downloader_config.user_agent.clone();
        let downloader = Arc::new(HttpDownloader::new(downloader_config)?);

        let pipelines = Arc::new(PipelineType::Log(LogPipeline::debug()));

        let mut request_middlewares = ChainedRequestMiddleware::default();
        request_middlewares.add(DefaultHeadersMiddleware::common(&user_agent));
        request_middlewares.add(OffsiteMiddleware::new());

        let mut response_middlewares = ChainedResponseMiddleware::default();
        response_middlewares.add(ResponseLoggerMiddleware::info());

        Ok(Self::with_components(
            spider,
            downloader,
            pipelines,
            Arc::new(request_middlewares),
            Arc::new(response_middlewares),
            config,
        ))
    }

    /// Create a new engine with custom components
    pub fn with_components(
        spider: Arc<dyn Spider>,
        downloader: Arc<dyn Downloader>,
        pipelines: Arc<dyn Pipeline>,
        request_middlewares: Arc<dyn RequestMiddleware>,
        response_middlewares: Arc<dyn ResponseMiddleware>,
        config: EngineConfig,
    ) -> Self {
        Self {
            spider,
            downloader,
            pipelines,
            request_middlewares,
            response_middlewares,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the engine until every scheduled request is processed, or until
    /// `closespider_itemcount` items were scraped
    pub async fn run(&mut self) -> Result<EngineStats> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(Error::other("Engine is already running"));
            }
            *running = true;
        }

        {
            let mut stats = self.stats.write().await;
            *stats = EngineStats::default();
            stats.start_time = Some(Instant::now());
        }

        info!("Spider opened: {}", self.spider.name());
        self.request_middlewares.spider_opened(&*self.spider).await?;
        self.response_middlewares
            .spider_opened(&*self.spider)
            .await?;
        self.pipelines.open_spider(&*self.spider).await?;

        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();

        for request_result in self.spider.start_requests() {
            match request_result {
                Ok(request) => {
                    if !schedule(request, &mut queue, &mut seen) {
                        self.stats.write().await.duplicate_count += 1;
                    }
                }
                Err(e) => {
                    error!("Error creating start request: {}", e);
                    self.stats.write().await.error_count += 1;
                }
            }
        }

        let stats_task = if self.config.log_stats && self.config.stats_interval_secs > 0 {
            let stats = self.stats.clone();
            let interval = Duration::from_secs(self.config.stats_interval_secs);

            Some(tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    let stats = stats.read().await;
                    info!(
                        "Crawled {} pages, scraped {} items ({:.2} req/s)",
                        stats.response_count,
                        stats.item_count,
                        stats.requests_per_second().unwrap_or(0.0),
                    );
                }
            }))
        } else {
            None
        };

        // Items are processed in order by a single task
        let (item_tx, mut item_rx) = mpsc::channel(self.config.concurrent_items.max(1));
        let item_processor_task = {
            let pipelines = self.pipelines.clone();
            let spider = self.spider.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                while let Some(item) = item_rx.recv().await {
                    match pipelines.process_dynamic_item(item, &*spider).await {
                        Ok(_) => stats.write().await.item_count += 1,
                        Err(e) => {
                            error!("Error processing item: {}", e);
                            stats.write().await.error_count += 1;
                        }
                    }
                }
            })
        };

        let ctx = Arc::new(CrawlContext {
            spider: self.spider.clone(),
            downloader: self.downloader.clone(),
            request_middlewares: self.request_middlewares.clone(),
            response_middlewares: self.response_middlewares.clone(),
            stats: self.stats.clone(),
        });

        let mut tasks = FuturesUnordered::new();
        let mut scraped = 0usize;
        let mut finish_reason = FINISHED;

        loop {
            while finish_reason == FINISHED && tasks.len() < self.config.concurrent_requests.max(1)
            {
                let Some(request) = queue.pop_front() else {
                    break;
                };
                tasks.push(tokio::spawn(crawl_request(request, Arc::clone(&ctx))));
            }

            let Some(joined) = tasks.next().await else {
                break;
            };

            let output = match joined {
                Ok(Some(output)) => output,
                Ok(None) => continue,
                Err(e) => {
                    error!("Crawl task failed: {}", e);
                    ctx.count_error().await;
                    continue;
                }
            };

            for item in output.items {
                scraped += 1;
                if let Err(e) = item_tx.send(item).await {
                    error!("Error sending item to pipeline: {}", e);
                    ctx.count_error().await;
                }
            }

            if let Some(limit) = self.config.closespider_itemcount {
                if scraped >= limit && finish_reason == FINISHED {
                    info!("Closing spider ({}): {} items scraped", CLOSESPIDER_ITEMCOUNT, scraped);
                    finish_reason = CLOSESPIDER_ITEMCOUNT;
                }
            }

            if finish_reason != FINISHED {
                continue;
            }

            let mut duplicates = 0;
            for request in output.requests {
                if !schedule(request, &mut queue, &mut seen) {
                    duplicates += 1;
                }
            }
            if duplicates > 0 {
                self.stats.write().await.duplicate_count += duplicates;
            }
        }

        if !queue.is_empty() {
            debug!("Dropping {} pending requests", queue.len());
        }

        if let Some(task) = stats_task {
            task.abort();
        }

        drop(item_tx);
        if let Err(e) = item_processor_task.await {
            error!("Item processor task failed: {}", e);
        }

        self.close(finish_reason).await;

        Ok(self.stats.read().await.clone())
    }

    /// Close pipelines, middlewares and the spider, then record the end of the crawl
    async fn close(&self, finish_reason: &str) {
        if let Err(e) = self.pipelines.close_spider(&*self.spider).await {
            warn!("Error closing pipelines: {}", e);
        }
        if let Err(e) = self.request_middlewares.spider_closed(&*self.spider).await {
            warn!("Error closing request middlewares: {}", e);
        }
        if let Err(e) = self.response_middlewares.spider_closed(&*self.spider).await {
            warn!("Error closing response middlewares: {}", e);
        }
        if let Err(e) = self.spider.closed().await {
            warn!("Error closing spider: {}", e);
        }

        {
            let mut stats = self.stats.write().await;
            stats.end_time = Some(Instant::now());
            stats.finish_reason = Some(finish_reason.to_string());

            if self.config.log_stats {
                info!("Dumping crawl stats: {}", *stats);
            }
        }

        *self.running.write().await = false;
        info!("Spider closed: {} ({})", self.spider.name(), finish_reason);
    }

    /// Get the current engine statistics
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Check if the engine is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Queue `request` unless an identical one was already seen.
/// Returns `false` for dropped duplicates.
fn schedule(request: Request, queue: &mut VecDeque<Request>, seen: &mut HashSet<String>) -> bool {
    if !request.dont_filter && !seen.insert(request.fingerprint()) {
        debug!("Filtered duplicate request: {} {}", request.method.as_str(), request.url);
        return false;
    }
    queue.push_back(request);
    true
}

/// Take one request through the middlewares, the downloader and the spider
async fn crawl_request(request: Request, ctx: Arc<CrawlContext>) -> Option<ParseOutput> {
    let spider = &*ctx.spider;
    let url = request.url.to_string();

    let request = match ctx.request_middlewares.process_request(request, spider).await {
        Ok(request) => request,
        Err(e) if e.is_ignored() => {
            debug!("{}", e);
            ctx.stats.write().await.filtered_count += 1;
            return None;
        }
        Err(e) => {
            error!("Request middleware rejected {}: {}", url, e);
            ctx.count_error().await;
            return None;
        }
    };

    ctx.stats.write().await.request_count += 1;

    let response = match ctx.downloader.download(request).await {
        Ok(response) => response,
        Err(e) => {
            let e = e
                .with_component("downloader")
                .with_url(url.as_str())
                .with_spider_name(spider.name());
            error!("Error downloading {}: {}", url, e);
            ctx.count_error().await;
            return None;
        }
    };

    {
        let mut stats = ctx.stats.write().await;
        stats.response_count += 1;
        if response.is_api_response() {
            stats.api_response_count += 1;
        }
    }

    let response = match ctx.response_middlewares.process_response(response, spider).await {
        Ok(response) => response,
        Err(e) if e.is_ignored() => {
            debug!("{}", e);
            ctx.stats.write().await.filtered_count += 1;
            return None;
        }
        Err(e) => {
            error!("Response middleware rejected {}: {}", url, e);
            ctx.count_error().await;
            return None;
        }
    };

    match spider.parse(response).await {
        Ok(output) => Some(output),
        Err(e) => {
            error!("Spider error processing {}: {}", url, e);
            ctx.count_error().await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_dedupes_unless_dont_filter() {
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();

        let request = Request::get("https://quotes.toscrape.com/page/1/").unwrap();
        assert!(schedule(request.clone(), &mut queue, &mut seen));
        assert!(!schedule(request.clone(), &mut queue, &mut seen));
        assert!(schedule(request.with_dont_filter(true), &mut queue, &mut seen));

        assert_eq!(queue.len(), 2);
    }
}
