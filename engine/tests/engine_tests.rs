use std::sync::Arc;

use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::extract::FieldExtractor;
use scrapy_lab_core::item::DynamicItem;
use scrapy_lab_core::response::Response;
use scrapy_lab_core::spider::{BasicSpider, ParseOutput, Spider};
use scrapy_lab_downloader::{
    DownloaderConfig, HttpDownloader, ZyteApiConfig, ZyteApiDownloader,
};
use scrapy_lab_engine::{Engine, EngineConfig, CLOSESPIDER_ITEMCOUNT, FINISHED};
use scrapy_lab_middleware::{ChainedRequestMiddleware, ChainedResponseMiddleware, OffsiteMiddleware};
use scrapy_lab_pipeline::Pipeline;
use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Keeps every item it sees
#[derive(Default)]
struct CollectingPipeline {
    items: Mutex<Vec<DynamicItem>>,
}

#[async_trait]
impl Pipeline for CollectingPipeline {
    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        _spider: &dyn Spider,
    ) -> Result<DynamicItem> {
        self.items.lock().await.push(item.clone());
        Ok(item)
    }
}

fn quotes_page(quotes: &[(&str, &str)], next: Option<&str>) -> String {
    let mut html = String::from("<html><body>");
    for (text, author) in quotes {
        html.push_str(&format!(
            r#"<div class="quote"><span class="text">{}</span><small class="author">{}</small></div>"#,
            text, author
        ));
    }
    if let Some(next) = next {
        html.push_str(&format!(r#"<li class="next"><a href="{}">Next</a></li>"#, next));
    }
    html.push_str("</body></html>");
    html
}

fn quote_extractor() -> FieldExtractor {
    FieldExtractor::new("div.quote")
        .unwrap()
        .field("text", "span.text::text")
        .unwrap()
        .field("author", "small.author::text")
        .unwrap()
        .next_page("li.next a::attr(href)")
        .unwrap()
}

fn config() -> EngineConfig {
    EngineConfig {
        concurrent_requests: 4,
        log_stats: false,
        ..EngineConfig::default()
    }
}

fn engine(
    spider: Arc<dyn Spider>,
    pipeline: Arc<CollectingPipeline>,
    config: EngineConfig,
) -> Engine {
    let mut request_middlewares = ChainedRequestMiddleware::default();
    request_middlewares.add(OffsiteMiddleware::new());

    Engine::with_components(
        spider,
        Arc::new(HttpDownloader::new(DownloaderConfig::default()).unwrap()),
        pipeline,
        Arc::new(request_middlewares),
        Arc::new(ChainedResponseMiddleware::default()),
        config,
    )
}

async fn mount_page(server: &MockServer, page: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_follows_pagination_and_dedupes() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/page/1/",
        quotes_page(&[("q1", "a1"), ("q2", "a2")], Some("/page/2/")),
    )
    .await;
    // Page 2 links back to page 1, which was already crawled
    mount_page(&server, "/page/2/", quotes_page(&[("q3", "a3")], Some("/page/1/"))).await;

    let spider = BasicSpider::new("quotes", vec![format!("{}/page/1/", server.uri())])
        .with_extractor(quote_extractor());
    let pipeline = Arc::new(CollectingPipeline::default());

    let stats = engine(Arc::new(spider), pipeline.clone(), config())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.request_count, 2);
    assert_eq!(stats.response_count, 2);
    assert_eq!(stats.item_count, 3);
    assert_eq!(stats.duplicate_count, 1);
    assert_eq!(stats.api_response_count, 0);
    assert_eq!(stats.finish_reason.as_deref(), Some(FINISHED));

    let items = pipeline.items.lock().await;
    let mut texts: Vec<&str> = items.iter().filter_map(|i| i.get_str("text")).collect();
    texts.sort();
    assert_eq!(texts, vec!["q1", "q2", "q3"]);
}

#[tokio::test]
async fn test_offsite_requests_are_filtered() {
    let server = MockServer::start().await;
    mount_page(&server, "/", quotes_page(&[("q1", "a1")], None)).await;

    let spider = BasicSpider::new(
        "quotes",
        vec![
            format!("{}/", server.uri()),
            "http://offsite.invalid/".to_string(),
        ],
    )
    .with_allowed_domains(vec!["127.0.0.1".to_string()])
    .with_extractor(quote_extractor());
    let pipeline = Arc::new(CollectingPipeline::default());

    let stats = engine(Arc::new(spider), pipeline, config())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.filtered_count, 1);
    assert_eq!(stats.request_count, 1);
    assert_eq!(stats.item_count, 1);
    assert_eq!(stats.error_count, 0);
}

#[tokio::test]
async fn test_closespider_itemcount_stops_scheduling() {
    let server = MockServer::start().await;
    for page in 1..=5 {
        mount_page(
            &server,
            &format!("/page/{}/", page),
            quotes_page(
                &[("q", "a"), ("r", "b")],
                Some(&format!("/page/{}/", page + 1)),
            ),
        )
        .await;
    }

    let spider = BasicSpider::new("quotes", vec![format!("{}/page/1/", server.uri())])
        .with_extractor(quote_extractor());
    let pipeline = Arc::new(CollectingPipeline::default());

    let config = EngineConfig {
        closespider_itemcount: Some(3),
        ..config()
    };
    let stats = engine(Arc::new(spider), pipeline, config)
        .run()
        .await
        .unwrap();

    assert_eq!(stats.finish_reason.as_deref(), Some(CLOSESPIDER_ITEMCOUNT));
    assert_eq!(stats.response_count, 2);
    assert_eq!(stats.item_count, 4);
}

struct FailingSpider {
    start_urls: Vec<String>,
}

#[async_trait]
impl Spider for FailingSpider {
    fn name(&self) -> &str {
        "failing_spider"
    }

    fn start_urls(&self) -> Vec<String> {
        self.start_urls.clone()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput> {
        if response.url.path() == "/broken" {
            return Err(Error::other("Test parse error"));
        }
        let mut output = ParseOutput::new();
        let mut item = DynamicItem::new("page");
        item.set("url", response.url.as_str());
        output.add_record(item);
        Ok(output)
    }
}

#[tokio::test]
async fn test_errors_are_counted_and_crawl_continues() {
    let server = MockServer::start().await;
    mount_page(&server, "/broken", "<html></html>".to_string()).await;
    mount_page(&server, "/fine", "<html></html>".to_string()).await;

    let spider = FailingSpider {
        start_urls: vec![
            format!("{}/broken", server.uri()),
            format!("{}/fine", server.uri()),
            // Nothing listens on port 9
            "http://127.0.0.1:9/unreachable".to_string(),
        ],
    };
    let pipeline = Arc::new(CollectingPipeline::default());

    let stats = engine(Arc::new(spider), pipeline.clone(), config())
        .run()
        .await
        .unwrap();

    assert_eq!(stats.error_count, 2);
    assert_eq!(stats.response_count, 2);
    assert_eq!(stats.item_count, 1);
    assert_eq!(pipeline.items.lock().await.len(), 1);
}

#[tokio::test]
async fn test_crawl_through_zyte_api() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/extract"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://quotes.toscrape.com/",
            "statusCode": 200,
            "browserHtml": quotes_page(&[("rendered", "Browser")], None),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut zyte_config = ZyteApiConfig::new("test-key");
    zyte_config.api_url = format!("{}/v1/extract", server.uri());
    zyte_config
        .automap_params
        .insert("browserHtml".to_string(), json!(true));
    let downloader = ZyteApiDownloader::new(zyte_config, DownloaderConfig::default()).unwrap();

    let spider = BasicSpider::new("transparent", vec!["https://quotes.toscrape.com/".to_string()])
        .with_extractor(quote_extractor());
    let pipeline = Arc::new(CollectingPipeline::default());

    let mut engine = Engine::with_components(
        Arc::new(spider),
        Arc::new(downloader),
        pipeline.clone(),
        Arc::new(ChainedRequestMiddleware::default()),
        Arc::new(ChainedResponseMiddleware::default()),
        config(),
    );
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.api_response_count, 1);
    assert_eq!(stats.item_count, 1);

    let items = pipeline.items.lock().await;
    assert_eq!(items[0].get_str("text"), Some("rendered"));
    assert_eq!(items[0].get_str("author"), Some("Browser"));
    assert!(!engine.is_running().await);
}
