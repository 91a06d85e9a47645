use std::path::{Path, PathBuf};

use log::{debug, error, info};
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::item::DynamicItem;
use scrapy_lab_core::spider::Spider;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

/// Trait for item pipelines
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Process a dynamic item
    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        spider: &dyn Spider,
    ) -> Result<DynamicItem>;

    /// Called when the spider is opened
    async fn open_spider(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }

    /// Called when the spider is closed
    async fn close_spider(&self, _spider: &dyn Spider) -> Result<()> {
        Ok(())
    }
}

/// A no-op pipeline that passes items through unchanged
#[derive(Debug, Default)]
pub struct DummyPipeline;

impl DummyPipeline {
    /// Create a new dummy pipeline
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Pipeline for DummyPipeline {
    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        _spider: &dyn Spider,
    ) -> Result<DynamicItem> {
        Ok(item)
    }
}

/// Pipeline that logs items
pub struct LogPipeline {
    /// Log level to use
    level: log::Level,
}

impl LogPipeline {
    /// Create a new log pipeline
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }

    /// Create a new log pipeline with INFO level
    pub fn info() -> Self {
        Self::new(log::Level::Info)
    }

    /// Create a new log pipeline with DEBUG level
    pub fn debug() -> Self {
        Self::new(log::Level::Debug)
    }
}

#[async_trait]
impl Pipeline for LogPipeline {
    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        spider: &dyn Spider,
    ) -> Result<DynamicItem> {
        let json = item.to_json_string();
        match self.level {
            log::Level::Error => error!("Scraped from {}: {}", spider.name(), json),
            log::Level::Warn => log::warn!("Scraped from {}: {}", spider.name(), json),
            log::Level::Info => info!("Scraped from {}: {}", spider.name(), json),
            log::Level::Debug => debug!("Scraped from {}: {}", spider.name(), json),
            log::Level::Trace => log::trace!("Scraped from {}: {}", spider.name(), json),
        }

        Ok(item)
    }
}

trait ToJsonString {
    fn to_json_string(&self) -> String;
}

impl ToJsonString for DynamicItem {
    fn to_json_string(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| format!("{:?}", self.fields))
    }
}

/// Output format of a feed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// One JSON array holding every item
    Json,
    /// One JSON object per line
    JsonLines,
}

impl FeedFormat {
    /// Guess the format from a file extension, `.jsonl`/`.jl` meaning JSON Lines
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some("jsonl") | Some("jl") | Some("jsonlines") => FeedFormat::JsonLines,
            _ => FeedFormat::Json,
        }
    }
}

impl std::str::FromStr for FeedFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(FeedFormat::Json),
            "jsonlines" | "jsonl" | "jl" => Ok(FeedFormat::JsonLines),
            other => Err(Error::other(format!("Unknown feed format: {}", other))),
        }
    }
}

struct FeedFile {
    writer: BufWriter<File>,
    count: usize,
}

async fn open_feed(path: &Path, append: bool) -> Result<BufWriter<File>> {
    let file = if append {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?
    } else {
        File::create(path).await?
    };
    Ok(BufWriter::new(file))
}

/// Pipeline that writes items to a JSON file as one array, UTF-8 encoded
pub struct JsonFilePipeline {
    /// Path to the output file
    file_path: PathBuf,

    /// File handle, present between open and close
    file: Mutex<Option<FeedFile>>,
}

impl JsonFilePipeline {
    /// Create a new JSON file pipeline
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait]
impl Pipeline for JsonFilePipeline {
    async fn open_spider(&self, _spider: &dyn Spider) -> Result<()> {
        let mut writer = open_feed(&self.file_path, false).await?;
        writer.write_all(b"[").await?;

        *self.file.lock().await = Some(FeedFile { writer, count: 0 });
        Ok(())
    }

    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        _spider: &dyn Spider,
    ) -> Result<DynamicItem> {
        let mut guard = self.file.lock().await;

        if let Some(feed) = guard.as_mut() {
            let json = serde_json::to_vec(&item)?;

            let separator: &[u8] = if feed.count == 0 { b"\n" } else { b",\n" };
            feed.writer.write_all(separator).await?;
            feed.writer.write_all(&json).await?;
            feed.count += 1;
        }

        Ok(item)
    }

    async fn close_spider(&self, _spider: &dyn Spider) -> Result<()> {
        if let Some(mut feed) = self.file.lock().await.take() {
            feed.writer.write_all(b"\n]\n").await?;
            feed.writer.flush().await?;
            info!(
                "Stored json feed ({} items) in: {}",
                feed.count,
                self.file_path.display()
            );
        }

        Ok(())
    }
}

/// Pipeline that writes one JSON object per line
pub struct JsonLinesPipeline {
    file_path: PathBuf,

    append: bool,

    file: Mutex<Option<FeedFile>>,
}

impl JsonLinesPipeline {
    pub fn new<P: AsRef<Path>>(file_path: P, append: bool) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            append,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait]
impl Pipeline for JsonLinesPipeline {
    async fn open_spider(&self, _spider: &dyn Spider) -> Result<()> {
        let writer = open_feed(&self.file_path, self.append).await?;
        *self.file.lock().await = Some(FeedFile { writer, count: 0 });
        Ok(())
    }

    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        _spider: &dyn Spider,
    ) -> Result<DynamicItem> {
        let mut guard = self.file.lock().await;

        if let Some(feed) = guard.as_mut() {
            let mut line = serde_json::to_vec(&item)?;
            line.push(b'\n');
            feed.writer.write_all(&line).await?;
            feed.count += 1;
        }

        Ok(item)
    }

    async fn close_spider(&self, _spider: &dyn Spider) -> Result<()> {
        if let Some(mut feed) = self.file.lock().await.take() {
            feed.writer.flush().await?;
            info!(
                "Stored jsonlines feed ({} items) in: {}",
                feed.count,
                self.file_path.display()
            );
        }

        Ok(())
    }
}

/// Enum of all pipeline types
pub enum PipelineType {
    Dummy(DummyPipeline),
    Log(LogPipeline),
    JsonFile(JsonFilePipeline),
    JsonLines(JsonLinesPipeline),
    Chained(Vec<PipelineType>),
}

impl PipelineType {
    /// Feed export pipeline for `path` in the given format
    pub fn feed<P: AsRef<Path>>(path: P, format: FeedFormat) -> Self {
        match format {
            FeedFormat::Json => PipelineType::JsonFile(JsonFilePipeline::new(path)),
            FeedFormat::JsonLines => PipelineType::JsonLines(JsonLinesPipeline::new(path, false)),
        }
    }
}

#[async_trait]
impl Pipeline for PipelineType {
    async fn process_dynamic_item(
        &self,
        item: DynamicItem,
        spider: &dyn Spider,
    ) -> Result<DynamicItem> {
        match self {
            PipelineType::Dummy(p) => p.process_dynamic_item(item, spider).await,
            PipelineType::Log(p) => p.process_dynamic_item(item, spider).await,
            PipelineType::JsonFile(p) => p.process_dynamic_item(item, spider).await,
            PipelineType::JsonLines(p) => p.process_dynamic_item(item, spider).await,
            PipelineType::Chained(pipelines) => {
                let mut current_item = item;
                for pipeline in pipelines {
                    current_item = pipeline.process_dynamic_item(current_item, spider).await?;
                }
                Ok(current_item)
            }
        }
    }

    async fn open_spider(&self, spider: &dyn Spider) -> Result<()> {
        match self {
            PipelineType::Dummy(p) => p.open_spider(spider).await,
            PipelineType::Log(p) => p.open_spider(spider).await,
            PipelineType::JsonFile(p) => p.open_spider(spider).await,
            PipelineType::JsonLines(p) => p.open_spider(spider).await,
            PipelineType::Chained(pipelines) => {
                for pipeline in pipelines {
                    pipeline.open_spider(spider).await?;
                }
                Ok(())
            }
        }
    }

    async fn close_spider(&self, spider: &dyn Spider) -> Result<()> {
        match self {
            PipelineType::Dummy(p) => p.close_spider(spider).await,
            PipelineType::Log(p) => p.close_spider(spider).await,
            PipelineType::JsonFile(p) => p.close_spider(spider).await,
            PipelineType::JsonLines(p) => p.close_spider(spider).await,
            PipelineType::Chained(pipelines) => {
                for pipeline in pipelines {
                    pipeline.close_spider(spider).await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapy_lab_core::spider::BasicSpider;
    use serde_json::{json, Value};

    fn spider() -> BasicSpider {
        BasicSpider::new("test", vec![])
    }

    fn quote(text: &str, author: Option<&str>) -> DynamicItem {
        let mut item = DynamicItem::new("quote");
        item.set("text", text).set("author", author);
        item
    }

    #[tokio::test]
    async fn test_dummy_pipeline() {
        let pipeline = DummyPipeline::new();

        let result = pipeline
            .process_dynamic_item(quote("a", None), &spider())
            .await
            .unwrap();
        assert_eq!(result.get_str("text"), Some("a"));
    }

    #[tokio::test]
    async fn test_json_file_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.json");
        let pipeline = JsonFilePipeline::new(&path);
        let spider = spider();

        pipeline.open_spider(&spider).await.unwrap();
        pipeline
            .process_dynamic_item(quote("“Hé”", Some("Albert Einstein")), &spider)
            .await
            .unwrap();
        pipeline
            .process_dynamic_item(quote("second", None), &spider)
            .await
            .unwrap();
        pipeline.close_spider(&spider).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("“Hé”"));

        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            parsed,
            json!([
                {"text": "“Hé”", "author": "Albert Einstein"},
                {"text": "second", "author": null}
            ])
        );
    }

    #[tokio::test]
    async fn test_json_file_pipeline_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        let pipeline = JsonFilePipeline::new(&path);

        pipeline.open_spider(&spider()).await.unwrap();
        pipeline.close_spider(&spider()).await.unwrap();

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, json!([]));
    }

    #[tokio::test]
    async fn test_json_lines_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.jsonl");
        let pipeline = PipelineType::feed(&path, FeedFormat::from_path(&path));
        let spider = spider();

        pipeline.open_spider(&spider).await.unwrap();
        for text in ["a", "b", "c"] {
            pipeline
                .process_dynamic_item(quote(text, Some("x")), &spider)
                .await
                .unwrap();
        }
        pipeline.close_spider(&spider).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], r#"{"text":"a","author":"x"}"#);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_json_file_pipeline_concurrent_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concurrent.json");
        let pipeline = std::sync::Arc::new(JsonFilePipeline::new(&path));

        pipeline.open_spider(&spider()).await.unwrap();
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let pipeline = std::sync::Arc::clone(&pipeline);
                tokio::spawn(async move {
                    pipeline
                        .process_dynamic_item(quote(&format!("q{}", i), None), &spider())
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        pipeline.close_spider(&spider()).await.unwrap();

        let parsed: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 32);
        for i in 0..32 {
            let text = format!("q{}", i);
            assert!(parsed.iter().any(|item| item["text"] == json!(text)));
        }
    }

    #[tokio::test]
    async fn test_json_lines_pipeline_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.jl");
        std::fs::write(&path, "{\"text\":\"old\",\"author\":null}\n").unwrap();
        let pipeline = JsonLinesPipeline::new(&path, true);
        let spider = spider();

        pipeline.open_spider(&spider).await.unwrap();
        pipeline
            .process_dynamic_item(quote("new", None), &spider)
            .await
            .unwrap();
        pipeline.close_spider(&spider).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"text":"old","author":null}"#,
                r#"{"text":"new","author":null}"#
            ]
        );
    }

    #[tokio::test]
    async fn test_pipeline_enum_chain() {
        let chained = PipelineType::Chained(vec![
            PipelineType::Dummy(DummyPipeline::new()),
            PipelineType::Log(LogPipeline::info()),
        ]);

        let result = chained
            .process_dynamic_item(quote("value", None), &spider())
            .await
            .unwrap();
        assert_eq!(result.get_str("text"), Some("value"));
    }

    #[test]
    fn test_feed_format() {
        assert_eq!(FeedFormat::from_path("out.json"), FeedFormat::Json);
        assert_eq!(FeedFormat::from_path("out.jl"), FeedFormat::JsonLines);
        assert_eq!("jsonlines".parse::<FeedFormat>().unwrap(), FeedFormat::JsonLines);
        assert!("csv".parse::<FeedFormat>().is_err());
    }
}
