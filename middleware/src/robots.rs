//! robots.txt enforcement backed by `texting_robots`, cached per origin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use scrapy_lab_core::async_trait;
use scrapy_lab_core::error::{Error, Result};
use scrapy_lab_core::request::Request;
use scrapy_lab_core::spider::Spider;
use texting_robots::Robot;
use tokio::sync::Mutex;
use url::Url;

use crate::{MiddlewarePriority, RequestMiddleware};

/// The robots.txt rules of one site as they apply to our user agent
pub struct RobotsTxt {
    /// `None` when the site has no usable robots.txt
    robot: Option<Robot>,
}

impl RobotsTxt {
    /// Rules for `user_agent` in `content`. Content that cannot be parsed
    /// allows everything.
    pub fn parse(user_agent: &str, content: &[u8]) -> Self {
        match Robot::new(product_token(user_agent), content) {
            Ok(robot) => Self { robot: Some(robot) },
            Err(e) => {
                warn!("Ignoring unparsable robots.txt: {}", e);
                Self::allow_all()
            }
        }
    }

    pub fn allow_all() -> Self {
        Self { robot: None }
    }

    /// Whether `url` (absolute, or a path with optional query) may be fetched
    pub fn is_allowed(&self, url: &str) -> bool {
        self.robot.as_ref().map_or(true, |robot| robot.allowed(url))
    }

    /// `Crawl-delay` declared for our user agent
    pub fn crawl_delay(&self) -> Option<Duration> {
        let delay = self.robot.as_ref()?.delay?;
        (delay.is_finite() && delay > 0.0).then(|| Duration::from_secs_f32(delay))
    }
}

/// `scrapy_lab/0.1.0 (+https://...)` matches robots.txt groups as `scrapy_lab`
fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .find(|token| !token.is_empty())
        .unwrap_or("*")
}

/// Drops requests disallowed by the target site's robots.txt
pub struct RobotsTxtMiddleware {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<HashMap<String, Arc<RobotsTxt>>>,
}

impl RobotsTxtMiddleware {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            user_agent: user_agent.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn rules_for(&self, url: &Url) -> Arc<RobotsTxt> {
        let origin = url.origin().ascii_serialization();

        let mut cache = self.cache.lock().await;
        if let Some(rules) = cache.get(&origin) {
            return Arc::clone(rules);
        }

        let robots_url = format!("{}/robots.txt", origin);
        let rules = match self
            .client
            .get(&robots_url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(content) => RobotsTxt::parse(&self.user_agent, &content),
                Err(e) => {
                    warn!("Failed to read {}: {}", robots_url, e);
                    RobotsTxt::allow_all()
                }
            },
            Ok(resp) => {
                debug!("No robots.txt at {} ({})", robots_url, resp.status());
                RobotsTxt::allow_all()
            }
            Err(e) => {
                warn!("Failed to fetch {}: {}", robots_url, e);
                RobotsTxt::allow_all()
            }
        };

        if let Some(delay) = rules.crawl_delay() {
            debug!("{} asks for a crawl delay of {:?}", origin, delay);
        }

        let rules = Arc::new(rules);
        cache.insert(origin, Arc::clone(&rules));
        rules
    }
}

#[async_trait]
impl RequestMiddleware for RobotsTxtMiddleware {
    async fn process_request(&self, request: Request, _spider: &dyn Spider) -> Result<Request> {
        let rules = self.rules_for(&request.url).await;

        if rules.is_allowed(request.url.as_str()) {
            Ok(request)
        } else {
            Err(Error::IgnoreRequest(format!(
                "forbidden by robots.txt: {}",
                request.url
            )))
        }
    }

    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Highest
    }

    fn name(&self) -> &str {
        "RobotsTxtMiddleware"
    }

    fn should_process_request(&self, request: &Request, _spider: &dyn Spider) -> bool {
        request.url.scheme().starts_with("http")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let robots = RobotsTxt::parse(
            "TestBot",
            br#"
User-agent: *
Disallow: /private/
Disallow: /admin/
Allow: /private/public/  # still reachable

Sitemap: https://example.com/sitemap.xml
"#,
        );

        assert!(robots.is_allowed("/page"));
        assert!(!robots.is_allowed("/private/page"));
        assert!(robots.is_allowed("/private/public/page"));
        assert!(!robots.is_allowed("https://example.com/admin/"));
    }

    #[test]
    fn test_specific_user_agent_group() {
        let content = b"User-agent: *\nDisallow: /\n\nUser-agent: scrapy_lab\nDisallow:\n";

        assert!(!RobotsTxt::parse("BadBot", content).is_allowed("/page"));
        assert!(RobotsTxt::parse("scrapy_lab/0.1.0", content).is_allowed("/page"));
    }

    #[test]
    fn test_wildcards() {
        let robots = RobotsTxt::parse(
            "bot",
            b"User-agent: *\nDisallow: /*.pdf$\nDisallow: /tmp*/cache",
        );

        assert!(!robots.is_allowed("/docs/file.pdf"));
        assert!(robots.is_allowed("/docs/file.pdf.html"));
        assert!(!robots.is_allowed("/tmp1/cache/x"));
        assert!(robots.is_allowed("/tmp1/other"));
    }

    #[test]
    fn test_crawl_delay() {
        let robots = RobotsTxt::parse("bot", b"User-agent: *\nCrawl-delay: 2\nDisallow:\n");
        assert_eq!(robots.crawl_delay(), Some(Duration::from_secs(2)));
        assert_eq!(RobotsTxt::allow_all().crawl_delay(), None);
    }

    #[test]
    fn test_product_token() {
        assert_eq!(product_token("scrapy_lab/0.1.0 (+https://x)"), "scrapy_lab");
        assert_eq!(product_token("Mozilla/5.0"), "Mozilla");
        assert_eq!(product_token(""), "*");
    }

    #[test]
    fn test_empty_allows_all() {
        assert!(RobotsTxt::allow_all().is_allowed("/anything"));
    }
}
