// Engine statistics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Statistics for the crawler engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Number of requests sent
    pub request_count: usize,

    /// Number of responses received
    pub response_count: usize,

    /// Number of responses that came back through the Zyte API
    pub api_response_count: usize,

    /// Number of items that went through the pipelines
    pub item_count: usize,

    /// Number of errors
    pub error_count: usize,

    /// Requests dropped by a middleware (offsite, robots.txt)
    pub filtered_count: usize,

    /// Requests dropped as duplicates
    pub duplicate_count: usize,

    /// Why the crawl finished
    pub finish_reason: Option<String>,

    /// Start time of the crawl
    #[serde(skip)]
    pub start_time: Option<Instant>,

    /// End time of the crawl
    #[serde(skip)]
    pub end_time: Option<Instant>,
}

impl EngineStats {
    /// Calculate the duration of the crawl
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            (Some(start), None) => Some(Instant::now().duration_since(start)),
            _ => None,
        }
    }

    /// Calculate the requests per second
    pub fn requests_per_second(&self) -> Option<f64> {
        self.duration().map(|duration| {
            let seconds = duration.as_secs_f64();
            if seconds > 0.0 {
                self.request_count as f64 / seconds
            } else {
                0.0
            }
        })
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests, {} responses ({} via Zyte API), {} items, {} errors, {} filtered, {} duplicates",
            self.request_count,
            self.response_count,
            self.api_response_count,
            self.item_count,
            self.error_count,
            self.filtered_count,
            self.duplicate_count,
        )?;
        if let Some(duration) = self.duration() {
            write!(f, ", {:.2}s elapsed", duration.as_secs_f64())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_rate() {
        let stats = EngineStats {
            request_count: 4,
            response_count: 3,
            api_response_count: 2,
            item_count: 10,
            ..Default::default()
        };

        let line = stats.to_string();
        assert!(line.starts_with("4 requests, 3 responses (2 via Zyte API), 10 items"));
        assert!(stats.requests_per_second().is_none());
    }
}
