//! Web search and page fetch capability contracts plus HTTP implementations.

pub mod fetch;
pub mod openai;
pub mod serper;

pub use fetch::HttpPageFetcher;
pub use openai::OpenAiOracle;
pub use serper::SerperSearch;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One organic result returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub date: Option<String>,
}

impl SearchHit {
    pub fn date_label(&self) -> String {
        match self.date.as_deref().map(str::trim) {
            Some(date) if !date.is_empty() => format!("Published: {date}"),
            _ => "Date not available".to_string(),
        }
    }
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Fails with [`crate::ResearchError::Provider`] on transport or quota failure.
    async fn search(
        &self,
        query: &str,
        result_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>>;
}

/// Outcome of fetching a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub url: String,
    pub result: std::result::Result<String, String>,
}

impl FetchOutcome {
    pub fn success(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            result: Ok(content.into()),
        }
    }

    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            result: Err(error.into()),
        }
    }

    /// Page content, or an `Error: ...` placeholder the summariser can reason about.
    pub fn content_or_placeholder(&self) -> String {
        match &self.result {
            Ok(content) => content.clone(),
            Err(error) if error.trim().is_empty() => "Error: Unknown error".to_string(),
            Err(error) => format!("Error: {error}"),
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Returns exactly one outcome per input URL, in input order.
    async fn fetch_many(&self, urls: &[String], cancel: &CancellationToken) -> Vec<FetchOutcome>;
}

pub type DynWebSearch = Arc<dyn WebSearch>;
pub type DynPageFetcher = Arc<dyn PageFetcher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_label_formats_known_and_missing_dates() {
        let mut hit = SearchHit {
            title: "t".into(),
            link: "https://t.test".into(),
            snippet: "s".into(),
            date: Some("Mar 3, 2025".into()),
        };
        assert_eq!(hit.date_label(), "Published: Mar 3, 2025");
        hit.date = Some("  ".into());
        assert_eq!(hit.date_label(), "Date not available");
        hit.date = None;
        assert_eq!(hit.date_label(), "Date not available");
    }

    #[test]
    fn placeholder_describes_failure() {
        let failed = FetchOutcome::failure("https://x.test", "status 404");
        assert_eq!(failed.content_or_placeholder(), "Error: status 404");
        let ok = FetchOutcome::success("https://x.test", "body");
        assert_eq!(ok.content_or_placeholder(), "body");
    }
}
