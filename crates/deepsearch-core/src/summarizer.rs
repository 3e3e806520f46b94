use tracing::{debug, warn};

use crate::cache::{SummaryCache, cache_key};
use crate::oracle::{DynOracle, ModelTier, OracleRequest};
use crate::prompts::{SUMMARY_SYSTEM, SummaryPromptInput, summary_prompt};

const CACHE_NAMESPACE: &str = "summarize_page";

/// Condenses one fetched page into a query-focused synthesis.
#[derive(Clone)]
pub struct PageSummarizer {
    oracle: DynOracle,
    cache: SummaryCache,
}

impl PageSummarizer {
    pub fn new(oracle: DynOracle, cache: SummaryCache) -> Self {
        Self { oracle, cache }
    }

    pub fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    /// Never fails: an oracle error becomes the summary text so the record
    /// still reaches the research state.
    pub async fn summarize(&self, input: &SummaryPromptInput<'_>) -> String {
        let compute = || async move {
            let request = OracleRequest::new(summary_prompt(input))
                .with_system(SUMMARY_SYSTEM)
                .with_tier(ModelTier::Summary);
            self.oracle.generate_text(request).await
        };

        let outcome = match cache_key(CACHE_NAMESPACE, input) {
            Ok(key) => self.cache.get_or_compute(&key, compute).await,
            Err(err) => {
                warn!(error = %err, "summary cache key unavailable; bypassing cache");
                compute().await
            }
        };

        match outcome {
            Ok(summary) => {
                debug!(url = input.url, chars = summary.len(), "page summarised");
                summary
            }
            Err(err) => {
                warn!(url = input.url, error = %err, "summarisation failed");
                format!("Error summarizing content: {err}")
            }
        }
    }
}
