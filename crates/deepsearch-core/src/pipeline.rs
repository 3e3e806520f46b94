//! Search → fetch → summarise fan-out for a single query.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::metrics::{record_fetch_failures, record_search};
use crate::prompts::SummaryPromptInput;
use crate::providers::{DynPageFetcher, DynWebSearch, SearchHit};
use crate::state::{ConversationMessage, EvidenceRecord, render_messages};
use crate::summarizer::PageSummarizer;

/// Turns one query string into enriched evidence records.
///
/// Every call yields at least one record. Provider trouble shows up as
/// sentinel records or error text inside a record, never as an `Err`.
#[derive(Clone)]
pub struct EvidencePipeline {
    search: DynWebSearch,
    fetcher: DynPageFetcher,
    summarizer: PageSummarizer,
    result_count: usize,
}

impl EvidencePipeline {
    pub fn new(
        search: DynWebSearch,
        fetcher: DynPageFetcher,
        summarizer: PageSummarizer,
        result_count: usize,
    ) -> Self {
        Self {
            search,
            fetcher,
            summarizer,
            result_count: result_count.max(1),
        }
    }

    #[instrument(
        name = "pipeline.gather",
        skip(self, conversation, cancel),
        fields(query = %query)
    )]
    pub async fn gather(
        &self,
        query: &str,
        conversation: &[ConversationMessage],
        cancel: &CancellationToken,
    ) -> Vec<EvidenceRecord> {
        let hits = match self.search.search(query, self.result_count, cancel).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "search failed; recording error sentinel");
                record_search("error", 0);
                return vec![EvidenceRecord::search_error(&err.to_string())];
            }
        };

        let hits = distinct_hits(hits);
        record_search("ok", hits.len());
        if hits.is_empty() {
            info!("search returned no usable results");
            return vec![EvidenceRecord::no_results()];
        }

        let urls: Vec<String> = hits.iter().map(|hit| hit.link.clone()).collect();
        let outcomes = self.fetcher.fetch_many(&urls, cancel).await;
        let failures = outcomes.iter().filter(|outcome| outcome.result.is_err()).count();
        if failures > 0 {
            warn!(failures, total = urls.len(), "some pages could not be fetched");
        }
        record_fetch_failures(failures);

        let pages: HashMap<String, String> = outcomes
            .into_iter()
            .map(|outcome| {
                let content = outcome.content_or_placeholder();
                (outcome.url, content)
            })
            .collect();

        let conversation = render_messages(conversation);
        let records = hits.into_iter().map(|hit| {
            let raw_content = pages
                .get(&hit.link)
                .cloned()
                .unwrap_or_else(|| "Error: page was not fetched".to_string());
            self.enrich(query, &conversation, hit, raw_content)
        });
        let records = join_all(records).await;

        info!(results = records.len(), failures, "evidence gathered");
        records
    }

    async fn enrich(
        &self,
        query: &str,
        conversation: &str,
        hit: SearchHit,
        raw_content: String,
    ) -> EvidenceRecord {
        let date = hit.date_label();
        let summary = self
            .summarizer
            .summarize(&SummaryPromptInput {
                query,
                title: &hit.title,
                url: &hit.link,
                date: &date,
                snippet: &hit.snippet,
                conversation,
                content: &raw_content,
            })
            .await;

        EvidenceRecord {
            title: hit.title,
            url: hit.link,
            snippet: hit.snippet,
            date,
            raw_content,
            summary,
        }
    }
}

/// Drops hits without a link and repeats of an earlier link, keeping provider order.
fn distinct_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .map(|mut hit| {
            hit.link = hit.link.trim().to_string();
            hit
        })
        .filter(|hit| !hit.link.is_empty() && seen.insert(hit.link.clone()))
        .collect()
}
