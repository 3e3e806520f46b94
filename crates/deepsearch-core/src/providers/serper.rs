use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{SearchHit, WebSearch};
use crate::error::{ResearchError, Result};
use crate::security::SecretValue;

/// Google search through the Serper API.
pub struct SerperSearch {
    http: Client,
    endpoint: String,
    api_key: SecretValue,
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
    date: Option<String>,
}

impl From<SerperOrganic> for SearchHit {
    fn from(result: SerperOrganic) -> Self {
        Self {
            title: result.title.unwrap_or_else(|| "Untitled".to_string()),
            link: result.link.unwrap_or_default(),
            snippet: result
                .snippet
                .unwrap_or_else(|| "No description available".to_string()),
            date: result.date,
        }
    }
}

impl SerperSearch {
    pub fn new(http: Client, endpoint: impl Into<String>, api_key: SecretValue) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    async fn execute(&self, query: &str, result_count: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-API-KEY", self.api_key.header_value()?)
            .json(&SerperRequest {
                q: query,
                num: result_count,
            })
            .send()
            .await
            .map_err(|err| ResearchError::Provider(format!("search request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(400).collect();
            return Err(ResearchError::Provider(format!(
                "search provider returned {status}: {detail}"
            )));
        }

        let payload: SerperResponse = response
            .json()
            .await
            .map_err(|err| ResearchError::Provider(format!("invalid search payload: {err}")))?;

        Ok(payload
            .organic
            .into_iter()
            .take(result_count)
            .map(SearchHit::from)
            .collect())
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    #[instrument(name = "search.serper", skip(self, cancel))]
    async fn search(
        &self,
        query: &str,
        result_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        let hits = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ResearchError::Provider("search cancelled".to_string()));
            }
            hits = self.execute(query, result_count) => hits?,
        };
        debug!(results = hits.len(), "search completed");
        Ok(hits)
    }
}
