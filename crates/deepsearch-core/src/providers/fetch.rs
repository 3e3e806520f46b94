use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{FetchOutcome, PageFetcher};
use crate::config::FetchConfig;

const TEXT_WIDTH: usize = 120;

/// Fetches pages over HTTP and reduces HTML to readable text.
pub struct HttpPageFetcher {
    http: Client,
    timeout: Duration,
    max_chars: usize,
}

impl HttpPageFetcher {
    pub fn new(http: Client, config: &FetchConfig) -> Self {
        Self {
            http,
            timeout: Duration::from_millis(config.timeout_ms),
            max_chars: config.max_chars.max(1),
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<String, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("html"))
            .unwrap_or(true);

        let body = response
            .bytes()
            .await
            .map_err(|err| format!("failed to read body: {err}"))?;

        let text = if is_html {
            html2text::from_read(body.as_ref(), TEXT_WIDTH)
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };

        Ok(truncate_chars(text.trim(), self.max_chars))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(name = "fetch.http", skip(self, urls, cancel), fields(urls = urls.len()))]
    async fn fetch_many(&self, urls: &[String], cancel: &CancellationToken) -> Vec<FetchOutcome> {
        let fetches = urls.iter().map(|url| async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err("fetch cancelled".to_string()),
                outcome = tokio::time::timeout(self.timeout, self.fetch_one(url)) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(format!("timed out after {} ms", self.timeout.as_millis())),
                },
            };

            match result {
                Ok(content) => {
                    debug!(%url, chars = content.len(), "page fetched");
                    FetchOutcome::success(url.clone(), content)
                }
                Err(error) => {
                    warn!(%url, %error, "page fetch failed");
                    FetchOutcome::failure(url.clone(), error)
                }
            }
        });

        join_all(fetches).await
    }
}
