use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, warn};

use crate::config::LlmConfig;
use crate::error::{ResearchError, Result};
use crate::oracle::{
    ModelTier, Oracle, OracleRequest, OutputSchema, StreamChunk, TextStream, Usage,
};
use crate::security::SecretValue;

/// Oracle backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiOracle {
    http: Client,
    base_url: String,
    model: String,
    summary_model: String,
    api_key: SecretValue,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatStreamResponse {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

impl OpenAiOracle {
    pub fn new(http: Client, config: &LlmConfig, api_key: SecretValue) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            summary_model: config.summary_model().to_string(),
            api_key,
        }
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.model,
            ModelTier::Summary => &self.summary_model,
        }
    }

    fn chat_request<'a>(&'a self, request: &'a OracleRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: self.model_for(request.tier),
            messages,
            response_format: None,
            stream: None,
            stream_options: None,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.api_key.bearer_header()?)
            .json(body)
            .send()
            .await
            .map_err(|err| ResearchError::Oracle(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            return Err(ResearchError::Oracle(format!("{status}: {detail}")));
        }
        Ok(response)
    }

    async fn complete(&self, body: &ChatRequest<'_>) -> Result<String> {
        let response: ChatResponse = self
            .send(body)
            .await?
            .json()
            .await
            .map_err(|err| ResearchError::Oracle(format!("invalid completion payload: {err}")))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    #[instrument(
        name = "oracle.generate_object",
        skip(self, request, schema),
        fields(schema = schema.name)
    )]
    async fn generate_object(
        &self,
        request: OracleRequest,
        schema: &OutputSchema,
    ) -> Result<Value> {
        let mut body = self.chat_request(&request);
        body.response_format = Some(json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
                "strict": true,
            }
        }));

        let content = self.complete(&body).await?;
        serde_json::from_str(&content)
            .map_err(|err| ResearchError::schema_violation(schema.name, err.to_string()))
    }

    #[instrument(name = "oracle.generate_text", skip(self, request))]
    async fn generate_text(&self, request: OracleRequest) -> Result<String> {
        let body = self.chat_request(&request);
        self.complete(&body).await
    }

    #[instrument(name = "oracle.stream_text", skip(self, request))]
    async fn stream_text(&self, request: OracleRequest) -> Result<TextStream> {
        let mut body = self.chat_request(&request);
        body.stream = Some(true);
        body.stream_options = Some(json!({ "include_usage": true }));

        let response = self.send(&body).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::default();
            let mut bytes = response.bytes_stream();
            let mut usage = Usage::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(ResearchError::Oracle(format!(
                            "stream read error: {err}"
                        ))));
                        return;
                    }
                };

                for data in lines.feed(&chunk) {
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamChunk::Finish(usage)));
                        return;
                    }
                    match serde_json::from_str::<ChatStreamResponse>(&data) {
                        Ok(event) => {
                            if let Some(reported) = event.usage {
                                usage = reported;
                            }
                            let delta = event
                                .choices
                                .into_iter()
                                .filter_map(|choice| choice.delta.content)
                                .collect::<String>();
                            if !delta.is_empty() && tx.send(Ok(StreamChunk::Delta(delta))).is_err()
                            {
                                debug!("stream consumer dropped");
                                return;
                            }
                        }
                        Err(err) => warn!(error = %err, "skipping unparseable stream event"),
                    }
                }
            }

            let _ = tx.send(Ok(StreamChunk::Finish(usage)));
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Splits an SSE byte stream into `data:` payloads across chunk boundaries.
///
/// Bytes are held until a full line arrives, so a UTF-8 character split
/// between chunks is decoded intact.
#[derive(Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "skipping stream line with invalid UTF-8");
                    continue;
                }
            };
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}
