//! Language-model capability contracts.
//!
//! The research loop never talks to a model vendor directly. It goes through
//! [`Oracle`], which offers structured generation (validated against a JSON
//! schema), plain text generation, and token streaming.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResearchError, Result};

/// Which model class a request should be served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Planning, decisions, and the final answer.
    #[default]
    Primary,
    /// High-volume per-page summarisation.
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub tier: ModelTier,
}

impl OracleRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            tier: ModelTier::Primary,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }
}

/// JSON schema handed to the oracle for structured generation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Delta(String),
    Finish(Usage),
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce a JSON value intended to satisfy `schema`.
    async fn generate_object(&self, request: OracleRequest, schema: &OutputSchema)
    -> Result<Value>;

    async fn generate_text(&self, request: OracleRequest) -> Result<String>;

    async fn stream_text(&self, request: OracleRequest) -> Result<TextStream>;
}

pub type DynOracle = Arc<dyn Oracle>;

/// A typed shape the oracle can be asked to fill.
pub trait StructuredOutput: DeserializeOwned {
    const NAME: &'static str;

    fn schema() -> Value;

    /// Checks the schema language cannot express (non-empty strings, list bounds).
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    fn output_schema() -> OutputSchema {
        OutputSchema {
            name: Self::NAME,
            schema: Self::schema(),
        }
    }
}

/// Ask the oracle for `T` and reject anything that does not decode and validate.
pub async fn generate_structured<T: StructuredOutput>(
    oracle: &dyn Oracle,
    request: OracleRequest,
) -> Result<T> {
    let schema = T::output_schema();
    let value = oracle.generate_object(request, &schema).await?;
    let parsed: T = serde_json::from_value(value)
        .map_err(|err| ResearchError::schema_violation(T::NAME, err.to_string()))?;
    parsed
        .validate()
        .map_err(|reason| ResearchError::schema_violation(T::NAME, reason))?;
    Ok(parsed)
}
