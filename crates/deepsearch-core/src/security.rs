use std::env;
use std::fmt;

use reqwest::header::HeaderValue;

use crate::ResearchError;

/// API credential that never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The raw value as a header marked sensitive, so HTTP tracing masks it.
    pub fn header_value(&self) -> Result<HeaderValue, ResearchError> {
        sensitive_header(&self.0)
    }

    /// `Bearer <value>`, for `Authorization` headers.
    pub fn bearer_header(&self) -> Result<HeaderValue, ResearchError> {
        sensitive_header(&format!("Bearer {}", self.0))
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***redacted***")
    }
}

fn sensitive_header(raw: &str) -> Result<HeaderValue, ResearchError> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| {
        ResearchError::InvalidConfiguration("API key is not a valid header value".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Read a credential from the environment; blank values count as missing.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value.trim().to_string())),
        _ => Err(ResearchError::MissingSecret(var.to_string())),
    }
}
