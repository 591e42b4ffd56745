//! Gemini provider: `generateContent` over REST
//!
//! Each call authenticates with the `x-goog-api-key` header, so one
//! `GeminiProvider` serves every key in the pool. Error bodies of the form
//! `{"error":{"code":400,"message":"...","status":"INVALID_ARGUMENT"}}` are
//! flattened into a single readable message that keeps the status string,
//! because downstream classification works on message text.

use crate::{GenerateRequest, GenerateResponse, InlineData, Provider, ProviderError};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Cheap model used by `probe`.
pub const DEFAULT_PROBE_MODEL: &str = "gemini-2.0-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// REST client for the Gemini `generateContent` endpoint.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    probe_model: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            probe_model: DEFAULT_PROBE_MODEL.to_string(),
            timeout,
        }
    }

    pub fn with_probe_model(mut self, model: impl Into<String>) -> Self {
        self.probe_model = model.into();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn call(&self, secret: &str, request: &GenerateRequest) -> crate::Result<GenerateResponse> {
        let mut body = serde_json::json!({ "contents": request.contents });
        if let Some(config) = &request.generation_config {
            body["generationConfig"] = config.clone();
        }

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, secret)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "generation request failed before a response");
                if e.is_timeout() {
                    ProviderError::new(format!("request timed out after {:?}", self.timeout))
                } else {
                    ProviderError::new(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::with_status(status.as_u16(), format!("reading response body: {e}")))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "upstream returned error status");
            return Err(error_from_body(status.as_u16(), &text));
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::with_status(status.as_u16(), format!("invalid response JSON: {e}")))?;
        Ok(parse_response(value))
    }
}

impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn generate<'a>(
        &'a self,
        secret: &'a str,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = crate::Result<GenerateResponse>> + Send + 'a>> {
        Box::pin(self.call(secret, request))
    }

    fn probe<'a>(
        &'a self,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let request = GenerateRequest::text(self.probe_model.clone(), "ping")
                .with_generation_config(serde_json::json!({ "maxOutputTokens": 1 }));
            self.call(secret, &request).await.map(|_| ())
        })
    }
}

/// Turn a non-2xx body into a `ProviderError`.
///
/// Structured bodies become `"[code] message (STATUS)"`; anything else keeps
/// the raw text so nothing the service said is lost.
fn error_from_body(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = envelope.error.code.unwrap_or(status);
            let message = match envelope.error.status {
                Some(s) => format!("[{code}] {} ({s})", envelope.error.message),
                None => format!("[{code}] {}", envelope.error.message),
            };
            ProviderError::with_status(status, message)
        }
        Err(_) => {
            let trimmed = body.trim();
            let message = if trimmed.is_empty() {
                format!("[{status}] empty error response")
            } else {
                format!("[{status}] {trimmed}")
            };
            ProviderError::with_status(status, message)
        }
    }
}

/// Pull text and inline data out of the first candidate.
fn parse_response(value: serde_json::Value) -> GenerateResponse {
    let mut text = String::new();
    let mut inline_data = Vec::new();

    if let Some(parts) = value
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
            if let Some(inline) = part.get("inlineData") {
                let mime_type = inline
                    .get("mimeType")
                    .and_then(|m| m.as_str())
                    .unwrap_or("application/octet-stream");
                let data = inline.get("data").and_then(|d| d.as_str()).unwrap_or("");
                inline_data.push(InlineData {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                });
            }
        }
    }

    GenerateResponse {
        text,
        candidates: value.get("candidates").cloned(),
        inline_data,
    }
}
