//! Subcommand bodies, kept free of terminal I/O so they can be tested

use anyhow::{Context, Result};
use key_pool::{Credential, CredentialStatus};
use provider::{GenerateRequest, GenerateResponse};

/// Build a request from a prompt and an optional JSON generation config.
pub fn build_request(
    model: &str,
    prompt: &str,
    config_json: Option<&str>,
) -> Result<GenerateRequest> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        anyhow::bail!("prompt is empty");
    }

    let mut request = GenerateRequest::text(model, prompt);
    if let Some(raw) = config_json {
        let config: serde_json::Value =
            serde_json::from_str(raw).context("--config-json is not valid JSON")?;
        if !config.is_object() {
            anyhow::bail!("--config-json must be a JSON object");
        }
        request = request.with_generation_config(config);
    }
    Ok(request)
}

/// One line per key: cursor marker, id, masked secret, status, error count.
pub fn render_key_list(credentials: &[Credential], active_index: usize) -> String {
    if credentials.is_empty() {
        return "no API keys configured\n".to_string();
    }

    let mut out = String::new();
    for (i, c) in credentials.iter().enumerate() {
        let marker = if i == active_index { '*' } else { ' ' };
        let checked = c
            .last_checked_at
            .map(|ms| format!("checked_at={ms}"))
            .unwrap_or_else(|| "never checked".to_string());
        out.push_str(&format!(
            "{marker} {}  {:<8}  {:<9}  errors={}  {checked}\n",
            c.id,
            c.secret.hint(),
            c.status.label(),
            c.error_count,
        ));
    }
    out
}

/// Short summary after `keys import`.
pub fn render_import(credentials: &[Credential]) -> String {
    let unchecked = credentials
        .iter()
        .filter(|c| c.status == CredentialStatus::Unchecked)
        .count();
    format!(
        "imported {} key(s), {unchecked} unchecked; run `studio keys validate` to probe them\n",
        credentials.len()
    )
}

/// Response text followed by a line per inline attachment.
pub fn render_response(response: &GenerateResponse) -> String {
    let mut out = response.text.clone();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    for data in &response.inline_data {
        out.push_str(&format!(
            "[inline {} ({} base64 chars)]\n",
            data.mime_type,
            data.data.len()
        ));
    }
    out
}
