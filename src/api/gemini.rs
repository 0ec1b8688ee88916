use crate::config::Config;
use crate::script::TextGenerator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Text-generation collaborator backed by the Gemini REST API.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_key: cfg.gemini_key.clone(),
            model: cfg.gemini_model.clone(),
        }
    }
}

fn extract_candidate_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            warn!("Gemini error message: {msg}");
        }
        if let Some(status) = err.get("status").and_then(|v| v.as_str()) {
            warn!("Gemini error status: {status}");
        }
        return None;
    }

    let parts = root
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    for part in parts {
        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
    }

    None
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{GEMINI_BASE}/{}:generateContent", self.model);

        let body = json!({
            "contents": [
                {"parts": [{"text": prompt}]}
            ],
        });

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .timeout(std::time::Duration::from_secs(600))
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet = raw.chars().take(800).collect::<String>();
            anyhow::bail!("Gemini HTTP {}: {}", status.as_u16(), snippet);
        }

        extract_candidate_text(&raw).ok_or_else(|| {
            let snippet = raw.chars().take(800).collect::<String>();
            anyhow::anyhow!("Gemini response had no candidate text: {snippet}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "hello"}]}}]}"#;
        assert_eq!(extract_candidate_text(raw), Some("hello".to_string()));
    }

    #[test]
    fn error_payload_yields_none() {
        let raw = r#"{"error": {"message": "quota", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(extract_candidate_text(raw), None);
    }

    #[test]
    fn empty_parts_yield_none() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "  "}]}}]}"#;
        assert_eq!(extract_candidate_text(raw), None);
    }
}
