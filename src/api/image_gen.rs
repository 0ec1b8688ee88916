use crate::config::Config;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

const MAX_POLLS: u32 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Generate one illustration via the diffusion server and save it as PNG.
///
/// The server runs inference asynchronously: submit returns a task id which
/// is polled until the render succeeds, fails, or the poll budget runs out.
pub async fn generate_image(
    client: &Client,
    cfg: &Config,
    prompt: &str,
    out_png_path: &Path,
) -> Result<()> {
    if prompt.trim().is_empty() {
        anyhow::bail!("image prompt cannot be empty");
    }

    let styled = if cfg.image_style_prefix.is_empty() {
        prompt.to_string()
    } else {
        format!("{} {}", cfg.image_style_prefix, prompt)
    };

    let base = cfg.image_gen_url.trim_end_matches('/');
    let body = serde_json::json!({
        "prompt": styled,
        "width": cfg.width,
        "height": cfg.height,
        "steps": 20,
    });

    let resp = client
        .post(format!("{base}/api/generate"))
        .json(&body)
        .timeout(Duration::from_secs(60))
        .send()
        .await
        .context("image generation submit failed")?;

    if !resp.status().is_success() {
        anyhow::bail!("image generation submit HTTP {}", resp.status().as_u16());
    }

    let submit: SubmitResponse = resp.json().await.context("bad submit response")?;
    info!("Image task submitted: {}", submit.task_id);

    let image_url = wait_for_task(client, base, &submit.task_id).await?;

    let image_data = client
        .get(&image_url)
        .timeout(Duration::from_secs(120))
        .send()
        .await
        .context("image download failed")?
        .bytes()
        .await?;

    if let Some(parent) = out_png_path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    fs::write(out_png_path, &image_data).await?;

    Ok(())
}

async fn wait_for_task(client: &Client, base: &str, task_id: &str) -> Result<String> {
    for attempt in 0..MAX_POLLS {
        tokio::time::sleep(POLL_INTERVAL).await;

        let resp = client
            .get(format!("{base}/api/tasks/{task_id}"))
            .timeout(Duration::from_secs(30))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!("task poll HTTP {} (attempt {})", resp.status().as_u16(), attempt + 1);
                continue;
            }
            Err(err) => {
                warn!("task poll failed: {err} (attempt {})", attempt + 1);
                continue;
            }
        };

        let task: TaskResponse = match resp.json().await {
            Ok(task) => task,
            Err(err) => {
                warn!("task poll parse failed: {err}");
                continue;
            }
        };

        match task.status.as_str() {
            "succeeded" => {
                return task
                    .image_url
                    .ok_or_else(|| anyhow::anyhow!("task succeeded without an image URL"));
            }
            "failed" => {
                anyhow::bail!(
                    "image generation failed: {}",
                    task.error.unwrap_or_else(|| "unknown".to_string())
                );
            }
            other => {
                info!("task {task_id} status: {other} ({}/{MAX_POLLS})", attempt + 1);
            }
        }
    }

    anyhow::bail!("image generation timed out after {MAX_POLLS} polls")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_response_parses_minimal_payload() {
        let task: TaskResponse = serde_json::from_str(r#"{"status": "pending"}"#).unwrap();
        assert_eq!(task.status, "pending");
        assert!(task.image_url.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn task_response_parses_success_payload() {
        let task: TaskResponse =
            serde_json::from_str(r#"{"status": "succeeded", "image_url": "http://x/y.png"}"#)
                .unwrap();
        assert_eq!(task.image_url.as_deref(), Some("http://x/y.png"));
    }
}
