use crate::config::Config;
use crate::script::Emotion;
use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Prosody parameters sent alongside the text for one emotion tag.
#[derive(Debug, Clone, Copy)]
pub struct ProsodyPreset {
    pub speed: f64,
    pub temperature: f64,
    pub alpha: f64,
}

pub fn preset_for(emotion: Emotion) -> ProsodyPreset {
    match emotion {
        Emotion::Happy => ProsodyPreset { speed: 1.10, temperature: 0.90, alpha: 0.6 },
        Emotion::Excited => ProsodyPreset { speed: 1.18, temperature: 1.00, alpha: 0.5 },
        Emotion::Surprised => ProsodyPreset { speed: 1.22, temperature: 1.10, alpha: 0.6 },
        Emotion::Calm => ProsodyPreset { speed: 0.92, temperature: 0.60, alpha: 1.1 },
        Emotion::Sad => ProsodyPreset { speed: 0.88, temperature: 0.55, alpha: 1.2 },
        Emotion::Angry => ProsodyPreset { speed: 1.05, temperature: 1.20, alpha: 0.4 },
    }
}

/// Synthesize narration to a WAV file via the local TTS server. Soft-fails
/// with `Ok(false)` on HTTP errors so the caller can skip the scene.
pub async fn synthesize_to_wav(
    client: &Client,
    cfg: &Config,
    text: &str,
    emotion: Emotion,
    out_wav_path: &Path,
) -> Result<bool> {
    if text.trim().is_empty() {
        anyhow::bail!("TTS text cannot be empty");
    }

    let preset = preset_for(emotion);
    let url = format!("{}/api/tts", cfg.tts_url.trim_end_matches('/'));

    let body = serde_json::json!({
        "text": text,
        "speaker_id": cfg.tts_speaker,
        "speed": preset.speed,
        "temperature": preset.temperature,
        "alpha": preset.alpha,
    });

    let resp = client
        .post(&url)
        .header("Content-Type", "application/json")
        .json(&body)
        .timeout(std::time::Duration::from_secs(300))
        .send()
        .await
        .context("TTS request failed")?;

    if !resp.status().is_success() {
        warn!("TTS synthesis failed HTTP {}", resp.status().as_u16());
        return Ok(false);
    }

    let bytes = resp.bytes().await.context("TTS response read failed")?;
    if let Some(parent) = out_wav_path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    fs::write(out_wav_path, &bytes).await?;

    Ok(fs::metadata(out_wav_path).await.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_emotion_has_a_preset() {
        let emotions = [
            Emotion::Happy,
            Emotion::Sad,
            Emotion::Angry,
            Emotion::Surprised,
            Emotion::Excited,
            Emotion::Calm,
        ];
        for emotion in emotions {
            let preset = preset_for(emotion);
            assert!(preset.speed > 0.5 && preset.speed < 1.5);
            assert!(preset.temperature > 0.0);
        }
    }

    #[test]
    fn calm_is_slower_than_excited() {
        assert!(preset_for(Emotion::Calm).speed < preset_for(Emotion::Excited).speed);
    }
}
