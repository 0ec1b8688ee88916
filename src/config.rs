use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "gemini_api_key")]
    pub gemini_key: String,
    #[serde(rename = "gemini_model")]
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(rename = "tts_url")]
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    #[serde(rename = "tts_speaker")]
    #[serde(default = "default_speaker")]
    pub tts_speaker: String,
    #[serde(rename = "image_gen_url")]
    #[serde(default = "default_image_gen_url")]
    pub image_gen_url: String,
    #[serde(rename = "image_style_prefix")]
    #[serde(default = "default_style_prefix")]
    pub image_style_prefix: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Fixed RNG seed for reproducible effect/fade selection.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Small looped video overlaid in a corner of the final cut.
    #[serde(default)]
    pub pip_video: Option<String>,
    #[serde(default)]
    pub intro_text: Option<String>,
    #[serde(default)]
    pub outro_text: Option<String>,
    /// Per-scene effect overrides, keyed by scene id.
    #[serde(default)]
    pub scene_effects: std::collections::BTreeMap<u32, String>,
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_tts_url() -> String {
    "http://127.0.0.1:5002".to_string()
}

fn default_speaker() -> String {
    "p236".to_string()
}

fn default_image_gen_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_style_prefix() -> String {
    "cartoonish image of".to_string()
}

fn default_fps() -> u32 {
    30
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)?;

        if config.gemini_key.is_empty() {
            anyhow::bail!("config.json: gemini_api_key missing");
        }
        if config.fps == 0 {
            anyhow::bail!("config.json: fps must be non-zero");
        }
        if config.width % 2 != 0 || config.height % 2 != 0 {
            anyhow::bail!("config.json: width/height must be even for yuv420p output");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"gemini_api_key": "k"}"#)
            .await
            .unwrap();

        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.width, 1920);
        assert_eq!(cfg.height, 1080);
        assert_eq!(cfg.tts_speaker, "p236");
        assert!(cfg.seed.is_none());
    }

    #[tokio::test]
    async fn load_rejects_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"gemini_api_key": ""}"#)
            .await
            .unwrap();

        assert!(Config::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn load_rejects_odd_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"gemini_api_key": "k", "width": 1919}"#)
            .await
            .unwrap();

        assert!(Config::load(&path).await.is_err());
    }
}
