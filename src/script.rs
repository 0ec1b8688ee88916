use crate::prompt;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_ATTEMPTS: u32 = 5;
pub const MIN_SCENES: usize = 5;
pub const IMAGE_PROMPTS_PER_SCENE: usize = 3;
const MIN_NARRATIVE_CHARS: usize = 100;

/// Closed emotion vocabulary carried per scene; anything the generator
/// invents collapses to `Calm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Excited,
    #[default]
    Calm,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Excited => "excited",
            Emotion::Calm => "calm",
        }
    }

    fn from_tag(tag: &str) -> Emotion {
        match tag {
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            "surprised" => Emotion::Surprised,
            "excited" => Emotion::Excited,
            _ => Emotion::Calm,
        }
    }
}

impl Serialize for Emotion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Emotion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Emotion::from_tag(tag.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_prompts: Vec<String>,
    /// Legacy single-prompt field from older script documents.
    #[serde(default, alias = "prompt", skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub emotion: Emotion,
    /// Pause inserted after this scene in the full audio track, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_delay: Option<f64>,
}

impl Scene {
    /// Prompt variants in preference order; legacy documents yield one.
    pub fn prompts(&self) -> Vec<&str> {
        if !self.image_prompts.is_empty() {
            self.image_prompts.iter().map(String::as_str).collect()
        } else {
            self.image_prompt.as_deref().into_iter().collect()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("no JSON object found in generator output")]
    NoJsonBlock,
    #[error("JSON unparsable even after repair: {0}")]
    Unparsable(String),
    #[error("scenes array missing or shorter than {min}", min = MIN_SCENES)]
    TooFewScenes,
    #[error("scene ids are not sequential integers starting at 1")]
    BadSceneIds,
    #[error("scene {0} has empty narration text")]
    EmptyText(u32),
    #[error("scene {0} must carry exactly {want} image prompts", want = IMAGE_PROMPTS_PER_SCENE)]
    BadImagePrompts(u32),
}

/// External text-generation collaborator: prompt in, free text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Outcome of the bounded retry loop: either a validated script or the
/// fallback document recording why every attempt failed.
#[derive(Debug)]
pub enum BuildResult {
    Script(Script),
    Fallback { reason: String, raw_output: String },
}

impl BuildResult {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BuildResult::Script(script) => {
                serde_json::to_value(script).unwrap_or_else(|_| serde_json::json!({}))
            }
            BuildResult::Fallback { reason, raw_output } => serde_json::json!({
                "error": reason,
                "raw_output": raw_output,
                "failed_at": Utc::now().to_rfc3339(),
            }),
        }
    }
}

fn fence_regex() -> Result<&'static Regex> {
    static FENCE_RE: OnceCell<Regex> = OnceCell::new();
    FENCE_RE.get_or_try_init(|| {
        use anyhow::Context as _;
        Regex::new(r"```(?:json)?").context("failed to compile fence regex")
    })
}

/// Extract the first balanced `{ ... }` block by brace counting. Returns
/// `None` when no opening brace exists or the braces never balance.
pub fn extract_first_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;

    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_trailing_comma(out: &mut String) {
    while out.ends_with(char::is_whitespace) {
        out.pop();
    }
    if out.ends_with(',') {
        out.pop();
    }
}

/// Best-effort structural repair: drop trailing commas, terminate an
/// unclosed string, and append the closers for any unclosed objects/arrays.
pub fn repair_json_block(block: &str) -> String {
    let mut out = String::with_capacity(block.len() + 4);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in block.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                closers.push('}');
                out.push(ch);
            }
            '[' => {
                closers.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                trim_trailing_comma(&mut out);
                closers.pop();
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        out.push('"');
    }
    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        out.push(closer);
    }

    out
}

/// Parse generator output into a `Script`: strip code fences, extract the
/// first balanced JSON block, parse strictly, then once more after repair.
pub fn parse_script(raw: &str) -> Result<Script, ScriptError> {
    let cleaned = match fence_regex() {
        Ok(re) => re.replace_all(raw, "").into_owned(),
        Err(_) => raw.to_string(),
    };

    let block = extract_first_json_block(&cleaned).ok_or(ScriptError::NoJsonBlock)?;

    match serde_json::from_str::<Script>(block) {
        Ok(script) => Ok(script),
        Err(first_err) => {
            let repaired = repair_json_block(block);
            serde_json::from_str::<Script>(&repaired)
                .map_err(|_| ScriptError::Unparsable(first_err.to_string()))
        }
    }
}

/// Strict validation applied inside the retry loop: minimum scene count,
/// sequential ids from 1, narration text present, exactly three prompt
/// variants per scene.
pub fn validate_script(script: &Script) -> Result<(), ScriptError> {
    if script.scenes.len() < MIN_SCENES {
        return Err(ScriptError::TooFewScenes);
    }
    for (idx, scene) in script.scenes.iter().enumerate() {
        if scene.id as usize != idx + 1 {
            return Err(ScriptError::BadSceneIds);
        }
        if scene.text.trim().is_empty() {
            return Err(ScriptError::EmptyText(scene.id));
        }
        if scene.image_prompts.len() != IMAGE_PROMPTS_PER_SCENE
            || scene.image_prompts.iter().any(|p| p.trim().is_empty())
        {
            return Err(ScriptError::BadImagePrompts(scene.id));
        }
    }
    Ok(())
}

/// Lenient structural check for scripts loaded back from disk, where legacy
/// single-prompt documents are still accepted.
pub fn validate_loaded(script: &Script) -> Result<(), ScriptError> {
    if script.scenes.is_empty() {
        return Err(ScriptError::TooFewScenes);
    }
    for (idx, scene) in script.scenes.iter().enumerate() {
        if scene.id as usize != idx + 1 {
            return Err(ScriptError::BadSceneIds);
        }
        if scene.text.trim().is_empty() {
            return Err(ScriptError::EmptyText(scene.id));
        }
        if scene.prompts().is_empty() {
            return Err(ScriptError::BadImagePrompts(scene.id));
        }
    }
    Ok(())
}

/// Two-step script generation with the bounded retry loop.
///
/// Step one produces the narrative text (one shot, length-checked); step two
/// converts it to scene JSON, retrying the whole generation on any
/// extraction, parse or validation failure. After `MAX_ATTEMPTS` the caller
/// gets the fallback variant instead of an error, so the pipeline keeps a
/// record instead of crashing.
pub async fn build_script(generator: &dyn TextGenerator, title: &str) -> Result<BuildResult> {
    info!("Generating narrative script for: {title}");
    let narrative = generator.generate(&prompt::build_narrative_prompt(title)).await?;
    if narrative.trim().len() < MIN_NARRATIVE_CHARS {
        anyhow::bail!(
            "generated narrative is too short ({} chars)",
            narrative.trim().len()
        );
    }

    let scene_prompt = prompt::build_scene_prompt(&narrative);
    let mut last_raw = String::new();
    let mut last_reason = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        info!("Scene JSON conversion attempt {attempt}/{MAX_ATTEMPTS}");

        let raw = match generator.generate(&scene_prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Generator call failed: {err}");
                last_reason = err.to_string();
                continue;
            }
        };
        last_raw = raw.clone();

        let script = match parse_script(&raw) {
            Ok(script) => script,
            Err(err) => {
                warn!("Attempt {attempt}: {err}");
                last_reason = err.to_string();
                continue;
            }
        };

        if let Err(err) = validate_script(&script) {
            warn!("Attempt {attempt}: {err}");
            last_reason = err.to_string();
            continue;
        }

        info!("Valid script generated ({} scenes)", script.scenes.len());
        return Ok(BuildResult::Script(script));
    }

    warn!("All {MAX_ATTEMPTS} attempts failed; persisting fallback document");
    Ok(BuildResult::Fallback {
        reason: format!("Failed to generate valid script after {MAX_ATTEMPTS} attempts: {last_reason}"),
        raw_output: last_raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn valid_scene_json(id: u32) -> String {
        format!(
            r#"{{"id": {id}, "text": "beat {id}", "image_prompts": ["a {id}", "b {id}", "c {id}"], "emotion": "calm", "audio_delay": 0.5}}"#
        )
    }

    fn valid_script_json(scenes: usize) -> String {
        let scenes: Vec<String> = (1..=scenes as u32).map(valid_scene_json).collect();
        format!(
            r#"{{"title": "T", "description": "D", "scenes": [{}]}}"#,
            scenes.join(",")
        )
    }

    struct StubGenerator {
        narrative: String,
        outputs: Mutex<Vec<String>>,
    }

    impl StubGenerator {
        fn new(outputs: Vec<String>) -> Self {
            Self {
                narrative: "n".repeat(200),
                outputs: Mutex::new(outputs),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("educational storyteller") {
                return Ok(self.narrative.clone());
            }
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                Ok("no json here".to_string())
            } else {
                Ok(outputs.remove(0))
            }
        }
    }

    #[test]
    fn extraction_returns_exact_object_substring() {
        let text = "garbage before {\"a\": {\"b\": 1}} garbage after";
        assert_eq!(extract_first_json_block(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn extraction_rejects_unbalanced_braces() {
        assert_eq!(extract_first_json_block("{\"a\": 1"), None);
        assert_eq!(extract_first_json_block("no braces at all"), None);
    }

    #[test]
    fn repair_removes_trailing_commas() {
        let repaired = repair_json_block(r#"{"a": [1, 2,], "b": 3,}"#);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"][1], 2);
        assert_eq!(value["b"], 3);
    }

    #[test]
    fn repair_closes_truncated_document() {
        let repaired = repair_json_block(r#"{"a": [1, 2"#);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"][0], 1);
    }

    #[test]
    fn parse_strips_markdown_fences() {
        let raw = format!("```json\n{}\n```", valid_script_json(5));
        let script = parse_script(&raw).unwrap();
        assert_eq!(script.scenes.len(), 5);
    }

    #[test]
    fn unknown_emotion_collapses_to_calm() {
        let raw = valid_script_json(5).replace("\"calm\"", "\"melancholic\"");
        let script = parse_script(&raw).unwrap();
        assert_eq!(script.scenes[0].emotion, Emotion::Calm);
    }

    #[test]
    fn legacy_prompt_alias_is_accepted() {
        let raw = r#"{"title": "T", "scenes": [{"id": 1, "text": "t", "prompt": "p"}]}"#;
        let script = parse_script(raw).unwrap();
        assert_eq!(script.scenes[0].prompts(), vec!["p"]);
        assert!(validate_loaded(&script).is_ok());
    }

    #[test]
    fn validation_rejects_wrong_prompt_count() {
        let raw = valid_script_json(5).replace(r#""a 1", "b 1", "c 1""#, r#""a 1""#);
        let script = parse_script(&raw).unwrap();
        assert!(matches!(
            validate_script(&script),
            Err(ScriptError::BadImagePrompts(1))
        ));
    }

    #[test]
    fn validation_rejects_non_sequential_ids() {
        let raw = valid_script_json(5).replace(r#""id": 2"#, r#""id": 7"#);
        let script = parse_script(&raw).unwrap();
        assert!(matches!(validate_script(&script), Err(ScriptError::BadSceneIds)));
    }

    #[tokio::test]
    async fn retry_loop_succeeds_when_failures_stay_under_bound() {
        let bad = "not json".to_string();
        let generator = StubGenerator::new(vec![
            bad.clone(),
            bad.clone(),
            bad.clone(),
            bad,
            valid_script_json(5),
        ]);

        match build_script(&generator, "topic").await.unwrap() {
            BuildResult::Script(script) => assert_eq!(script.scenes.len(), 5),
            BuildResult::Fallback { .. } => panic!("expected success on the fifth attempt"),
        }
    }

    #[tokio::test]
    async fn retry_loop_falls_back_after_exhausting_attempts() {
        let generator = StubGenerator::new(vec!["junk".to_string(); MAX_ATTEMPTS as usize]);

        match build_script(&generator, "topic").await.unwrap() {
            BuildResult::Script(_) => panic!("expected fallback"),
            BuildResult::Fallback { reason, raw_output } => {
                assert!(reason.contains("Failed to generate valid script"));
                assert_eq!(raw_output, "junk");
            }
        }
    }

    #[tokio::test]
    async fn fallback_document_records_error_and_raw_output() {
        let result = BuildResult::Fallback {
            reason: "r".into(),
            raw_output: "raw".into(),
        };
        let doc = result.to_json();
        assert_eq!(doc["error"], "r");
        assert_eq!(doc["raw_output"], "raw");
        assert!(doc["failed_at"].is_string());
    }
}
