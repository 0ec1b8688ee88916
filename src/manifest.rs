use crate::paths::TitlePaths;
use crate::script::IMAGE_PROMPTS_PER_SCENE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::fs;
use tracing::warn;

/// Per-scene progress through the pipeline. Ordered: a scene only ever moves
/// forward, and reconciliation can move it back when outputs disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    Pending,
    AudioReady,
    ImageReady,
    ClipReady,
}

/// Explicit record of pipeline progress for one script, persisted next to
/// the outputs so reruns don't have to infer state from file existence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub script_id: String,
    pub scenes: BTreeMap<u32, SceneState>,
}

impl Manifest {
    pub fn new(script_id: impl Into<String>, scene_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            script_id: script_id.into(),
            scenes: scene_ids
                .into_iter()
                .map(|id| (id, SceneState::Pending))
                .collect(),
        }
    }

    /// Load the persisted manifest or start a fresh one; scenes added to the
    /// script since the last run get a `Pending` entry.
    pub async fn load_or_new(
        paths: &TitlePaths,
        scene_ids: impl IntoIterator<Item = u32>,
    ) -> Result<Self> {
        let path = paths.manifest();
        let mut manifest = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                warn!("Manifest {} unreadable ({err}); starting fresh", path.display());
                Manifest::new(paths.id.clone(), Vec::new())
            }),
            Err(_) => Manifest::new(paths.id.clone(), Vec::new()),
        };

        manifest.script_id = paths.id.clone();
        for id in scene_ids {
            manifest.scenes.entry(id).or_insert(SceneState::Pending);
        }
        Ok(manifest)
    }

    pub fn state(&self, scene_id: u32) -> SceneState {
        self.scenes
            .get(&scene_id)
            .copied()
            .unwrap_or(SceneState::Pending)
    }

    /// Record progress; a scene never moves backwards through `advance`.
    pub fn advance(&mut self, scene_id: u32, state: SceneState) {
        let entry = self.scenes.entry(scene_id).or_insert(SceneState::Pending);
        if state > *entry {
            *entry = state;
        }
    }

    pub fn all_clips_ready(&self) -> bool {
        !self.scenes.is_empty()
            && self.scenes.values().all(|s| *s == SceneState::ClipReady)
    }

    /// Downgrade any state whose backing file has disappeared, so a manually
    /// deleted output is regenerated instead of silently skipped.
    pub fn reconcile(&mut self, paths: &TitlePaths) {
        for (&scene_id, state) in self.scenes.iter_mut() {
            let audio = paths.scene_audio(scene_id).is_file();
            let image = paths
                .resolve_scene_image(scene_id, IMAGE_PROMPTS_PER_SCENE)
                .is_some();
            let clip = paths.scene_clip(scene_id).is_file();

            let observed = if clip {
                SceneState::ClipReady
            } else if audio && image {
                SceneState::ImageReady
            } else if audio {
                SceneState::AudioReady
            } else {
                SceneState::Pending
            };

            if observed < *state {
                warn!(
                    "Scene {scene_id}: outputs missing on disk, resetting {:?} -> {:?}",
                    *state, observed
                );
                *state = observed;
            }
        }
    }

    /// Persist via write-temp-then-rename so a crash mid-write never leaves a
    /// truncated manifest behind.
    pub async fn save(&self, paths: &TitlePaths) -> Result<()> {
        let path = paths.manifest();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.ok();
        }

        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("write manifest temp: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename manifest into place: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_order_along_the_pipeline() {
        assert!(SceneState::Pending < SceneState::AudioReady);
        assert!(SceneState::AudioReady < SceneState::ImageReady);
        assert!(SceneState::ImageReady < SceneState::ClipReady);
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut manifest = Manifest::new("1", [1]);
        manifest.advance(1, SceneState::ClipReady);
        manifest.advance(1, SceneState::AudioReady);
        assert_eq!(manifest.state(1), SceneState::ClipReady);
    }

    #[test]
    fn unknown_scene_is_pending() {
        let manifest = Manifest::new("1", [1, 2]);
        assert_eq!(manifest.state(9), SceneState::Pending);
    }

    #[test]
    fn all_clips_ready_requires_every_scene() {
        let mut manifest = Manifest::new("1", [1, 2]);
        manifest.advance(1, SceneState::ClipReady);
        assert!(!manifest.all_clips_ready());
        manifest.advance(2, SceneState::ClipReady);
        assert!(manifest.all_clips_ready());

        let empty = Manifest::new("1", []);
        assert!(!empty.all_clips_ready());
    }

    #[test]
    fn round_trips_through_json() {
        let mut manifest = Manifest::new("42", [1, 2, 3]);
        manifest.advance(2, SceneState::AudioReady);

        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("audio_ready"));
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state(2), SceneState::AudioReady);
        assert_eq!(back.scenes.len(), 3);
    }
}
