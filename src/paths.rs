use std::path::PathBuf;

/// The fixed `outputs/` layout every pipeline step communicates through.
#[derive(Debug, Clone)]
pub struct TitlePaths {
    pub id: String,
}

impl TitlePaths {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn script(&self) -> PathBuf {
        PathBuf::from(format!("outputs/scripts/script_{}.json", self.id))
    }

    pub fn audios_dir(&self) -> PathBuf {
        PathBuf::from(format!("outputs/audios/{}", self.id))
    }

    pub fn scene_audio(&self, scene_id: u32) -> PathBuf {
        self.audios_dir().join(format!("scene_{scene_id}.wav"))
    }

    pub fn intro_audio(&self) -> PathBuf {
        self.audios_dir().join("intro.wav")
    }

    pub fn outro_audio(&self) -> PathBuf {
        self.audios_dir().join("outro.wav")
    }

    pub fn full_audio(&self) -> PathBuf {
        self.audios_dir().join("full_audio.wav")
    }

    pub fn audio_sidecar(&self) -> PathBuf {
        self.audios_dir().join("audio.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        PathBuf::from(format!("outputs/images/{}", self.id))
    }

    /// Promoted single-file image for a scene; wins over the variant folder.
    pub fn scene_image(&self, scene_id: u32) -> PathBuf {
        self.images_dir().join(format!("scene_{scene_id}.png"))
    }

    pub fn scene_image_variant(&self, scene_id: u32, variant: usize) -> PathBuf {
        self.images_dir()
            .join(format!("scene_{scene_id}"))
            .join(format!("img_{variant}.png"))
    }

    /// Resolve which illustration to composite for a scene: the promoted
    /// `scene_<n>.png` if present, otherwise the first existing variant.
    pub fn resolve_scene_image(&self, scene_id: u32, variants: usize) -> Option<PathBuf> {
        let promoted = self.scene_image(scene_id);
        if promoted.is_file() {
            return Some(promoted);
        }
        for variant in 1..=variants {
            let path = self.scene_image_variant(scene_id, variant);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    pub fn clips_dir(&self) -> PathBuf {
        PathBuf::from(format!("outputs/clips/{}", self.id))
    }

    pub fn scene_clip(&self, scene_id: u32) -> PathBuf {
        self.clips_dir().join(format!("scene_{scene_id}.mp4"))
    }

    pub fn intro_clip(&self) -> PathBuf {
        self.clips_dir().join("intro.mp4")
    }

    pub fn outro_clip(&self) -> PathBuf {
        self.clips_dir().join("outro.mp4")
    }

    pub fn manifest(&self) -> PathBuf {
        PathBuf::from(format!("outputs/manifests/manifest_{}.json", self.id))
    }

    pub fn final_video(&self) -> PathBuf {
        PathBuf::from(format!("outputs/videos/{}.mp4", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_the_naming_convention() {
        let paths = TitlePaths::new("7");
        assert_eq!(paths.script(), PathBuf::from("outputs/scripts/script_7.json"));
        assert_eq!(paths.scene_audio(3), PathBuf::from("outputs/audios/7/scene_3.wav"));
        assert_eq!(
            paths.scene_image_variant(3, 2),
            PathBuf::from("outputs/images/7/scene_3/img_2.png")
        );
        assert_eq!(paths.scene_clip(3), PathBuf::from("outputs/clips/7/scene_3.mp4"));
        assert_eq!(paths.final_video(), PathBuf::from("outputs/videos/7.mp4"));
    }
}
