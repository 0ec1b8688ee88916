use crate::effects::{Effect, CATALOG};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::warn;

/// How a scene gets its motion effect. `None` means the scene renders as a
/// plain static clip. This is the seam that used to be the manual
/// verification UI: any implementation that can answer "which effect for
/// this scene" satisfies it.
pub trait EffectPicker {
    fn pick(&mut self, scene_id: u32, image_name: &str) -> Option<Effect>;
}

/// Seeded random choice from the catalog.
pub struct RandomPicker {
    rng: StdRng,
}

impl RandomPicker {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl EffectPicker for RandomPicker {
    fn pick(&mut self, _scene_id: u32, _image_name: &str) -> Option<Effect> {
        let idx = self.rng.gen_range(0..CATALOG.len());
        Some(CATALOG[idx])
    }
}

/// Per-scene overrides from the config file; anything not listed falls back
/// to the wrapped picker. The value "static" disables the effect entirely.
pub struct ConfigPicker<P: EffectPicker> {
    overrides: BTreeMap<u32, String>,
    fallback: P,
}

impl<P: EffectPicker> ConfigPicker<P> {
    pub fn new(overrides: BTreeMap<u32, String>, fallback: P) -> Self {
        Self { overrides, fallback }
    }
}

impl<P: EffectPicker> EffectPicker for ConfigPicker<P> {
    fn pick(&mut self, scene_id: u32, image_name: &str) -> Option<Effect> {
        match self.overrides.get(&scene_id) {
            Some(name) if name == "static" => None,
            Some(name) => match Effect::from_name(name) {
                Some(effect) => Some(effect),
                None => {
                    warn!("Unknown effect '{name}' for scene {scene_id}; choosing randomly");
                    self.fallback.pick(scene_id, image_name)
                }
            },
            None => self.fallback.pick(scene_id, image_name),
        }
    }
}

/// Asks on stdin, one line per scene: an effect name, "static", or an empty
/// line to let the fallback decide.
pub struct InteractivePicker<P: EffectPicker> {
    fallback: P,
}

impl<P: EffectPicker> InteractivePicker<P> {
    pub fn new(fallback: P) -> Self {
        Self { fallback }
    }
}

impl<P: EffectPicker> EffectPicker for InteractivePicker<P> {
    fn pick(&mut self, scene_id: u32, image_name: &str) -> Option<Effect> {
        let names: Vec<&str> = CATALOG.iter().map(|e| e.name()).collect();
        eprintln!("Scene {scene_id} ({image_name}) — effects: {}", names.join(", "));
        eprint!("Effect name (empty = random, 'static' = none): ");
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return self.fallback.pick(scene_id, image_name);
        }

        let choice = line.trim();
        if choice.is_empty() {
            return self.fallback.pick(scene_id, image_name);
        }
        if choice == "static" {
            return None;
        }
        match Effect::from_name(choice) {
            Some(effect) => Some(effect),
            None => {
                eprintln!("Unknown effect '{choice}'; choosing randomly.");
                self.fallback.pick(scene_id, image_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn random_picker_is_deterministic_for_a_seed() {
        let mut a = RandomPicker::new(StdRng::seed_from_u64(9));
        let mut b = RandomPicker::new(StdRng::seed_from_u64(9));
        for scene in 1..=20 {
            assert_eq!(a.pick(scene, "x.png"), b.pick(scene, "x.png"));
        }
    }

    #[test]
    fn config_picker_honors_overrides() {
        let overrides = BTreeMap::from([
            (1, "pan_left".to_string()),
            (2, "static".to_string()),
            (3, "not_an_effect".to_string()),
        ]);
        let mut picker =
            ConfigPicker::new(overrides, RandomPicker::new(StdRng::seed_from_u64(1)));

        assert_eq!(picker.pick(1, "a.png"), Some(Effect::PanLeft));
        assert_eq!(picker.pick(2, "b.png"), None);
        assert!(picker.pick(3, "c.png").is_some());
        assert!(picker.pick(4, "d.png").is_some());
    }
}
