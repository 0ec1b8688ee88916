use crate::api::{gemini::GeminiClient, image_gen, tts};
use crate::caption::CaptionRenderer;
use crate::compositor::{self, RenderSpec};
use crate::config::Config;
use crate::effect_picker::{ConfigPicker, EffectPicker, InteractivePicker, RandomPicker};
use crate::ffmpeg;
use crate::manifest::{Manifest, SceneState};
use crate::paths::TitlePaths;
use crate::script::{self, BuildResult, Script};
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::Regex;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use walkdir::WalkDir;

pub struct RunOptions {
    pub from_id: u32,
    pub to_id: u32,
    pub skip_images: bool,
    pub interactive_effects: bool,
    pub config_path: String,
}

fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Everything built once per run and handed into each step by reference:
/// HTTP client, collaborator endpoints, caption fonts, render parameters,
/// and the seeded randomness sources.
struct Engines {
    http: reqwest::Client,
    text_gen: GeminiClient,
    renderer: CaptionRenderer,
    spec: RenderSpec,
    rng: StdRng,
    picker: Box<dyn EffectPicker>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TitleEntry {
    pub id: String,
    pub title: String,
}

/// `static/titles.json`: a list of `{id, title}` objects; ids may be JSON
/// numbers or strings.
pub fn parse_titles(content: &str) -> Result<Vec<TitleEntry>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(content).context("titles.json is not a JSON array")?;

    let mut titles = Vec::with_capacity(raw.len());
    for value in raw {
        let id = match value.get("id") {
            Some(v) if v.is_string() => v.as_str().unwrap_or_default().to_string(),
            Some(v) if v.is_u64() => v.as_u64().unwrap_or_default().to_string(),
            _ => anyhow::bail!("titles.json entry missing id: {value}"),
        };
        let title = value
            .get("title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("titles.json entry missing title: {value}"))?
            .to_string();
        titles.push(TitleEntry { id, title });
    }
    Ok(titles)
}

fn scene_clip_regex() -> Result<&'static Regex> {
    static CLIP_RE: OnceCell<Regex> = OnceCell::new();
    CLIP_RE.get_or_try_init(|| {
        Regex::new(r"^scene_(\d+)\.mp4$").context("failed to compile scene clip regex")
    })
}

pub fn scene_id_from_clip_name(name: &str) -> Option<u32> {
    let re = scene_clip_regex().ok()?;
    re.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Order clip filenames by the numeric scene id embedded in the name, so
/// `scene_10.mp4` sorts after `scene_2.mp4`.
pub fn order_scene_clips(mut names: Vec<String>) -> Vec<String> {
    names.retain(|n| scene_id_from_clip_name(n).is_some());
    names.sort_by_key(|n| scene_id_from_clip_name(n).unwrap_or(u32::MAX));
    names
}

async fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.ok();
    }
    fs::write(path, serde_json::to_string_pretty(value)?)
        .await
        .with_context(|| format!("write json: {}", path.display()))?;
    Ok(())
}

/// Reuse a valid script from disk or drive the retry loop; either way the
/// resulting document (script or fallback) lands at the script path.
async fn ensure_script(
    engines: &Engines,
    paths: &TitlePaths,
    title: &str,
) -> Result<Option<Script>> {
    let script_path = paths.script();

    if file_exists(&script_path).await {
        let content = fs::read_to_string(&script_path).await?;
        match serde_json::from_str::<Script>(&content) {
            Ok(loaded) if script::validate_loaded(&loaded).is_ok() => {
                info!("Using cached script: {}", script_path.display());
                return Ok(Some(loaded));
            }
            _ => warn!(
                "Existing script {} is invalid or a fallback document; regenerating",
                script_path.display()
            ),
        }
    }

    let result = script::build_script(&engines.text_gen, title).await?;
    write_json(&script_path, &result.to_json()).await?;
    info!("Script saved at: {}", script_path.display());

    match result {
        BuildResult::Script(script) => Ok(Some(script)),
        BuildResult::Fallback { .. } => Ok(None),
    }
}

async fn generate_audios(
    cfg: &Config,
    engines: &Engines,
    paths: &TitlePaths,
    script: &Script,
    manifest: &mut Manifest,
) -> Result<()> {
    for scene in &script.scenes {
        let wav = paths.scene_audio(scene.id);
        if manifest.state(scene.id) >= SceneState::AudioReady && file_exists(&wav).await {
            info!("Scene {} audio already exists, skipping", scene.id);
            continue;
        }
        if scene.text.trim().is_empty() {
            warn!("Scene {} has no text, skipping audio", scene.id);
            continue;
        }

        info!("TTS scene {} ({})", scene.id, scene.emotion.as_str());
        if tts::synthesize_to_wav(&engines.http, cfg, &scene.text, scene.emotion, &wav).await? {
            manifest.advance(scene.id, SceneState::AudioReady);
        } else {
            warn!("TTS failed for scene {}", scene.id);
        }
    }

    for (text, out) in [
        (cfg.intro_text.as_deref(), paths.intro_audio()),
        (cfg.outro_text.as_deref(), paths.outro_audio()),
    ] {
        let Some(text) = text else { continue };
        if file_exists(&out).await {
            continue;
        }
        if !tts::synthesize_to_wav(&engines.http, cfg, text, Default::default(), &out).await? {
            warn!("TTS failed for {}", out.display());
        }
    }

    build_full_audio(paths, script).await?;
    Ok(())
}

/// Concatenate the per-scene narration (each padded with its trailing
/// `audio_delay`) into `full_audio.wav`, and record the cumulative offsets
/// in the `audio.json` sidecar.
async fn build_full_audio(paths: &TitlePaths, script: &Script) -> Result<()> {
    let pad_dir = tempfile::tempdir().context("failed to create padding dir")?;
    let list_path = pad_dir.path().join("full_audio_list.txt");
    let mut list = fs::File::create(&list_path).await?;

    let mut sidecar = crate::segments::AudioSidecar::default();
    let mut included = 0usize;

    for scene in &script.scenes {
        let wav = paths.scene_audio(scene.id);
        if !file_exists(&wav).await {
            warn!("Missing audio for scene {}; excluded from full audio", scene.id);
            continue;
        }

        let duration = match compositor::wav_duration_seconds(&wav) {
            Ok(d) => d,
            Err(err) => {
                warn!("Unreadable audio for scene {} ({err}); excluded", scene.id);
                continue;
            }
        };

        let delay = scene.audio_delay.unwrap_or(0.5);
        let padded = pad_dir.path().join(format!("padded_{}.wav", scene.id));
        if !ffmpeg::pad_audio(&wav, delay, &padded).await? {
            warn!("Padding failed for scene {}; excluded", scene.id);
            continue;
        }

        list.write_all(format!("file '{}'\n", padded.display()).as_bytes())
            .await?;
        sidecar.push(
            &format!("scene_{}.wav", scene.id),
            &scene.text,
            duration,
            delay,
        );
        included += 1;
    }
    list.flush().await?;

    if included == 0 {
        warn!("No scene audio present; skipping full audio build");
        return Ok(());
    }

    if !ffmpeg::concat_audio(&list_path, &paths.full_audio()).await? {
        warn!("Full audio concat failed");
        return Ok(());
    }

    sidecar.finalize();
    write_json(
        &paths.audio_sidecar(),
        &serde_json::to_value(&sidecar)?,
    )
    .await?;
    info!(
        "Full audio written ({} segments, {:.2}s)",
        sidecar.segments.len(),
        sidecar.total_duration
    );
    Ok(())
}

async fn generate_images(
    cfg: &Config,
    engines: &Engines,
    paths: &TitlePaths,
    script: &Script,
    manifest: &mut Manifest,
) -> Result<()> {
    for scene in &script.scenes {
        let prompts = scene.prompts();
        if prompts.is_empty() {
            warn!("Scene {} has no prompts, skipping images", scene.id);
            continue;
        }

        for (i, prompt) in prompts.iter().enumerate() {
            let out = if prompts.len() == 1 {
                paths.scene_image(scene.id)
            } else {
                paths.scene_image_variant(scene.id, i + 1)
            };
            if file_exists(&out).await {
                info!("Scene {} image {} already exists, skipping", scene.id, i + 1);
                continue;
            }

            info!("Generating scene {} image {}/{}", scene.id, i + 1, prompts.len());
            if let Err(err) = image_gen::generate_image(&engines.http, cfg, prompt, &out).await {
                // No automatic retry: a failed image means the scene is
                // skipped downstream.
                warn!("Image generation failed for scene {} image {}: {err}", scene.id, i + 1);
            }
        }

        if paths
            .resolve_scene_image(scene.id, script::IMAGE_PROMPTS_PER_SCENE)
            .is_some()
        {
            manifest.advance(scene.id, SceneState::ImageReady);
        }
    }
    Ok(())
}

/// Remove leftover silent intermediates from interrupted runs.
async fn clear_stale_intermediates(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".silent.mp4") {
            warn!("Removing stale intermediate: {}", entry.path().display());
            fs::remove_file(entry.path()).await.ok();
        }
    }
    Ok(())
}

async fn generate_clips(
    engines: &mut Engines,
    paths: &TitlePaths,
    script: &Script,
    manifest: &mut Manifest,
) -> Result<usize> {
    clear_stale_intermediates(&paths.clips_dir()).await?;

    let mut made = 0usize;
    for scene in &script.scenes {
        let out = paths.scene_clip(scene.id);
        if manifest.state(scene.id) == SceneState::ClipReady && file_exists(&out).await {
            info!("Skipping scene {}: clip already exists", scene.id);
            continue;
        }

        let Some(image) = paths.resolve_scene_image(scene.id, script::IMAGE_PROMPTS_PER_SCENE)
        else {
            warn!("Scene {}: image missing, skipping clip", scene.id);
            continue;
        };
        let audio = paths.scene_audio(scene.id);
        if !file_exists(&audio).await {
            warn!("Scene {}: audio missing, skipping clip", scene.id);
            continue;
        }

        let image_name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let effect = engines.picker.pick(scene.id, &image_name);

        let duration = match compositor::wav_duration_seconds(&audio) {
            Ok(d) => d,
            Err(err) => {
                warn!("Scene {}: {err}; skipping clip", scene.id);
                continue;
            }
        };
        let fades = compositor::plan_fades(&image_name, duration, &mut engines.rng);

        match compositor::render_scene_clip(
            engines.spec,
            &image,
            &audio,
            &scene.text,
            effect,
            fades,
            &engines.renderer,
            &out,
        )
        .await
        {
            Ok(()) => {
                manifest.advance(scene.id, SceneState::ClipReady);
                made += 1;
            }
            Err(err) => warn!("Scene {} clip failed: {err}", scene.id),
        }
    }

    Ok(made)
}

async fn build_final_video(cfg: &Config, paths: &TitlePaths) -> Result<bool> {
    let clips_dir = paths.clips_dir();
    let mut names = Vec::new();
    let mut entries = fs::read_dir(&clips_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    let ordered = order_scene_clips(names);
    if ordered.is_empty() {
        warn!("No scene clips found in {}", clips_dir.display());
        return Ok(false);
    }

    let list_path = clips_dir.join("concat_list.txt");
    let mut list = fs::File::create(&list_path).await?;
    if file_exists(&paths.intro_clip()).await {
        list.write_all(b"file 'intro.mp4'\n").await?;
    }
    for name in &ordered {
        list.write_all(format!("file '{name}'\n").as_bytes()).await?;
    }
    if file_exists(&paths.outro_clip()).await {
        list.write_all(b"file 'outro.mp4'\n").await?;
    }
    list.flush().await?;

    let final_path = paths.final_video();
    let concat_out = clips_dir.join("concat_tmp.mp4");
    if !ffmpeg::concat_videos(&list_path, &concat_out).await? {
        warn!("Concat failed for title {}", paths.id);
        return Ok(false);
    }

    let pip = cfg.pip_video.as_deref().map(Path::new);
    match pip {
        Some(pip) if pip.is_file() => {
            if !ffmpeg::overlay_pip(&concat_out, pip, &final_path).await? {
                warn!("PIP overlay failed; delivering the plain concat");
                fs::rename(&concat_out, &final_path).await?;
            } else {
                fs::remove_file(&concat_out).await.ok();
            }
        }
        _ => {
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await.ok();
            }
            fs::rename(&concat_out, &final_path).await?;
        }
    }
    fs::remove_file(&list_path).await.ok();

    if let Ok(duration) = ffmpeg::ffprobe_duration_seconds(&final_path).await {
        info!("Final video {} ({duration:.2}s)", final_path.display());
    }
    Ok(true)
}

async fn process_title(
    cfg: &Config,
    engines: &mut Engines,
    entry: &TitleEntry,
    skip_images: bool,
) -> Result<bool> {
    let paths = TitlePaths::new(entry.id.clone());

    let Some(script) = ensure_script(engines, &paths, &entry.title).await? else {
        warn!("Script generation fell back for '{}'; title skipped", entry.title);
        return Ok(false);
    };

    let scene_ids: Vec<u32> = script.scenes.iter().map(|s| s.id).collect();
    let mut manifest = Manifest::load_or_new(&paths, scene_ids).await?;
    manifest.reconcile(&paths);

    generate_audios(cfg, engines, &paths, &script, &mut manifest).await?;
    manifest.save(&paths).await?;

    if skip_images {
        info!("Skipping image generation (using existing images)");
        for scene in &script.scenes {
            if paths
                .resolve_scene_image(scene.id, script::IMAGE_PROMPTS_PER_SCENE)
                .is_some()
            {
                manifest.advance(scene.id, SceneState::ImageReady);
            }
        }
    } else {
        generate_images(cfg, engines, &paths, &script, &mut manifest).await?;
    }
    manifest.save(&paths).await?;

    let made = generate_clips(engines, &paths, &script, &mut manifest).await?;
    manifest.save(&paths).await?;
    info!("Clips produced this run: {made}");

    if !manifest.all_clips_ready() {
        warn!(
            "Not every scene clip is ready for '{}'; final video deferred",
            entry.title
        );
        return Ok(false);
    }

    build_final_video(cfg, &paths).await
}

pub async fn run_generation(opts: RunOptions) -> Result<i32> {
    let cfg = Config::load(&opts.config_path).await?;
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let seed = cfg.seed.unwrap_or_else(now_seed);
    info!("RNG seed: {seed}");

    let base_picker = RandomPicker::new(StdRng::seed_from_u64(seed.wrapping_add(1)));
    let config_picker = ConfigPicker::new(cfg.scene_effects.clone(), base_picker);
    let picker: Box<dyn EffectPicker> = if opts.interactive_effects {
        Box::new(InteractivePicker::new(config_picker))
    } else {
        Box::new(config_picker)
    };

    let mut engines = Engines {
        text_gen: GeminiClient::new(http.clone(), &cfg),
        http,
        renderer: CaptionRenderer::new(),
        spec: RenderSpec::from_config(&cfg),
        rng: StdRng::seed_from_u64(seed),
        picker,
    };

    let titles_content = fs::read_to_string("static/titles.json")
        .await
        .context("Failed to read static/titles.json")?;
    let titles = parse_titles(&titles_content)?;

    let mut processed = 0;
    for tid in opts.from_id..=opts.to_id {
        let id = tid.to_string();
        let Some(entry) = titles.iter().find(|t| t.id == id) else {
            warn!("Title id {id} not found in titles.json, skipping");
            continue;
        };

        info!("=== Processing title {}: {} ===", entry.id, entry.title);
        match process_title(&cfg, &mut engines, entry, opts.skip_images).await {
            Ok(true) => {
                processed += 1;
                info!("DONE: {}", entry.title);
            }
            Ok(false) => warn!("INCOMPLETE: {}", entry.title),
            Err(err) => warn!("FAILED: {} ({err})", entry.title),
        }
    }

    info!("All done. Completed titles: {processed}");
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_ids_parse_from_clip_names() {
        assert_eq!(scene_id_from_clip_name("scene_1.mp4"), Some(1));
        assert_eq!(scene_id_from_clip_name("scene_42.mp4"), Some(42));
        assert_eq!(scene_id_from_clip_name("intro.mp4"), None);
        assert_eq!(scene_id_from_clip_name("scene_x.mp4"), None);
        assert_eq!(scene_id_from_clip_name("scene_1.wav"), None);
    }

    #[test]
    fn clips_order_numerically_not_lexically() {
        let names = vec![
            "scene_10.mp4".to_string(),
            "intro.mp4".to_string(),
            "scene_2.mp4".to_string(),
            "concat_list.txt".to_string(),
            "scene_1.mp4".to_string(),
        ];
        assert_eq!(
            order_scene_clips(names),
            vec!["scene_1.mp4", "scene_2.mp4", "scene_10.mp4"]
        );
    }

    #[test]
    fn titles_accept_numeric_and_string_ids() {
        let content = r#"[{"id": 1, "title": "One"}, {"id": "2", "title": "Two"}]"#;
        let titles = parse_titles(content).unwrap();
        assert_eq!(titles[0].id, "1");
        assert_eq!(titles[1].id, "2");
        assert_eq!(titles[1].title, "Two");
    }

    #[test]
    fn titles_reject_entries_without_title() {
        assert!(parse_titles(r#"[{"id": 1}]"#).is_err());
    }
}
