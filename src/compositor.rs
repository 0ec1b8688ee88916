use crate::caption::{CaptionRenderer, CAPTION_HEIGHT};
use crate::config::Config;
use crate::effects::Effect;
use crate::ffmpeg;
use crate::segments::{self, Segment, MAX_LINE_CHARS};
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use rand::rngs::StdRng;
use rand::Rng;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Gap between the bottom frame edge and the bottom of the caption strip.
const CAPTION_MARGIN_BOTTOM: u32 = 20;
const FADE_FIXED: f64 = 0.8;
const FADE_MIN: f64 = 0.4;
const FADE_MAX: f64 = 1.2;
const FADE_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct RenderSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl RenderSpec {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
        }
    }
}

/// Truncate a duration to an exact multiple of the frame interval, so the
/// video track never drifts against the audio by a fractional frame.
/// Returns the frame count and the quantized duration.
pub fn quantize_duration(duration: f64, fps: u32) -> (u64, f64) {
    if duration <= 0.0 || fps == 0 {
        return (0, 0.0);
    }
    let frames = (duration * fps as f64).floor() as u64;
    (frames, frames as f64 / fps as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FadePlan {
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
}

/// Fade policy is driven by the image filename: intro clips fade both ways,
/// outro clips fade out only, and ordinary scenes roll independent dice for
/// each side.
pub fn plan_fades(image_name: &str, duration: f64, rng: &mut StdRng) -> FadePlan {
    let cap = (duration / 4.0).max(0.0);
    let fixed = FADE_FIXED.min(cap);
    let name = image_name.to_ascii_lowercase();

    if name.contains("intro") {
        return FadePlan {
            fade_in: Some(fixed),
            fade_out: Some(fixed),
        };
    }
    if name.contains("outro") {
        return FadePlan {
            fade_in: None,
            fade_out: Some(fixed),
        };
    }

    let mut roll = |rng: &mut StdRng| -> Option<f64> {
        if rng.gen_bool(FADE_PROBABILITY) {
            Some(rng.gen_range(FADE_MIN..=FADE_MAX).min(cap))
        } else {
            None
        }
    };

    FadePlan {
        fade_in: roll(rng),
        fade_out: roll(rng),
    }
}

/// Brightness multiplier for elapsed time `t`; 1.0 outside the fade windows.
pub fn fade_factor(t: f64, duration: f64, plan: &FadePlan) -> f64 {
    let mut factor: f64 = 1.0;
    if let Some(d) = plan.fade_in {
        if d > 0.0 && t < d {
            factor *= (t / d).clamp(0.0, 1.0);
        }
    }
    if let Some(d) = plan.fade_out {
        if d > 0.0 && t > duration - d {
            factor *= ((duration - t) / d).clamp(0.0, 1.0);
        }
    }
    factor.clamp(0.0, 1.0)
}

fn apply_fade(frame: &mut RgbaImage, factor: f64) {
    for px in frame.pixels_mut() {
        for c in 0..3 {
            px.0[c] = (px.0[c] as f64 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Source-over blend of `overlay` onto `frame` at (x, y), clipped to the
/// frame bounds.
fn overlay_onto(frame: &mut RgbaImage, overlay: &RgbaImage, x: i64, y: i64) {
    let (fw, fh) = frame.dimensions();
    for (ox, oy, src) in overlay.enumerate_pixels() {
        let tx = x + ox as i64;
        let ty = y + oy as i64;
        if tx < 0 || ty < 0 || tx >= fw as i64 || ty >= fh as i64 {
            continue;
        }
        let a = src.0[3] as f64 / 255.0;
        if a <= 0.0 {
            continue;
        }
        let dst = frame.get_pixel_mut(tx as u32, ty as u32);
        for c in 0..3 {
            let blended = src.0[c] as f64 * a + dst.0[c] as f64 * (1.0 - a);
            dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Authoritative duration source for a scene: the narration WAV header.
pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to read audio: {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        anyhow::bail!("audio has zero sample rate: {}", path.display());
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Render one scene clip: image + motion effect + fades + captions + the
/// scene's narration track.
///
/// The visual track is rendered frame by frame into a silent intermediate
/// file, then muxed with the untouched WAV in a second pass. A missing or
/// unreadable audio file is fatal for the scene; an effect failure falls
/// back to the static image.
pub async fn render_scene_clip(
    spec: RenderSpec,
    image_path: &Path,
    audio_path: &Path,
    narration: &str,
    effect: Option<Effect>,
    fades: FadePlan,
    renderer: &CaptionRenderer,
    out_path: &Path,
) -> Result<()> {
    let duration = wav_duration_seconds(audio_path)?;
    let (frames, qdur) = quantize_duration(duration, spec.fps);
    if frames == 0 {
        anyhow::bail!(
            "audio {} too short for a single frame at {} fps",
            audio_path.display(),
            spec.fps
        );
    }

    let base = image::open(image_path)
        .with_context(|| format!("failed to load image: {}", image_path.display()))?
        .to_rgba8();
    let base = imageops::resize(&base, spec.width, spec.height, FilterType::Lanczos3);

    let captions: Vec<(Segment, RgbaImage)> =
        segments::split_into_segments(narration, qdur, MAX_LINE_CHARS)
            .into_iter()
            .map(|seg| {
                let bitmap = renderer.render(&seg.text, spec.width);
                (seg, bitmap)
            })
            .collect();
    let caption_y = spec.height as i64 - (CAPTION_HEIGHT + CAPTION_MARGIN_BOTTOM) as i64;

    if let Some(parent) = out_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let silent = tempfile::Builder::new()
        .prefix("scene_")
        .suffix(".silent.mp4")
        .tempfile_in(out_path.parent().unwrap_or_else(|| Path::new(".")))
        .context("failed to create silent intermediate file")?;

    let mut encoder = ffmpeg::spawn_silent_encoder(spec.width, spec.height, spec.fps, silent.path())?;
    let mut stdin = encoder
        .stdin
        .take()
        .context("ffmpeg stdin unavailable")?;

    let mut active_effect = effect;
    for i in 0..frames {
        let t = i as f64 / spec.fps as f64;

        let mut frame = match active_effect {
            Some(fx) => match fx.apply(&base, t, qdur) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Effect {} failed ({err}); falling back to static clip", fx.name());
                    active_effect = None;
                    base.clone()
                }
            },
            None => base.clone(),
        };

        let factor = fade_factor(t, qdur, &fades);
        if factor < 1.0 {
            apply_fade(&mut frame, factor);
        }

        for (seg, bitmap) in &captions {
            if seg.start <= t && t < seg.end {
                overlay_onto(&mut frame, bitmap, 0, caption_y);
            }
        }

        stdin
            .write_all(frame.as_raw())
            .await
            .context("failed to stream frame to encoder")?;
    }

    drop(stdin);
    ffmpeg::finish_encoder(encoder).await?;

    if !ffmpeg::mux_video_audio(silent.path(), audio_path, out_path).await? {
        anyhow::bail!("mux produced no output for {}", out_path.display());
    }
    info!(
        "Rendered clip {} ({frames} frames, {qdur:.2}s)",
        out_path.display()
    );

    // The silent intermediate is removed when `silent` drops.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn quantize_never_exceeds_input_duration() {
        for duration in [0.034, 1.0, 2.37, 9.999, 100.0] {
            let (_, q) = quantize_duration(duration, 30);
            assert!(q <= duration);
        }
    }

    #[test]
    fn quantize_yields_exact_frame_multiples() {
        for duration in [0.5, 1.0, 3.141, 7.77] {
            let (frames, q) = quantize_duration(duration, 24);
            let reconstructed = frames as f64 / 24.0;
            assert!((q - reconstructed).abs() < 1e-12);
        }
    }

    #[test]
    fn quantize_of_exact_multiple_is_identity() {
        let (frames, q) = quantize_duration(2.0, 30);
        assert_eq!(frames, 60);
        assert!((q - 2.0).abs() < 1e-12);
    }

    #[test]
    fn quantize_rejects_degenerate_input() {
        assert_eq!(quantize_duration(-1.0, 30), (0, 0.0));
        assert_eq!(quantize_duration(1.0, 0), (0, 0.0));
    }

    #[test]
    fn intro_filename_fades_both_ways() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_fades("intro.png", 4.0, &mut rng);
        assert_eq!(plan.fade_in, Some(FADE_FIXED));
        assert_eq!(plan.fade_out, Some(FADE_FIXED));
    }

    #[test]
    fn outro_filename_fades_out_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_fades("outro.png", 4.0, &mut rng);
        assert_eq!(plan.fade_in, None);
        assert!(plan.fade_out.is_some());
    }

    #[test]
    fn short_clip_caps_fixed_fade_duration() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_fades("intro.png", 1.0, &mut rng);
        assert_eq!(plan.fade_in, Some(0.25));
    }

    #[test]
    fn ordinary_fades_are_seed_deterministic_and_bounded() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let pa = plan_fades("scene_3.png", 6.0, &mut a);
            let pb = plan_fades("scene_3.png", 6.0, &mut b);
            assert_eq!(pa, pb);
            for d in [pa.fade_in, pa.fade_out].into_iter().flatten() {
                assert!((FADE_MIN..=FADE_MAX).contains(&d));
            }
        }
    }

    #[test]
    fn fade_factor_is_zero_at_the_faded_ends() {
        let plan = FadePlan {
            fade_in: Some(1.0),
            fade_out: Some(1.0),
        };
        assert_eq!(fade_factor(0.0, 10.0, &plan), 0.0);
        assert_eq!(fade_factor(5.0, 10.0, &plan), 1.0);
        assert!(fade_factor(10.0, 10.0, &plan) < 1e-12);
    }

    #[test]
    fn fade_factor_without_fades_is_identity() {
        let plan = FadePlan {
            fade_in: None,
            fade_out: None,
        };
        for t in [0.0, 0.1, 5.0, 10.0] {
            assert_eq!(fade_factor(t, 10.0, &plan), 1.0);
        }
    }

    #[test]
    fn overlay_is_clipped_at_frame_edges() {
        let mut frame = RgbaImage::from_pixel(10, 10, image::Rgba([0, 0, 0, 255]));
        let overlay = RgbaImage::from_pixel(6, 6, image::Rgba([255, 255, 255, 255]));

        overlay_onto(&mut frame, &overlay, -3, -3);
        overlay_onto(&mut frame, &overlay, 8, 8);

        assert_eq!(frame.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(9, 9).0, [255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(5, 5).0, [0, 0, 0, 255]);
    }

    #[test]
    fn transparent_overlay_pixels_leave_frame_untouched() {
        let mut frame = RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]));
        let overlay = RgbaImage::new(4, 4);
        overlay_onto(&mut frame, &overlay, 0, 0);
        assert!(frame.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn wav_duration_reads_back_written_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..22050 {
            writer.write_sample(((i % 100) as i16) * 50).unwrap();
        }
        writer.finalize().unwrap();

        let duration = wav_duration_seconds(&path).unwrap();
        assert!((duration - 1.0).abs() < 1e-9);
    }
}
