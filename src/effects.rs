use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;

const PAN_ZOOM: f64 = 1.08;
const ZOOM_END: f64 = 1.12;
const PARALLAX_ZOOM: f64 = 1.06;
const MAX_ROTATE_DEG: f64 = 1.8;
const MAX_TILT_SHEAR: f64 = 0.03;

/// Cubic smoothstep: slow at both ends, fastest in the middle.
pub fn ease_in_out(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

/// The fixed catalog of per-frame motion/color transforms.
///
/// Every effect is a stateless function of (frame, elapsed, duration): each
/// call redraws the frame in full, and the output always has the input's
/// dimensions. Geometric effects crop an interpolated sub-region and scale it
/// back up; color effects rewrite pixel values with clipped arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    PanLeft,
    PanRight,
    PanUp,
    PanDown,
    ZoomCenter,
    ZoomTop,
    ZoomBottom,
    Rotate,
    Tilt,
    Parallax,
    BrightnessPulse,
    ContrastWave,
    WarmGlow,
    VignetteFade,
    ColorShift,
}

pub const CATALOG: [Effect; 15] = [
    Effect::PanLeft,
    Effect::PanRight,
    Effect::PanUp,
    Effect::PanDown,
    Effect::ZoomCenter,
    Effect::ZoomTop,
    Effect::ZoomBottom,
    Effect::Rotate,
    Effect::Tilt,
    Effect::Parallax,
    Effect::BrightnessPulse,
    Effect::ContrastWave,
    Effect::WarmGlow,
    Effect::VignetteFade,
    Effect::ColorShift,
];

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::PanLeft => "pan_left",
            Effect::PanRight => "pan_right",
            Effect::PanUp => "pan_up",
            Effect::PanDown => "pan_down",
            Effect::ZoomCenter => "zoom_center",
            Effect::ZoomTop => "zoom_top",
            Effect::ZoomBottom => "zoom_bottom",
            Effect::Rotate => "rotate",
            Effect::Tilt => "tilt",
            Effect::Parallax => "parallax",
            Effect::BrightnessPulse => "brightness_pulse",
            Effect::ContrastWave => "contrast_wave",
            Effect::WarmGlow => "warm_glow",
            Effect::VignetteFade => "vignette_fade",
            Effect::ColorShift => "color_shift",
        }
    }

    pub fn from_name(name: &str) -> Option<Effect> {
        CATALOG.iter().copied().find(|e| e.name() == name)
    }

    /// Render the frame for elapsed time `t` of a clip lasting `duration`.
    ///
    /// The input frame is never mutated. An error here means the caller
    /// should fall back to the unmodified static frame.
    pub fn apply(&self, frame: &RgbaImage, t: f64, duration: f64) -> Result<RgbaImage> {
        if duration <= 0.0 {
            bail!("effect duration must be positive, got {duration}");
        }
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            bail!("effect input frame is empty");
        }

        let p = ease_in_out(t.clamp(0.0, duration) / duration);

        match self {
            Effect::PanLeft => pan(frame, p, Axis::X, true),
            Effect::PanRight => pan(frame, p, Axis::X, false),
            Effect::PanUp => pan(frame, p, Axis::Y, true),
            Effect::PanDown => pan(frame, p, Axis::Y, false),
            Effect::ZoomCenter => zoom(frame, p, Anchor::Center),
            Effect::ZoomTop => zoom(frame, p, Anchor::Top),
            Effect::ZoomBottom => zoom(frame, p, Anchor::Bottom),
            Effect::Rotate => Ok(rotate(frame, MAX_ROTATE_DEG.to_radians() * (2.0 * p - 1.0))),
            Effect::Tilt => Ok(tilt(frame, MAX_TILT_SHEAR * p)),
            Effect::Parallax => parallax(frame, p),
            Effect::BrightnessPulse => Ok(brightness(frame, pulse_factor(p, 0.08))),
            Effect::ContrastWave => Ok(contrast(frame, pulse_factor(p, 0.18))),
            Effect::WarmGlow => Ok(warm_glow(frame, p)),
            Effect::VignetteFade => Ok(vignette(frame, 0.45 * p)),
            Effect::ColorShift => Ok(color_shift(frame, 0.25 * p)),
        }
    }
}

enum Axis {
    X,
    Y,
}

enum Anchor {
    Center,
    Top,
    Bottom,
}

fn crop_and_restore(frame: &RgbaImage, x: u32, y: u32, cw: u32, ch: u32) -> Result<RgbaImage> {
    let (w, h) = frame.dimensions();
    if cw == 0 || ch == 0 || x + cw > w || y + ch > h {
        bail!("crop window {cw}x{ch}+{x}+{y} out of bounds for {w}x{h} frame");
    }
    let window = imageops::crop_imm(frame, x, y, cw, ch).to_image();
    Ok(imageops::resize(&window, w, h, FilterType::Triangle))
}

fn pan(frame: &RgbaImage, p: f64, axis: Axis, reverse: bool) -> Result<RgbaImage> {
    let (w, h) = frame.dimensions();
    let cw = (w as f64 / PAN_ZOOM).floor().max(1.0) as u32;
    let ch = (h as f64 / PAN_ZOOM).floor().max(1.0) as u32;

    let travel = if reverse { 1.0 - p } else { p };
    let (x, y) = match axis {
        Axis::X => ((((w - cw) as f64) * travel) as u32, (h - ch) / 2),
        Axis::Y => ((w - cw) / 2, (((h - ch) as f64) * travel) as u32),
    };

    crop_and_restore(frame, x, y, cw, ch)
}

fn zoom(frame: &RgbaImage, p: f64, anchor: Anchor) -> Result<RgbaImage> {
    let (w, h) = frame.dimensions();
    // Window shrinks from the full frame toward 1/ZOOM_END of it.
    let scale = 1.0 / (1.0 + (ZOOM_END - 1.0) * p);
    let cw = ((w as f64) * scale).floor().max(1.0) as u32;
    let ch = ((h as f64) * scale).floor().max(1.0) as u32;

    let x = (w - cw) / 2;
    let y = match anchor {
        Anchor::Center => (h - ch) / 2,
        Anchor::Top => 0,
        Anchor::Bottom => h - ch,
    };

    crop_and_restore(frame, x, y, cw, ch)
}

fn parallax(frame: &RgbaImage, p: f64) -> Result<RgbaImage> {
    let (w, h) = frame.dimensions();
    let cw = (w as f64 / PARALLAX_ZOOM).floor().max(1.0) as u32;
    let ch = (h as f64 / PARALLAX_ZOOM).floor().max(1.0) as u32;

    // Drift the window across the horizontal slack, centered vertically.
    let slack = (w - cw) as f64;
    let x = (slack * p) as u32;
    crop_and_restore(frame, x, (h - ch) / 2, cw, ch)
}

/// Inverse-mapped affine resample with bilinear filtering and edge clamping.
fn sample_affine(src: &RgbaImage, map: impl Fn(f64, f64) -> (f64, f64)) -> RgbaImage {
    let (w, h) = src.dimensions();
    let mut out = RgbaImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = map(x as f64, y as f64);
            let sx = sx.clamp(0.0, (w - 1) as f64);
            let sy = sy.clamp(0.0, (h - 1) as f64);

            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fx = sx - x0 as f64;
            let fy = sy - y0 as f64;

            let p00 = src.get_pixel(x0, y0).0;
            let p10 = src.get_pixel(x1, y0).0;
            let p01 = src.get_pixel(x0, y1).0;
            let p11 = src.get_pixel(x1, y1).0;

            let mut px = [0u8; 4];
            for c in 0..4 {
                let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
                let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
                px[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, y, image::Rgba(px));
        }
    }

    out
}

fn rotate(frame: &RgbaImage, angle: f64) -> RgbaImage {
    let (w, h) = frame.dimensions();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let (sin, cos) = (-angle).sin_cos();

    sample_affine(frame, |x, y| {
        let dx = x - cx;
        let dy = y - cy;
        (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
    })
}

fn tilt(frame: &RgbaImage, shear: f64) -> RgbaImage {
    let (w, h) = frame.dimensions();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);

    sample_affine(frame, |x, y| (x - shear * (y - cy), y - shear * 0.3 * (x - cx)))
}

fn pulse_factor(p: f64, amplitude: f64) -> f64 {
    1.0 + amplitude * (std::f64::consts::TAU * p).sin()
}

fn map_pixels(frame: &RgbaImage, f: impl Fn(u32, u32, [u8; 4]) -> [u8; 4]) -> RgbaImage {
    let mut out = frame.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        let rgba = f(x, y, px.0);
        *px = image::Rgba(rgba);
    }
    out
}

fn clip(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn brightness(frame: &RgbaImage, factor: f64) -> RgbaImage {
    map_pixels(frame, |_, _, p| {
        [
            clip(p[0] as f64 * factor),
            clip(p[1] as f64 * factor),
            clip(p[2] as f64 * factor),
            p[3],
        ]
    })
}

fn contrast(frame: &RgbaImage, factor: f64) -> RgbaImage {
    let adjust = |v: u8| clip((v as f64 - 128.0) * factor + 128.0);
    map_pixels(frame, |_, _, p| [adjust(p[0]), adjust(p[1]), adjust(p[2]), p[3]])
}

fn warm_glow(frame: &RgbaImage, p: f64) -> RgbaImage {
    map_pixels(frame, |_, _, px| {
        [
            clip(px[0] as f64 + 22.0 * p),
            clip(px[1] as f64 + 10.0 * p),
            clip(px[2] as f64 - 14.0 * p),
            px[3],
        ]
    })
}

fn vignette(frame: &RgbaImage, strength: f64) -> RgbaImage {
    let (w, h) = frame.dimensions();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let max_dist = (cx * cx + cy * cy).sqrt();

    map_pixels(frame, |x, y, px| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let norm = (dx * dx + dy * dy).sqrt() / max_dist;
        let factor = 1.0 - strength * ease_in_out(norm);
        [
            clip(px[0] as f64 * factor),
            clip(px[1] as f64 * factor),
            clip(px[2] as f64 * factor),
            px[3],
        ]
    })
}

fn color_shift(frame: &RgbaImage, mix: f64) -> RgbaImage {
    map_pixels(frame, |_, _, p| {
        let (r, g, b) = (p[0] as f64, p[1] as f64, p[2] as f64);
        [
            clip(r * (1.0 - mix) + g * mix),
            clip(g * (1.0 - mix) + b * mix),
            clip(b * (1.0 - mix) + r * mix),
            p[3],
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    #[test]
    fn ease_endpoints_and_midpoint() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert!((ease_in_out(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ease_is_monotonic_and_clamped() {
        let mut prev = ease_in_out(0.0);
        for i in 1..=100 {
            let v = ease_in_out(i as f64 / 100.0);
            assert!(v >= prev);
            prev = v;
        }
        assert_eq!(ease_in_out(-3.0), 0.0);
        assert_eq!(ease_in_out(4.0), 1.0);
    }

    #[test]
    fn catalog_has_fifteen_unique_named_effects() {
        let mut names: Vec<&str> = CATALOG.iter().map(|e| e.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 15);
    }

    #[test]
    fn from_name_round_trips() {
        for effect in CATALOG {
            assert_eq!(Effect::from_name(effect.name()), Some(effect));
        }
        assert_eq!(Effect::from_name("wobble"), None);
    }

    #[test]
    fn every_effect_preserves_frame_dimensions() {
        let frame = gradient_frame(128, 72);
        for effect in CATALOG {
            for t in [0.0, 1.3, 2.6] {
                let out = effect.apply(&frame, t, 2.6).unwrap();
                assert_eq!(out.dimensions(), frame.dimensions(), "{}", effect.name());
            }
        }
    }

    #[test]
    fn effects_do_not_mutate_input() {
        let frame = gradient_frame(64, 36);
        let before = frame.clone();
        for effect in CATALOG {
            let _ = effect.apply(&frame, 0.7, 2.0).unwrap();
        }
        assert_eq!(frame, before);
    }

    #[test]
    fn effects_are_deterministic() {
        let frame = gradient_frame(64, 36);
        for effect in CATALOG {
            let a = effect.apply(&frame, 1.1, 3.0).unwrap();
            let b = effect.apply(&frame, 1.1, 3.0).unwrap();
            assert_eq!(a, b, "{}", effect.name());
        }
    }

    #[test]
    fn zero_duration_is_rejected() {
        let frame = gradient_frame(16, 16);
        assert!(Effect::PanLeft.apply(&frame, 0.0, 0.0).is_err());
    }

    #[test]
    fn brightness_pulse_is_identity_at_the_ends() {
        let frame = gradient_frame(32, 32);
        let start = Effect::BrightnessPulse.apply(&frame, 0.0, 2.0).unwrap();
        let end = Effect::BrightnessPulse.apply(&frame, 2.0, 2.0).unwrap();
        assert_eq!(start, frame);
        assert_eq!(end, frame);
    }
}
