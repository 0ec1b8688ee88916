use image::imageops::{self, FilterType};
use image::RgbaImage;
use rusttype::{point, Font, Scale};
use tracing::warn;

/// Every caption bitmap has this height; the compositor positions it at a
/// fixed offset from the bottom edge.
pub const CAPTION_HEIGHT: u32 = 120;

/// Render at an integer multiple of the target size, then downsample, so
/// glyph edges come out anti-aliased even from the bitmap fallback font.
const SUPERSAMPLE: u32 = 3;

const BASE_FONT_PX: f32 = 44.0;
const MIN_FONT_PX: f32 = 18.0;
const SHRINK_STEP_PX: f32 = 2.0;
const SIDE_MARGIN: u32 = 48;
const STROKE_PX: i32 = 2;

const FILL: [u8; 4] = [255, 255, 255, 255];
const STROKE: [u8; 4] = [0, 0, 0, 255];

const FONT_CANDIDATES: &[&str] = &[
    "resources/Inter-Regular.ttf",
    "C:/Windows/Fonts/arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
];

enum FontSource {
    Truetype(Font<'static>),
    Builtin,
}

/// Renders one caption line into a fixed-height RGBA bitmap with a stroked
/// outline. Pure: no filesystem or shared state is touched after
/// construction.
pub struct CaptionRenderer {
    font: FontSource,
}

impl CaptionRenderer {
    /// Walk the font candidates in order; if none loads, fall back to the
    /// built-in bitmap font instead of failing.
    pub fn new() -> Self {
        Self::with_candidates(FONT_CANDIDATES)
    }

    pub fn with_candidates(candidates: &[&str]) -> Self {
        for path in candidates {
            let Ok(bytes) = std::fs::read(path) else {
                continue;
            };
            if let Some(font) = Font::try_from_vec(bytes) {
                return Self {
                    font: FontSource::Truetype(font),
                };
            }
            warn!("Font file {path} exists but could not be parsed; trying next candidate");
        }
        warn!("No usable font candidate found; using the built-in bitmap font");
        Self {
            font: FontSource::Builtin,
        }
    }

    pub fn builtin() -> Self {
        Self {
            font: FontSource::Builtin,
        }
    }

    /// Shrink from the base size until the line fits the target width minus
    /// margins, bounded below by the minimum size. At the minimum the line is
    /// allowed to overflow and gets clipped by the canvas.
    pub fn fit_font_px(&self, text: &str, target_width: u32) -> f32 {
        let available = target_width.saturating_sub(2 * SIDE_MARGIN).max(1) as f32;
        let mut px = BASE_FONT_PX;
        while px > MIN_FONT_PX && self.measure(text, px) > available {
            px -= SHRINK_STEP_PX;
        }
        px.max(MIN_FONT_PX)
    }

    /// Advance width of `text` at `px`, in target-resolution pixels.
    pub fn measure(&self, text: &str, px: f32) -> f32 {
        match &self.font {
            FontSource::Truetype(font) => {
                let scale = Scale::uniform(px);
                text.chars()
                    .map(|c| font.glyph(c).scaled(scale).h_metrics().advance_width)
                    .sum()
            }
            FontSource::Builtin => builtin::measure(text, px),
        }
    }

    /// Render `text` centered in a `target_width` x `CAPTION_HEIGHT` bitmap
    /// on a transparent background.
    pub fn render(&self, text: &str, target_width: u32) -> RgbaImage {
        let target_width = target_width.max(1);
        if text.trim().is_empty() {
            return RgbaImage::new(target_width, CAPTION_HEIGHT);
        }

        let px = self.fit_font_px(text, target_width);

        let ss_w = target_width * SUPERSAMPLE;
        let ss_h = CAPTION_HEIGHT * SUPERSAMPLE;
        let ss_px = px * SUPERSAMPLE as f32;
        let mut canvas = RgbaImage::new(ss_w, ss_h);

        let text_w = self.measure(text, px) * SUPERSAMPLE as f32;
        let origin_x = ((ss_w as f32 - text_w) / 2.0).max(0.0);
        let origin_y = (ss_h as f32 - ss_px) / 2.0;

        let stroke = STROKE_PX * SUPERSAMPLE as i32;
        for dy in [-stroke, 0, stroke] {
            for dx in [-stroke, 0, stroke] {
                if dx == 0 && dy == 0 {
                    continue;
                }
                self.draw(
                    &mut canvas,
                    text,
                    ss_px,
                    origin_x + dx as f32,
                    origin_y + dy as f32,
                    STROKE,
                );
            }
        }
        self.draw(&mut canvas, text, ss_px, origin_x, origin_y, FILL);

        imageops::resize(&canvas, target_width, CAPTION_HEIGHT, FilterType::Lanczos3)
    }

    fn draw(&self, canvas: &mut RgbaImage, text: &str, px: f32, x: f32, y: f32, color: [u8; 4]) {
        match &self.font {
            FontSource::Truetype(font) => {
                let scale = Scale::uniform(px);
                let ascent = font.v_metrics(scale).ascent;
                for glyph in font.layout(text, scale, point(x, y + ascent)) {
                    let Some(bb) = glyph.pixel_bounding_box() else {
                        continue;
                    };
                    glyph.draw(|gx, gy, coverage| {
                        let cx = bb.min.x + gx as i32;
                        let cy = bb.min.y + gy as i32;
                        blend(canvas, cx, cy, color, coverage);
                    });
                }
            }
            FontSource::Builtin => builtin::draw(canvas, text, px, x, y, color),
        }
    }
}

impl Default for CaptionRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn blend(canvas: &mut RgbaImage, x: i32, y: i32, color: [u8; 4], coverage: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
        return;
    }
    let coverage = coverage.clamp(0.0, 1.0);
    if coverage <= 0.0 {
        return;
    }

    let px = canvas.get_pixel_mut(x as u32, y as u32);
    let src_a = coverage * color[3] as f32 / 255.0;
    let dst_a = px.0[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }
    for c in 0..3 {
        let src = color[c] as f32 * src_a;
        let dst = px.0[c] as f32 * dst_a * (1.0 - src_a);
        px.0[c] = ((src + dst) / out_a).round().clamp(0.0, 255.0) as u8;
    }
    px.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Last-resort 5x7 bitmap font covering uppercase letters, digits and basic
/// punctuation. Lowercase input is drawn with the uppercase glyphs.
mod builtin {
    use image::RgbaImage;

    const GLYPH_W: u32 = 5;
    const GLYPH_H: u32 = 7;
    const GLYPH_SPACING: u32 = 1;

    // Rows top to bottom, low 5 bits, most significant bit is the left column.
    const GLYPHS: &[(char, [u8; 7])] = &[
        (' ', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        ('A', [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
        ('B', [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E]),
        ('C', [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E]),
        ('D', [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E]),
        ('E', [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F]),
        ('F', [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10]),
        ('G', [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0E]),
        ('H', [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
        ('I', [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E]),
        ('J', [0x01, 0x01, 0x01, 0x01, 0x01, 0x11, 0x0E]),
        ('K', [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11]),
        ('L', [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F]),
        ('M', [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11]),
        ('N', [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11]),
        ('O', [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E]),
        ('P', [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10]),
        ('Q', [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D]),
        ('R', [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11]),
        ('S', [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E]),
        ('T', [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04]),
        ('U', [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E]),
        ('V', [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04]),
        ('W', [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11]),
        ('X', [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11]),
        ('Y', [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04]),
        ('Z', [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F]),
        ('0', [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E]),
        ('1', [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E]),
        ('2', [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F]),
        ('3', [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E]),
        ('4', [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02]),
        ('5', [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E]),
        ('6', [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E]),
        ('7', [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08]),
        ('8', [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E]),
        ('9', [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C]),
        ('.', [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C]),
        (',', [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08]),
        ('!', [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04]),
        ('?', [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04]),
        ('\'', [0x0C, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00]),
        ('-', [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00]),
        (':', [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00]),
    ];

    const UNKNOWN: [u8; 7] = [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F];

    fn glyph_for(c: char) -> [u8; 7] {
        let c = c.to_ascii_uppercase();
        GLYPHS
            .iter()
            .find(|(g, _)| *g == c)
            .map(|(_, rows)| *rows)
            .unwrap_or(UNKNOWN)
    }

    fn cell_scale(px: f32) -> u32 {
        ((px / GLYPH_H as f32).round() as u32).max(1)
    }

    pub fn measure(text: &str, px: f32) -> f32 {
        let scale = cell_scale(px);
        (text.chars().count() as u32 * (GLYPH_W + GLYPH_SPACING) * scale) as f32
    }

    pub fn draw(canvas: &mut RgbaImage, text: &str, px: f32, x: f32, y: f32, color: [u8; 4]) {
        let scale = cell_scale(px);
        let mut pen_x = x.round() as i32;
        let pen_y = y.round() as i32;

        for c in text.chars() {
            let rows = glyph_for(c);
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                        continue;
                    }
                    for sy in 0..scale {
                        for sx in 0..scale {
                            let cx = pen_x + (col * scale + sx) as i32;
                            let cy = pen_y + (row as u32 * scale + sy) as i32;
                            super::blend(canvas, cx, cy, color, 1.0);
                        }
                    }
                }
            }
            pen_x += ((GLYPH_W + GLYPH_SPACING) * scale) as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_has_fixed_dimensions() {
        let renderer = CaptionRenderer::builtin();
        let img = renderer.render("Hello world", 640);
        assert_eq!(img.dimensions(), (640, CAPTION_HEIGHT));
    }

    #[test]
    fn empty_text_renders_fully_transparent() {
        let renderer = CaptionRenderer::builtin();
        let img = renderer.render("   ", 320);
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn short_line_fits_within_target_width() {
        let renderer = CaptionRenderer::builtin();
        let px = renderer.fit_font_px("short line", 640);
        assert!(renderer.measure("short line", px) <= (640 - 2 * SIDE_MARGIN) as f32);
    }

    #[test]
    fn shrink_loop_stops_at_minimum_font_size() {
        let renderer = CaptionRenderer::builtin();
        let long = "a very long caption that cannot possibly fit in a tiny target width";
        let px = renderer.fit_font_px(long, 120);
        assert_eq!(px, MIN_FONT_PX);
        // Rendering still succeeds; the overflow is clipped by the canvas.
        let img = renderer.render(long, 120);
        assert_eq!(img.dimensions(), (120, CAPTION_HEIGHT));
    }

    #[test]
    fn missing_font_candidates_fall_back_without_failing() {
        let renderer = CaptionRenderer::with_candidates(&["/no/such/font.ttf"]);
        let img = renderer.render("fallback", 400);
        assert_eq!(img.dimensions(), (400, CAPTION_HEIGHT));
        assert!(img.pixels().any(|p| p.0[3] > 0));
    }

    #[test]
    fn rendered_text_is_horizontally_centered() {
        let renderer = CaptionRenderer::builtin();
        let img = renderer.render("AB", 400);

        let mut min_x = u32::MAX;
        let mut max_x = 0u32;
        for (x, _, p) in img.enumerate_pixels() {
            if p.0[3] > 0 {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
        }
        assert!(min_x < max_x);
        let left_gap = min_x;
        let right_gap = 400 - 1 - max_x;
        assert!((left_gap as i64 - right_gap as i64).abs() <= 8);
    }
}
