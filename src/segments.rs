use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Caption lines wider than this are wrapped onto the next line.
pub const MAX_LINE_CHARS: usize = 42;

/// One caption line with the time window it is shown for.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Word-preserving wrap of `text` into lines of at most `max_chars` characters.
///
/// A single word longer than `max_chars` is kept whole on its own line; the
/// resulting caption may overflow its box, which is accepted.
pub fn wrap_lines(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        if line.is_empty() {
            line.push_str(word);
            continue;
        }
        if line.chars().count() + 1 + word.chars().count() <= max_chars {
            line.push(' ');
            line.push_str(word);
        } else {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }

    lines
}

/// Split narration text into wrapped lines and give each an equal share of
/// `duration`, in reading order. Empty text yields no segments.
pub fn split_into_segments(text: &str, duration: f64, max_chars: usize) -> Vec<Segment> {
    let lines = wrap_lines(text, max_chars);
    if lines.is_empty() || duration <= 0.0 {
        return Vec::new();
    }

    let count = lines.len();
    let per_line = duration / count as f64;

    lines
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let start = i as f64 * per_line;
            // Pin the last end to the full duration so float drift never
            // leaves a frame uncovered.
            let end = if i + 1 == count {
                duration
            } else {
                (i + 1) as f64 * per_line
            };
            Segment { text, start, end }
        })
        .collect()
}

/// One entry of the `audio.json` sidecar: where a scene's narration sits in
/// the concatenated full audio track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSegmentMeta {
    pub file: String,
    pub text: String,
    pub duration: f64,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioSidecar {
    pub segments: Vec<AudioSegmentMeta>,
    pub total_duration: f64,
    #[serde(default)]
    pub generated_at: String,
}

impl AudioSidecar {
    /// Append a segment at the current end of the track, then advance the
    /// cursor by the segment duration plus the trailing inter-scene delay.
    pub fn push(&mut self, file: &str, text: &str, duration: f64, trailing_delay: f64) {
        let start = self.total_duration;
        let end = start + duration;
        self.segments.push(AudioSegmentMeta {
            file: file.to_string(),
            text: text.to_string(),
            duration,
            start,
            end,
        });
        self.total_duration = end + trailing_delay.max(0.0);
    }

    pub fn finalize(&mut self) {
        self.generated_at = Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_segments() {
        assert!(split_into_segments("", 5.0, MAX_LINE_CHARS).is_empty());
        assert!(split_into_segments("   ", 5.0, MAX_LINE_CHARS).is_empty());
    }

    #[test]
    fn segment_count_matches_wrapped_lines() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        let lines = wrap_lines(text, 20);
        let segments = split_into_segments(text, 8.0, 20);
        assert_eq!(segments.len(), lines.len());
        for (seg, line) in segments.iter().zip(lines.iter()) {
            assert_eq!(&seg.text, line);
        }
    }

    #[test]
    fn starts_non_decreasing_and_cover_duration() {
        let text = "one two three four five six seven eight nine ten";
        let duration = 7.25;
        let segments = split_into_segments(text, duration, 12);
        assert!(!segments.is_empty());

        let mut covered = 0.0;
        let mut prev_start = -1.0;
        for seg in &segments {
            assert!(seg.start >= prev_start);
            assert!(seg.end > seg.start);
            prev_start = seg.start;
            covered += seg.end - seg.start;
        }
        assert!((covered - duration).abs() < 1e-9);
        assert_eq!(segments.last().unwrap().end, duration);
    }

    #[test]
    fn long_word_is_not_force_broken() {
        let text = "pneumonoultramicroscopicsilicovolcanoconiosis is long";
        let lines = wrap_lines(text, 10);
        assert_eq!(lines[0], "pneumonoultramicroscopicsilicovolcanoconiosis");
    }

    #[test]
    fn wrap_respects_max_chars_for_normal_words() {
        let lines = wrap_lines("aa bb cc dd ee ff", 5);
        for line in &lines {
            assert!(line.chars().count() <= 5, "line too wide: {line}");
        }
    }

    #[test]
    fn sidecar_accumulates_offsets_with_delays() {
        let mut sidecar = AudioSidecar::default();
        sidecar.push("scene_1.wav", "first", 2.0, 0.5);
        sidecar.push("scene_2.wav", "second", 3.0, 0.0);

        assert_eq!(sidecar.segments[0].start, 0.0);
        assert_eq!(sidecar.segments[0].end, 2.0);
        assert_eq!(sidecar.segments[1].start, 2.5);
        assert_eq!(sidecar.segments[1].end, 5.5);
        assert_eq!(sidecar.total_duration, 5.5);
    }
}
