//! Overlapping-window chunker for parser fragments
//!
//! Long fragments are split into windows of roughly `chunk_size` characters
//! with `overlap` characters carried over from the end of each window into
//! the next. Splits prefer paragraph breaks, then sentence ends, then plain
//! whitespace, and never land inside a whitespace-free token. Short tail
//! windows are folded back into the previous one.

use crate::config::IngestConfig;

/// Fraction of `chunk_size` below which a trailing chunk is merged back
const TAIL_MERGE_RATIO: f32 = 0.4;

/// Window of text searched backwards for a sentence boundary
const SENTENCE_LOOKBACK: usize = 200;

/// Splits fragment text into overlapping windows
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    enabled: bool,
}

impl Chunker {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
            enabled: config.chunking_enabled,
        }
    }

    /// Split one fragment's text. Returns the fragment unchanged when
    /// chunking is disabled or the text already fits a single window.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();

        if !self.enabled || chars.len() <= self.chunk_size {
            let trimmed = text.trim();
            return if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            };
        }

        let mut chunks: Vec<Vec<char>> = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let window_end = (start + self.chunk_size).min(chars.len());
            let cut = if window_end == chars.len() {
                window_end
            } else {
                self.find_boundary(&chars, start, window_end)
            };

            let piece = &chars[start..cut];
            if piece.iter().any(|c| !c.is_whitespace()) {
                chunks.push(piece.to_vec());
            }

            if cut >= chars.len() {
                break;
            }

            // Carry the overlap from the end of this window into the next;
            // always make forward progress.
            let advance = (cut - start).saturating_sub(self.overlap).max(1);
            start += advance;
        }

        self.merge_short_tail(&mut chunks);

        chunks
            .into_iter()
            .map(|c| c.into_iter().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Pick the cut position for a window ending at `window_end`.
    /// Preference: paragraph break > sentence end > whitespace. When the
    /// window contains no whitespace at all, the cut moves forward to the
    /// end of the current token instead of splitting it.
    fn find_boundary(&self, chars: &[char], start: usize, window_end: usize) -> usize {
        let window = &chars[start..window_end];
        let min_cut = window.len() / 2;

        // Paragraph break: "\n\n" in the second half of the window
        let mut i = window.len();
        while i >= 2 {
            if window[i - 1] == '\n' && window[i - 2] == '\n' {
                if i - 1 > min_cut {
                    return start + i - 1;
                }
                break;
            }
            i -= 1;
        }

        // Sentence end near the window tail
        let lookback_start = window.len().saturating_sub(SENTENCE_LOOKBACK);
        for j in (lookback_start..window.len()).rev() {
            if matches!(window[j], '.' | '!' | '?') {
                let next_is_break = window.get(j + 1).map_or(true, |c| c.is_whitespace());
                if next_is_break && j + 1 > min_cut {
                    return start + j + 1;
                }
            }
        }

        // Whitespace fallback
        if let Some(j) = window.iter().rposition(|c| c.is_whitespace()) {
            if j > 0 {
                return start + j;
            }
        }

        // Whitespace-free window: extend to the end of the token
        let mut end = window_end;
        while end < chars.len() && !chars[end].is_whitespace() {
            end += 1;
        }
        end
    }

    fn merge_short_tail(&self, chunks: &mut Vec<Vec<char>>) {
        let min_tail = (self.chunk_size as f32 * TAIL_MERGE_RATIO) as usize;
        if chunks.len() < 2 {
            return;
        }
        let last_len = chunks[chunks.len() - 1].len();
        if last_len >= min_tail {
            return;
        }

        let tail = chunks.pop().unwrap_or_default();
        // The tail begins with the overlap already present at the end of the
        // previous chunk; skip it before appending.
        let skip = self.overlap.min(tail.len());
        if let Some(prev) = chunks.last_mut() {
            prev.extend_from_slice(&tail[skip..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(&IngestConfig {
            chunking_enabled: true,
            chunk_size: size,
            chunk_overlap: overlap,
            snapshot_path: None,
            upload_cache_dir: None,
        })
    }

    #[test]
    fn test_short_text_passes_through() {
        let c = chunker(800, 50);
        let chunks = c.split("This is a short text.");
        assert_eq!(chunks, vec!["This is a short text.".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let c = chunker(800, 50);
        assert!(c.split("   \n  ").is_empty());
    }

    #[test]
    fn test_long_text_is_windowed_with_overlap() {
        let c = chunker(100, 20);
        let sentence = "The minimum common equity tier one ratio is four point five percent. ";
        let text = sentence.repeat(10);
        let chunks = c.split(&text);

        assert!(chunks.len() > 1, "long text should produce several chunks");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 160, "chunk too large: {}", chunk.len());
        }
        // Overlap means consecutive chunks share content
        let first_tail: String = chunks[0].chars().rev().take(10).collect();
        assert!(!first_tail.is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let c = chunker(60, 10);
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = c.split(&text);
        assert!(chunks[0].chars().all(|ch| ch == 'a'));
    }

    #[test]
    fn test_never_splits_inside_token() {
        let c = chunker(20, 5);
        let token = "x".repeat(50);
        let text = format!("{} tail", token);
        let chunks = c.split(&text);
        // The oversized token must appear intact in some chunk
        assert!(chunks.iter().any(|ch| ch.contains(&token)));
    }

    #[test]
    fn test_short_tail_merged() {
        let c = chunker(100, 10);
        // Build text that would leave a tiny tail window
        let text = format!("{} {}", "word ".repeat(22).trim(), "end.");
        let chunks = c.split(&text);
        if chunks.len() > 1 {
            let last = chunks.last().unwrap();
            assert!(last.chars().count() >= 40, "tail should have been merged: {:?}", last);
        }
    }

    #[test]
    fn test_disabled_chunker_passes_through() {
        let c = Chunker::new(&IngestConfig {
            chunking_enabled: false,
            chunk_size: 10,
            chunk_overlap: 2,
            snapshot_path: None,
            upload_cache_dir: None,
        });
        let text = "a much longer text than ten characters";
        assert_eq!(c.split(text), vec![text.to_string()]);
    }
}
