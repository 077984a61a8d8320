//! Token-window text chunker.
//!
//! Splits file text into overlapping segments sized for an embedding model.
//! A "token" is a maximal run of non-whitespace characters, so splits only
//! ever fall on whitespace boundaries. With `split_mid_word = true`, long
//! words are further cut into runs of [`CHARS_PER_TOKEN`] characters and a
//! split may land inside a word.
//!
//! The chunker is a pure function of `(text, config)`: there is no shared
//! splitter instance, the caller passes a [`ChunkingConfig`] on every call.
//!
//! # Algorithm
//!
//! 1. Tokenize, keeping the byte range of every token in the source text.
//! 2. If the text has at most `max_tokens` tokens, return it unchanged as
//!    the only segment.
//! 3. Otherwise slide a window of `max_tokens` tokens with a stride of
//!    `max_tokens - overlap_tokens`. Each segment is the source slice from
//!    the first to the last token of its window, so indentation and line
//!    breaks inside a segment are preserved.
//! 4. If the last window would add fewer than `min_chunk_tokens` new
//!    tokens, it is moved back to end-align with the text: it stays within
//!    `max_tokens` and shares more than `overlap_tokens` with its
//!    predecessor.
//! 5. Windows beyond `max_chunks` are **dropped**. Content past that point
//!    is not indexed.
//!
//! # Example
//!
//! ```rust
//! use repolens_core::chunk::{split_text, ChunkingConfig};
//!
//! let config = ChunkingConfig::default();
//! let segments = split_text("fn main() {}\n", &config);
//! assert_eq!(segments, vec!["fn main() {}\n".to_string()]);
//! ```

use serde::Deserialize;

/// Characters per token when `split_mid_word` is enabled.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunking parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Maximum tokens per segment.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Tokens shared by consecutive segments.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Smallest number of new tokens a trailing segment may contribute.
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
    /// Maximum segments per input; the rest is dropped.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    /// Allow splits inside a word.
    #[serde(default)]
    pub split_mid_word: bool,
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    100
}
fn default_min_chunk_tokens() -> usize {
    5
}
fn default_max_chunks() -> usize {
    50
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            min_chunk_tokens: default_min_chunk_tokens(),
            max_chunks: default_max_chunks(),
            split_mid_word: false,
        }
    }
}

/// Byte ranges `[start, end)` of every token in `text`.
pub fn tokenize(text: &str, split_mid_word: bool) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars_in_token = 0usize;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push((s, i));
            }
            chars_in_token = 0;
            continue;
        }
        if split_mid_word && chars_in_token == CHARS_PER_TOKEN {
            if let Some(s) = start.take() {
                tokens.push((s, i));
            }
            chars_in_token = 0;
        }
        if start.is_none() {
            start = Some(i);
        }
        chars_in_token += 1;
    }
    if let Some(s) = start {
        tokens.push((s, text.len()));
    }
    tokens
}

/// Number of tokens in `text` under the given mode.
pub fn count_tokens(text: &str, split_mid_word: bool) -> usize {
    tokenize(text, split_mid_word).len()
}

/// Split `text` into ordered, overlapping segments.
///
/// Blank input yields no segments.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let tokens = tokenize(text, config.split_mid_word);
    if tokens.is_empty() {
        return Vec::new();
    }

    let max_tokens = config.max_tokens.max(1);
    let n = tokens.len();
    if n <= max_tokens {
        return vec![text.to_string()];
    }

    let overlap = config.overlap_tokens.min(max_tokens - 1);
    let stride = max_tokens - overlap;

    let mut starts = Vec::new();
    let mut start = 0usize;
    loop {
        starts.push(start);
        if start + max_tokens >= n {
            break;
        }
        start += stride;
    }

    if starts.len() > 1 {
        let prev_end = starts[starts.len() - 2] + max_tokens;
        let fresh = n - prev_end;
        if fresh < config.min_chunk_tokens {
            if let Some(last) = starts.last_mut() {
                *last = n - max_tokens;
            }
        }
    }

    if starts.len() > config.max_chunks {
        tracing::debug!(
            windows = starts.len(),
            max_chunks = config.max_chunks,
            "Dropping segments beyond max_chunks"
        );
        starts.truncate(config.max_chunks.max(1));
    }

    starts
        .into_iter()
        .map(|s| {
            let e = (s + max_tokens).min(n);
            text[tokens[s].0..tokens[e - 1].1].to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_tokens: usize, overlap_tokens: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens,
            overlap_tokens,
            min_chunk_tokens: 1,
            max_chunks: 1000,
            split_mid_word: false,
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_short_text_is_single_identical_segment() {
        let text = "  public class Foo {\n    int x;\n}\n";
        let segments = split_text(text, &config(50, 10));
        assert_eq!(segments, vec![text.to_string()]);
    }

    #[test]
    fn test_exactly_max_tokens_is_single_segment() {
        let text = words(20);
        assert_eq!(split_text(&text, &config(20, 5)), vec![text]);
    }

    #[test]
    fn test_blank_text_has_no_segments() {
        assert!(split_text("", &config(10, 2)).is_empty());
        assert!(split_text(" \n\t ", &config(10, 2)).is_empty());
    }

    #[test]
    fn test_segments_respect_max_tokens() {
        let text = words(1000);
        let cfg = config(64, 16);
        let segments = split_text(&text, &cfg);
        assert!(segments.len() > 1);
        for s in &segments {
            assert!(count_tokens(s, false) <= 64, "segment too long: {}", s);
        }
    }

    #[test]
    fn test_adjacent_segments_share_overlap() {
        // 10 + 8 * k tokens => every window is full, no tail adjustment
        let text = words(10 + 8 * 5);
        let cfg = config(10, 2);
        let segments = split_text(&text, &cfg);
        assert_eq!(segments.len(), 6);
        for pair in segments.windows(2) {
            let a: Vec<&str> = pair[0].split_whitespace().collect();
            let b: Vec<&str> = pair[1].split_whitespace().collect();
            assert_eq!(&a[a.len() - 2..], &b[..2]);
        }
    }

    #[test]
    fn test_every_token_is_covered() {
        let text = words(333);
        let segments = split_text(&text, &config(40, 7));
        let mut seen = std::collections::HashSet::new();
        for s in &segments {
            for w in s.split_whitespace() {
                seen.insert(w.to_string());
            }
        }
        assert_eq!(seen.len(), 333);
    }

    #[test]
    fn test_small_tail_is_end_aligned() {
        // a window at 16 would add only one token past the previous window
        let text = words(19);
        let cfg = ChunkingConfig {
            min_chunk_tokens: 3,
            ..config(10, 2)
        };
        let segments = split_text(&text, &cfg);
        let last: Vec<&str> = segments.last().unwrap().split_whitespace().collect();
        assert_eq!(last.len(), 10);
        assert_eq!(*last.last().unwrap(), "w18");
        assert_eq!(last[0], "w9");
    }

    #[test]
    fn test_max_chunks_drops_excess() {
        let text = words(500);
        let cfg = ChunkingConfig {
            max_chunks: 3,
            ..config(20, 0)
        };
        let segments = split_text(&text, &cfg);
        assert_eq!(segments.len(), 3);
        assert!(segments[2].ends_with("w59"));
    }

    #[test]
    fn test_splits_never_cut_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        for s in split_text(text, &config(4, 1)) {
            for w in s.split_whitespace() {
                assert!(text.split_whitespace().any(|orig| orig == w));
            }
        }
    }

    #[test]
    fn test_mid_word_mode_cuts_long_words() {
        assert_eq!(count_tokens("abcdefghij", true), 3);
        assert_eq!(count_tokens("abcdefghij", false), 1);
        let cfg = ChunkingConfig {
            split_mid_word: true,
            ..config(2, 0)
        };
        let segments = split_text("abcdefghijklmnop", &cfg);
        assert_eq!(segments, vec!["abcdefgh".to_string(), "ijklmnop".to_string()]);
    }

    #[test]
    fn test_preserves_layout_inside_segment() {
        let text = "fn a() {\n    1\n}\n\nfn b() {\n    2\n}";
        let segments = split_text(text, &config(4, 0));
        assert_eq!(segments[0], "fn a() {\n    1");
    }

    #[test]
    fn test_deterministic() {
        let text = words(250);
        let cfg = config(30, 5);
        assert_eq!(split_text(&text, &cfg), split_text(&text, &cfg));
    }
}
