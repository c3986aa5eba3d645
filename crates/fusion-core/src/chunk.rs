//! Overlapping fixed-window text splitter.
//!
//! Splits extracted document text into windows of `chunk_size` characters.
//! Consecutive windows share `chunk_overlap` characters, so a sentence cut at
//! one window's end reappears at the start of the next.
//!
//! # Algorithm
//!
//! 1. Index the text by `char` (not byte) so multi-byte UTF-8 is never split.
//! 2. Emit the window `[start, min(start + chunk_size, len))`.
//! 3. Advance `start` by `chunk_size - chunk_overlap` while `start < len`.
//! 4. Windows that are entirely whitespace are dropped.
//!
//! The output depends only on the input text and the two sizes.
//!
//! # Example
//!
//! ```rust
//! use fusion_core::chunk::{split_text, SplitConfig};
//!
//! let text = "x".repeat(2500);
//! let chunks = split_text(&text, &SplitConfig { chunk_size: 1000, chunk_overlap: 200 });
//! assert_eq!(chunks.len(), 4);
//! assert_eq!(chunks[3].start, 2400);
//! ```

use anyhow::{bail, Result};

/// Window sizes, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }
}

/// One window of split text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSplit {
    /// Position in split order, starting at 0.
    pub index: usize,
    /// Character offset of the window in the source text.
    pub start: usize,
    pub text: String,
}

/// Split `text` into overlapping windows. Returns an empty vec for blank input.
pub fn split_text(text: &str, config: &SplitConfig) -> Vec<TextSplit> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let stride = config.stride();
    let size = config.chunk_size.max(1);

    let mut splits = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            splits.push(TextSplit {
                index: splits.len(),
                start,
                text: window,
            });
        }
        start += stride;
    }
    splits
}

/// Join loaded sections into the single text the splitter sees.
pub fn join_sections(sections: &[String]) -> String {
    sections
        .iter()
        .map(|s| s.trim_end())
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize) -> SplitConfig {
        SplitConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn test_2500_chars_gives_four_windows() {
        let text: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = split_text(&text, &cfg(1000, 200));
        assert_eq!(chunks.len(), 4);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 800, 1600, 2400]);
        assert_eq!(chunks[0].text.chars().count(), 1000);
        assert_eq!(chunks[2].text.chars().count(), 900);
        assert_eq!(chunks[3].text.chars().count(), 100);
    }

    #[test]
    fn test_overlap_is_shared() {
        let text: String = (0..1800).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = split_text(&text, &cfg(1000, 200));
        let tail: String = chunks[0].text.chars().skip(800).collect();
        let head: String = chunks[1].text.chars().take(200).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn test_short_text_single_window() {
        let chunks = split_text("Hello, world!", &cfg(1000, 200));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_blank_text_no_windows() {
        assert!(split_text("", &cfg(1000, 200)).is_empty());
        assert!(split_text("   \n\n  ", &cfg(1000, 200)).is_empty());
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "é".repeat(30);
        let chunks = split_text(&text, &cfg(10, 2));
        assert!(chunks.iter().all(|c| c.text.chars().all(|ch| ch == 'é')));
        assert_eq!(chunks[1].start, 8);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta. ".repeat(200);
        let a = split_text(&text, &cfg(300, 50));
        let b = split_text(&text, &cfg(300, 50));
        assert_eq!(a, b);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_validate() {
        assert!(cfg(1000, 200).validate().is_ok());
        assert!(cfg(0, 0).validate().is_err());
        assert!(cfg(100, 100).validate().is_err());
    }

    #[test]
    fn test_join_sections_skips_blank() {
        let joined = join_sections(&["Page one.\n".to_string(), "  ".to_string(), "Page two.".to_string()]);
        assert_eq!(joined, "Page one.\n\nPage two.");
    }
}
