//! Token counting used to bound chunk sizes.
//!
//! The chunker only needs two things from a tokenizer: how many tokens a piece
//! of text costs, and where to cut a piece so the prefix (or suffix) fits a
//! budget. [`Cl100kTokenizer`] is the default and matches the BPE used by the
//! common OpenAI-compatible embedding models.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

/// Counts tokens in text. Implementations must be deterministic.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;

    /// Byte length of the longest prefix of `text`, ending on a char boundary,
    /// that encodes to at most `max_tokens` tokens.
    fn prefix_within(&self, text: &str, max_tokens: usize) -> usize {
        let ends: Vec<usize> = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect();
        let (mut lo, mut hi) = (0usize, ends.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.count(&text[..ends[mid]]) <= max_tokens {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 { 0 } else { ends[lo - 1] }
    }

    /// Byte offset of the earliest char boundary in `text` whose suffix encodes
    /// to at most `max_tokens` tokens. Returns `text.len()` when nothing fits.
    fn suffix_within(&self, text: &str, max_tokens: usize) -> usize {
        if max_tokens == 0 {
            return text.len();
        }
        let starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let (mut lo, mut hi) = (0usize, starts.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.count(&text[starts[mid]..]) <= max_tokens {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        starts.get(lo).copied().unwrap_or(text.len())
    }
}

static CL100K: OnceLock<CoreBPE> = OnceLock::new();

/// `cl100k_base` byte-pair encoding, loaded once per process.
#[derive(Clone, Copy)]
pub struct Cl100kTokenizer {
    bpe: &'static CoreBPE,
}

impl Cl100kTokenizer {
    pub fn shared() -> anyhow::Result<Self> {
        if let Some(bpe) = CL100K.get() {
            return Ok(Self { bpe });
        }
        let bpe = tiktoken_rs::cl100k_base()?;
        // Another thread may have won the race; either value is identical.
        let _ = CL100K.set(bpe);
        let bpe = CL100K
            .get()
            .ok_or_else(|| anyhow::anyhow!("cl100k_base encoder failed to initialize"))?;
        Ok(Self { bpe })
    }
}

impl std::fmt::Debug for Cl100kTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cl100kTokenizer")
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per char, which makes cut points easy to predict.
    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    #[test]
    fn test_prefix_within_respects_char_boundaries() {
        let text = "日本語のテキスト";
        let cut = CharTokenizer.prefix_within(text, 3);
        assert_eq!(&text[..cut], "日本語");
        assert_eq!(CharTokenizer.prefix_within(text, 0), 0);
        assert_eq!(CharTokenizer.prefix_within(text, 100), text.len());
    }

    #[test]
    fn test_suffix_within() {
        let text = "abcdef";
        assert_eq!(&text[CharTokenizer.suffix_within(text, 2)..], "ef");
        assert_eq!(CharTokenizer.suffix_within(text, 0), text.len());
        assert_eq!(CharTokenizer.suffix_within(text, 10), 0);
    }

    #[test]
    fn test_cl100k_counts_are_stable() {
        let tokenizer = Cl100kTokenizer::shared().unwrap();
        let text = "The quick brown fox jumps over the lazy dog.";
        let first = tokenizer.count(text);
        assert!(first > 0);
        assert_eq!(first, tokenizer.count(text));
        assert_eq!(tokenizer.count(""), 0);
    }
}
