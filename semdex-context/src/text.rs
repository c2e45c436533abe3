//! Token-bounded, overlapping, content-addressed text chunking.
//!
//! Documents are split into sentences, and sentences are packed greedily into
//! chunks that never exceed `max_tokens`. Each new chunk is seeded with
//! trailing sentences of the previous one (up to `overlap_tokens`) so that
//! context carries across boundaries.
//!
//! # Sentence boundaries
//!
//! A sentence ends right after any of `。？！.!?` or a newline. The terminator
//! stays with the sentence it closes, so concatenating all sentences gives back
//! the original text exactly.
//!
//! # Oversized sentences
//!
//! A single sentence longer than `max_tokens` is cut at the token budget, then
//! the cut is pulled back (at most [`BREAK_SEARCH_WINDOW`] chars) to the nearest
//! whitespace or punctuation so words are not severed. The next piece starts
//! `overlap_tokens` before the cut. Every iteration consumes at least one char,
//! so text with no structure at all still terminates.
//!
//! # Identity
//!
//! Chunks are trimmed and identified by the SHA-256 of their text. The same
//! `(text, max_tokens, overlap_tokens)` always yields the same chunks and the
//! same hashes, which is what incremental index maintenance compares.
//!
//! ```
//! use std::sync::Arc;
//! use semdex_context::{Cl100kTokenizer, TextChunker};
//!
//! let tokenizer = Cl100kTokenizer::shared().unwrap();
//! let chunker = TextChunker::with_tokenizer(Arc::new(tokenizer), 500, 50);
//! let chunks = chunker.chunk("First sentence. Second sentence!\nThird line");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "First sentence. Second sentence!\nThird line");
//! ```

use crate::tokenizer::{Cl100kTokenizer, Tokenizer};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

/// Default chunk budget in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 500;
/// Default overlap carried into the next chunk, in tokens.
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;
/// How far (in chars) a forced cut may move back to find a clean break.
pub const BREAK_SEARCH_WINDOW: usize = 200;
/// Initial bytes examined per budget token when cutting an oversized sentence.
const WINDOW_BYTES_PER_TOKEN: usize = 16;

const SENTENCE_TERMINATORS: &str = r"[。？！.!?\n]";

fn sentence_boundary() -> &'static Regex {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    BOUNDARY.get_or_init(|| Regex::new(SENTENCE_TERMINATORS).expect("static pattern"))
}

/// A single chunk of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position of this chunk within the document (0-indexed).
    pub sequence: usize,
    /// Trimmed chunk text.
    pub text: String,
    /// Token count of `text`.
    pub tokens: usize,
    /// Lowercase hex SHA-256 of `text`.
    pub hash: String,
}

/// Hex SHA-256 of a chunk's text; the chunk's identity.
pub fn chunk_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Splits text into sentences, keeping each terminator with its sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in sentence_boundary().find_iter(text) {
        sentences.push(&text[start..m.end()]);
        start = m.end();
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Packs sentences into token-bounded chunks.
#[derive(Clone)]
pub struct TextChunker {
    tokenizer: Arc<dyn Tokenizer>,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl std::fmt::Debug for TextChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextChunker")
            .field("max_tokens", &self.max_tokens)
            .field("overlap_tokens", &self.overlap_tokens)
            .finish()
    }
}

impl TextChunker {
    /// Creates a chunker backed by the shared `cl100k_base` tokenizer.
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> anyhow::Result<Self> {
        Ok(Self::with_tokenizer(
            Arc::new(Cl100kTokenizer::shared()?),
            max_tokens,
            overlap_tokens,
        ))
    }

    /// Creates a chunker with a custom tokenizer.
    ///
    /// `max_tokens` is raised to at least 1 and the overlap is capped below it,
    /// otherwise a chunk could consist of nothing but overlap.
    pub fn with_tokenizer(
        tokenizer: Arc<dyn Tokenizer>,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            tokenizer,
            max_tokens,
            overlap_tokens: overlap_tokens.min(max_tokens - 1),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Chunks `text`. Empty or whitespace-only input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        if text.trim().is_empty() {
            return chunks;
        }

        let sentences = split_sentences(text);
        let counts: Vec<usize> = sentences
            .iter()
            .map(|s| self.tokenizer.count(s))
            .collect();

        let mut current = String::new();
        let mut current_tokens = 0usize;

        for (i, (&sentence, &tokens)) in sentences.iter().zip(&counts).enumerate() {
            if tokens > self.max_tokens {
                self.emit(&mut chunks, &current);
                let tail = self.split_oversized(sentence, &mut chunks);
                current = tail.to_string();
                current_tokens = self.tokenizer.count(tail);
                continue;
            }

            if current_tokens + tokens > self.max_tokens {
                self.emit(&mut chunks, &current);
                let (seed, seed_tokens) = self.overlap_seed(&sentences[..i], &counts[..i], tokens);
                current = seed;
                current_tokens = seed_tokens;
            }

            current.push_str(sentence);
            current_tokens += tokens;
        }
        self.emit(&mut chunks, &current);
        chunks
    }

    /// Convenience wrapper returning only chunk texts.
    pub fn chunk_strings(&self, text: &str) -> Vec<String> {
        self.chunk(text).into_iter().map(|c| c.text).collect()
    }

    fn emit(&self, chunks: &mut Vec<Chunk>, raw: &str) {
        let text = raw.trim();
        if text.is_empty() {
            return;
        }
        chunks.push(Chunk {
            sequence: chunks.len(),
            text: text.to_string(),
            tokens: self.tokenizer.count(text),
            hash: chunk_hash(text),
        });
    }

    /// Walks back over preceding sentences collecting up to `overlap_tokens`,
    /// leaving room for the sentence about to be added.
    fn overlap_seed(&self, previous: &[&str], counts: &[usize], incoming: usize) -> (String, usize) {
        let mut taken = 0usize;
        let mut seed_tokens = 0usize;
        for &tokens in counts.iter().rev() {
            let next = seed_tokens + tokens;
            if next > self.overlap_tokens || next + incoming > self.max_tokens {
                break;
            }
            seed_tokens = next;
            taken += 1;
        }
        let seed = previous[previous.len() - taken..].concat();
        (seed, seed_tokens)
    }

    /// Emits budget-sized pieces of an oversized sentence and returns the
    /// remainder, which fits the budget and seeds the next chunk.
    fn split_oversized<'a>(&self, sentence: &'a str, chunks: &mut Vec<Chunk>) -> &'a str {
        let mut rest = sentence;
        while let Some(window) = self.over_budget_prefix(rest) {
            let mut cut = self.tokenizer.prefix_within(&rest[..window], self.max_tokens);
            if cut == 0 {
                // A single char over budget still has to go somewhere.
                cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            if let Some(clean) = find_break(&rest[..cut]) {
                cut = clean;
            }

            let piece = &rest[..cut];
            self.emit(chunks, piece);

            let overlap_start = self.tokenizer.suffix_within(piece, self.overlap_tokens);
            let overlap_start = snap_to_word_start(piece, overlap_start);
            let advance = if overlap_start == 0 { cut } else { overlap_start };
            rest = &rest[advance..];
        }
        rest
    }

    /// Byte length of a prefix of `text` that is over budget, or `None` when
    /// all of `text` fits. The prefix starts at a size proportional to
    /// `max_tokens` and doubles, so cutting a long sentence stays linear.
    fn over_budget_prefix(&self, text: &str) -> Option<usize> {
        let mut len = self.max_tokens.saturating_mul(WINDOW_BYTES_PER_TOKEN);
        loop {
            if len >= text.len() {
                return (self.tokenizer.count(text) > self.max_tokens).then_some(text.len());
            }
            let end = floor_char_boundary(text, len);
            if self.tokenizer.count(&text[..end]) > self.max_tokens {
                return Some(end);
            }
            len = len.saturating_mul(2);
        }
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    (0..=index.min(text.len()))
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

fn is_break_char(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_punctuation()
        || matches!(c, '。' | '，' | '、' | '；' | '：' | '？' | '！' | '）' | '」' | '』')
}

/// Byte offset just past the last break char within the final
/// [`BREAK_SEARCH_WINDOW`] chars of `prefix`, if any.
fn find_break(prefix: &str) -> Option<usize> {
    prefix
        .char_indices()
        .rev()
        .take(BREAK_SEARCH_WINDOW)
        .find(|&(_, c)| is_break_char(c))
        .map(|(i, c)| i + c.len_utf8())
}

/// Moves an overlap start forward to the next word start, when one exists
/// within the window and before the end of the piece.
fn snap_to_word_start(piece: &str, start: usize) -> usize {
    if start == 0 || start >= piece.len() {
        return start;
    }
    let previous_is_break = piece[..start].chars().next_back().is_some_and(is_break_char);
    if previous_is_break {
        return start;
    }
    piece[start..]
        .char_indices()
        .take(BREAK_SEARCH_WINDOW)
        .find(|&(_, c)| is_break_char(c))
        .map(|(i, c)| start + i + c.len_utf8())
        .filter(|&snapped| snapped < piece.len())
        .unwrap_or(start)
}

/// Chunks `text` with the default `cl100k_base` tokenizer.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> anyhow::Result<Vec<String>> {
    Ok(TextChunker::new(max_tokens, overlap_tokens)?.chunk_strings(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts whitespace-separated words; easy to reason about in assertions.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn word_chunker(max: usize, overlap: usize) -> TextChunker {
        TextChunker::with_tokenizer(Arc::new(WordTokenizer), max, overlap)
    }

    #[test]
    fn test_split_sentences_keeps_terminators() {
        let text = "Hello there. How are you?\n今日は晴れ。元気！ok";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec!["Hello there.", " How are you?", "\n", "今日は晴れ。", "元気！", "ok"]
        );
        assert_eq!(sentences.concat(), text);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = word_chunker(10, 2);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("  \n\n ").is_empty());
    }

    #[test]
    fn test_short_text_is_single_trimmed_chunk() {
        let chunker = word_chunker(10, 2);
        let chunks = chunker.chunk("  one two. three four!  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "one two. three four!");
        assert_eq!(chunks[0].tokens, 4);
        assert_eq!(chunks[0].hash, chunk_hash("one two. three four!"));
    }

    #[test]
    fn test_chunks_respect_budget_and_carry_overlap() {
        let chunker = word_chunker(6, 2);
        let text = "a b c. d e. f g h. i j. k l m.";
        let chunks = chunker.chunk(text);

        for chunk in &chunks {
            assert!(chunk.tokens <= 6, "chunk over budget: {:?}", chunk);
        }
        assert_eq!(chunks[0].text, "a b c. d e.");
        // Second chunk starts with the two-word sentence that closed the first.
        assert!(chunks[1].text.starts_with("d e."), "{:?}", chunks[1]);
        assert!(chunks.last().unwrap().text.ends_with("k l m."));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i);
        }
    }

    #[test]
    fn test_zero_overlap_produces_disjoint_chunks() {
        let chunker = word_chunker(4, 0);
        let chunks = chunker.chunk_strings("a b c d. e f g h. i j.");
        assert_eq!(chunks, vec!["a b c d.", "e f g h.", "i j."]);
    }

    #[test]
    fn test_oversized_sentence_is_force_split_on_word_breaks() {
        let chunker = word_chunker(4, 1);
        let words: Vec<String> = (0..15).map(|i| format!("w{i}")).collect();
        let sentence = words.join(" ");
        let chunks = chunker.chunk(&sentence);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.tokens <= 4, "chunk over budget: {:?}", chunk);
            for word in chunk.text.split_whitespace() {
                assert!(words.iter().any(|w| w == word), "severed word {word}");
            }
        }
        assert!(chunks[0].text.starts_with("w0"));
        assert!(chunks.last().unwrap().text.ends_with("w14"));
    }

    #[test]
    fn test_unstructured_text_terminates() {
        struct CharTokenizer;
        impl Tokenizer for CharTokenizer {
            fn count(&self, text: &str) -> usize {
                text.chars().count()
            }
        }
        let chunker = TextChunker::with_tokenizer(Arc::new(CharTokenizer), 7, 3);
        let text = "x".repeat(100);
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.tokens <= 7));
        let covered: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert!(covered >= 100);
    }

    #[test]
    fn test_force_split_work_grows_linearly() {
        /// Word counter that tallies how many bytes it was asked to count.
        struct MeteredTokenizer(std::sync::atomic::AtomicUsize);

        impl Tokenizer for MeteredTokenizer {
            fn count(&self, text: &str) -> usize {
                self.0
                    .fetch_add(text.len(), std::sync::atomic::Ordering::Relaxed);
                text.split_whitespace().count()
            }
        }

        let metered = |words: usize| {
            let tokenizer = Arc::new(MeteredTokenizer(Default::default()));
            let chunker = TextChunker::with_tokenizer(tokenizer.clone(), 10, 2);
            let text = "word ".repeat(words);
            let chunks = chunker.chunk(&text);
            assert!(chunks.iter().all(|c| c.tokens <= 10));
            let counted = tokenizer.0.load(std::sync::atomic::Ordering::Relaxed);
            (counted, text.len())
        };

        // Scanning the whole remainder on every cut would count hundreds of
        // times the input here.
        for words in [2_000, 20_000] {
            let (counted, len) = metered(words);
            assert!(counted < len * 100, "{words} words: counted {counted} bytes of {len}");
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let chunker = word_chunker(8, 3);
        let text = "Alpha beta gamma. Delta epsilon!\nZeta eta theta iota kappa lambda mu nu xi omicron pi rho.\n終わり。";
        let first = chunker.chunk(text);
        let second = chunker.chunk(text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_appending_sentence_keeps_existing_chunk_hashes() {
        let chunker = word_chunker(4, 0);
        let before = chunker.chunk("a b c d. e f g h.");
        let after = chunker.chunk("a b c d. e f g h. i j.");
        assert_eq!(&after[..2], &before[..]);
        assert_eq!(after.len(), 3);
    }

    #[test]
    fn test_overlap_is_capped_below_budget() {
        let chunker = word_chunker(3, 10);
        assert_eq!(chunker.overlap_tokens(), 2);
        let chunks = chunker.chunk("a b c. d e f. g h i.");
        assert!(chunks.iter().all(|c| c.tokens <= 3));
    }

    #[test]
    fn test_cl100k_chunker_handles_mixed_scripts() {
        let chunker = TextChunker::new(DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_TOKENS).unwrap();
        let text = "これはテストです。This is a test. ".repeat(200);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.tokens <= DEFAULT_MAX_TOKENS));
        assert_eq!(chunks, chunker.chunk(&text));
    }
}
