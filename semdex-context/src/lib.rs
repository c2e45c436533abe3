pub mod text;
pub mod tokenizer;

// Re-export the chunking entry points for external use
pub use text::{Chunk, TextChunker, chunk_hash, chunk_text, split_sentences};
pub use tokenizer::{Cl100kTokenizer, Tokenizer};
