use clap::Parser;
use semdex_context::TextChunker;
use semdex_context::text::{DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_TOKENS};
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk a text file into JSON output using semdex-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum number of tokens per chunk.
    #[arg(short, long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    /// Tokens of trailing context repeated at the start of the next chunk.
    #[arg(short, long, default_value_t = DEFAULT_OVERLAP_TOKENS)]
    overlap_tokens: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let chunker = TextChunker::new(args.max_tokens, args.overlap_tokens)?;
    let chunks = chunker.chunk(&file_content);

    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{}", json_output);

    Ok(())
}
