use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;

/// One windowed chunk of transcript text, 1-indexed within its video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
  pub index: u32,
  pub text: String,
  pub token_count: usize,
}

/// Token-aware windower: `max_tokens_per_chunk` target size with
/// `overlap_tokens` retained between consecutive chunks, using a stable
/// tokenizer (`cl100k_base`, the same encoding `tiktoken-rs` ships for
/// OpenAI chat models).
pub fn window_by_tokens(text: &str, max_tokens_per_chunk: usize, overlap_tokens: usize) -> Vec<Chunk> {
  if text.trim().is_empty() {
    return Vec::new();
  }
  let bpe = tiktoken_rs::cl100k_base().expect("cl100k_base encoding must be available");
  let tokens = bpe.encode_with_special_tokens(text);
  if tokens.is_empty() {
    return Vec::new();
  }

  let step = max_tokens_per_chunk.saturating_sub(overlap_tokens).max(1);
  let mut chunks = Vec::new();
  let mut start = 0usize;
  let mut index = 1u32;

  while start < tokens.len() {
    let end = (start + max_tokens_per_chunk).min(tokens.len());
    let window = &tokens[start..end];
    let chunk_text = decode_tokens(&bpe, window);
    chunks.push(Chunk {
      index,
      text: chunk_text,
      token_count: window.len(),
    });
    index += 1;
    if end == tokens.len() {
      break;
    }
    start += step;
  }

  chunks
}

fn decode_tokens(bpe: &CoreBPE, tokens: &[u32]) -> String {
  bpe
    .decode(tokens.to_vec())
    .unwrap_or_else(|_| String::new())
}

/// `<video_id>_chunk_<n>`, 1-indexed contiguous, per §3's Index Record
/// invariant.
pub fn chunk_id(video_id: &str, index: u32) -> String {
  format!("{video_id}_chunk_{index}")
}

/// Full lowercase-hex sha256 over the chunk text, used for idempotent
/// sink writes and cross-sink consistency checks.
pub fn content_sha256(text: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(text.as_bytes());
  hex::encode(hasher.finalize())
}
