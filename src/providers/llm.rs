use crate::cost::{compute_cost_usd, ModelPricingUsdPerMToken};
use crate::error::{PipelineError, Result};
use crate::providers::openai::{self, SummarizeChunkArgs};
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::CreateChatCompletionRequestArgs;
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct LlmSummaryChunk {
  pub bullets: Vec<String>,
  pub concepts: Vec<String>,
  pub prompt_tokens: u32,
  pub completion_tokens: u32,
  pub cost_usd: f64,
}

/// (d) LLM provider: summarizes one chunk of transcript text into bullets
/// and concepts.
#[async_trait]
pub trait LlmProvider: Send + Sync {
  async fn summarize_chunk(&self, model: &str, transcript_chunk: &str) -> Result<LlmSummaryChunk>;
}

#[derive(Deserialize)]
struct SummaryPayload {
  #[serde(default)]
  bullets: Vec<String>,
  #[serde(default)]
  concepts: Vec<String>,
}

pub struct OpenAiLlmProvider {
  client: Client<OpenAIConfig>,
}

impl OpenAiLlmProvider {
  pub fn new(api_key: &str) -> Self {
    OpenAiLlmProvider {
      client: openai::openai_client(api_key),
    }
  }
}

#[async_trait]
impl LlmProvider for OpenAiLlmProvider {
  async fn summarize_chunk(&self, model: &str, transcript_chunk: &str) -> Result<LlmSummaryChunk> {
    let messages = openai::build_summarize_messages(SummarizeChunkArgs {
      transcript_chunk,
    })
    .map_err(|e| PipelineError::transient(e.to_string()))?;

    let request = CreateChatCompletionRequestArgs::default()
      .model(model)
      .messages(messages)
      .temperature(0.2)
      .build()
      .map_err(|e| PipelineError::transient(e.to_string()))?;

    let response = self
      .client
      .chat()
      .create(request)
      .await
      .map_err(|e| PipelineError::transient(e.to_string()))?;

    let content = response
      .choices
      .first()
      .and_then(|c| c.message.content.clone())
      .ok_or_else(|| PipelineError::transient("empty chat completion response"))?;

    let payload: SummaryPayload = serde_json::from_str(&content)
      .map_err(|_| PipelineError::terminal("LLM response was not the expected JSON shape"))?;

    let usage = response.usage;
    let prompt_tokens = usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0);
    let completion_tokens = usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0);
    let pricing = openai::pricing_for_model(model).unwrap_or(ModelPricingUsdPerMToken {
      prompt: 0.0,
      completion: 0.0,
    });
    let cost_usd = compute_cost_usd(pricing, prompt_tokens, completion_tokens);

    Ok(LlmSummaryChunk {
      bullets: payload.bullets,
      concepts: payload.concepts,
      prompt_tokens,
      completion_tokens,
      cost_usd,
    })
  }
}

/// In-process fake returning a deterministic bullet/concept pair derived
/// from the chunk's first words, unless pre-seeded via `seed`.
pub struct FakeLlmProvider {
  seeded: Mutex<HashMap<String, LlmSummaryChunk>>,
}

impl Default for FakeLlmProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl FakeLlmProvider {
  pub fn new() -> Self {
    FakeLlmProvider {
      seeded: Mutex::new(HashMap::new()),
    }
  }

  pub fn seed(&self, transcript_chunk: &str, chunk: LlmSummaryChunk) {
    self
      .seeded
      .lock()
      .unwrap()
      .insert(transcript_chunk.to_string(), chunk);
  }
}

#[async_trait]
impl LlmProvider for FakeLlmProvider {
  async fn summarize_chunk(&self, _model: &str, transcript_chunk: &str) -> Result<LlmSummaryChunk> {
    if let Some(seeded) = self.seeded.lock().unwrap().get(transcript_chunk) {
      return Ok(seeded.clone());
    }
    let first_words: String = transcript_chunk
      .split_whitespace()
      .take(5)
      .collect::<Vec<_>>()
      .join(" ");
    Ok(LlmSummaryChunk {
      bullets: vec![format!("Discusses: {first_words}")],
      concepts: vec![first_words.to_lowercase()],
      prompt_tokens: (transcript_chunk.len() / 4) as u32,
      completion_tokens: 16,
      cost_usd: 0.0,
    })
  }
}
