use crate::cost::ModelPricingUsdPerMToken;
use crate::error::PipelineError;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
  ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
  ChatCompletionRequestUserMessageContent,
};
use async_openai::Client;

pub fn pricing_for_model(model: &str) -> Option<ModelPricingUsdPerMToken> {
  // Allow overriding pricing without code changes (USD per 1M tokens).
  if let (Ok(prompt), Ok(completion)) = (
    std::env::var("OPENAI_PRICE_PROMPT_USD_PER_M_TOKEN"),
    std::env::var("OPENAI_PRICE_COMPLETION_USD_PER_M_TOKEN"),
  ) {
    if let (Ok(prompt), Ok(completion)) = (prompt.parse::<f64>(), completion.parse::<f64>()) {
      return Some(ModelPricingUsdPerMToken { prompt, completion });
    }
  }

  match model {
    // Reference values; keep override support above for quick adjustments.
    "gpt-4o-mini" => Some(ModelPricingUsdPerMToken {
      prompt: 0.15,
      completion: 0.60,
    }),
    "gpt-4o" => Some(ModelPricingUsdPerMToken {
      prompt: 5.0,
      completion: 15.0,
    }),
    _ => None,
  }
}

pub struct SummarizeChunkArgs<'a> {
  pub transcript_chunk: &'a str,
}

pub fn build_summarize_messages(
  args: SummarizeChunkArgs<'_>,
) -> Result<Vec<ChatCompletionRequestMessage>, PipelineError> {
  let system = r#"You summarize a chunk of a video transcript.
Return STRICT JSON only (no markdown, no commentary) with:
{"bullets":["..."],"concepts":["..."]}.
Bullets are concise, factual, and ordered as they occur. Concepts are short noun phrases."#;

  let user = format!("Transcript chunk:\n\n{}", args.transcript_chunk);

  let system_msg = ChatCompletionRequestSystemMessageArgs::default()
    .content(ChatCompletionRequestSystemMessageContent::Text(
      system.to_string(),
    ))
    .build()
    .map_err(|e| PipelineError::transient(e.to_string()))?;

  let user_msg = ChatCompletionRequestUserMessageArgs::default()
    .content(ChatCompletionRequestUserMessageContent::Text(user))
    .build()
    .map_err(|e| PipelineError::transient(e.to_string()))?;

  Ok(vec![
    ChatCompletionRequestMessage::System(system_msg),
    ChatCompletionRequestMessage::User(user_msg),
  ])
}

pub fn openai_client(api_key: &str) -> Client<OpenAIConfig> {
  let config = OpenAIConfig::new().with_api_key(api_key);
  Client::with_config(config)
}

pub fn openai_client_with_idempotency(
  api_key: &str,
  idempotency_key: &str,
) -> Result<Client<OpenAIConfig>, PipelineError> {
  let config = OpenAIConfig::new()
    .with_api_key(api_key)
    .with_header("Idempotency-Key", idempotency_key)
    .map_err(|e| PipelineError::transient(e.to_string()))?;
  Ok(Client::with_config(config))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pricing_for_gpt_4o_mini_is_available() {
    let pricing = pricing_for_model("gpt-4o-mini").expect("expected pricing");
    assert!(pricing.prompt > 0.0);
    assert!(pricing.completion > 0.0);
  }

  #[test]
  fn unknown_model_has_no_pricing() {
    assert!(pricing_for_model("not-a-real-model").is_none());
  }

  #[test]
  fn summarize_messages_include_system_and_user() {
    let messages = build_summarize_messages(SummarizeChunkArgs {
      transcript_chunk: "hello world",
    })
    .unwrap();
    assert_eq!(messages.len(), 2);
  }
}
