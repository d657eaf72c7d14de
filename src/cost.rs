#[derive(Clone, Copy, Debug)]
pub struct ModelPricingUsdPerMToken {
  pub prompt: f64,
  pub completion: f64,
}

pub fn compute_cost_usd(
  pricing: ModelPricingUsdPerMToken,
  prompt_tokens: u32,
  completion_tokens: u32,
) -> f64 {
  let prompt_cost = (prompt_tokens as f64 / 1_000_000.0) * pricing.prompt;
  let completion_cost = (completion_tokens as f64 / 1_000_000.0) * pricing.completion;
  prompt_cost + completion_cost
}

/// Default AssemblyAI-style per-hour transcription rate, used when the
/// speech-to-text provider doesn't return its own cost figure.
pub const DEFAULT_TRANSCRIPTION_RATE_USD_PER_HOUR: f64 = 0.65;

/// Transcription cost scales with audio duration rather than tokens.
pub fn compute_transcription_cost_usd(duration_sec: i64, rate_usd_per_hour: f64) -> f64 {
  (duration_sec.max(0) as f64 / 3600.0) * rate_usd_per_hour
}
