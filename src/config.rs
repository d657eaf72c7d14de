use crate::error::PipelineError;
use crate::retrieval::policy::PolicyMode;

/// Typed, fully-resolved configuration. `Config::from_env()` is the only place
/// that reads environment variables for pipeline behavior; everything downstream
/// takes a `&Config` rather than calling `std::env::var` itself.
#[derive(Debug, Clone)]
pub struct Config {
  pub scheduler: SchedulerConfig,
  pub budgets: BudgetConfig,
  pub idempotency: IdempotencyConfig,
  pub retries: RetryConfig,
  pub retrieval: RetrievalConfig,
  pub routing: RoutingConfig,
  pub policy: PolicyConfig,
  pub chunking: ChunkingConfig,
  pub index: IndexConfig,
  pub database_url: Option<String>,
  pub internal_token: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  pub timezone: String,
  pub daily_limit_per_channel: u32,
}

#[derive(Debug, Clone)]
pub struct BudgetConfig {
  pub transcription_daily_usd: f64,
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
  pub max_video_duration_sec: i64,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
  pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
  pub top_k: usize,
  pub per_source_timeout_ms: u64,
  pub rrf_k: f64,
  pub fusion_mode: FusionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMode {
  ReciprocalRank,
  Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
  Adaptive,
  AlwaysOn,
  Forced,
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
  pub mode: RoutingMode,
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
  pub allowed_channels: Option<Vec<String>>,
  pub max_age_days: Option<i64>,
  pub mode: PolicyMode,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
  pub max_tokens_per_chunk: usize,
  pub overlap_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
  pub strict_all_sinks: bool,
}

fn env_string(key: &str, default: &str) -> String {
  std::env::var(key)
    .ok()
    .filter(|v| !v.trim().is_empty())
    .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
  std::env::var(key)
    .ok()
    .and_then(|v| v.trim().parse::<T>().ok())
    .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
  std::env::var(key)
    .ok()
    .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    .unwrap_or(default)
}

fn env_csv(key: &str) -> Option<Vec<String>> {
  std::env::var(key).ok().and_then(|v| {
    let items: Vec<String> = v
      .split(',')
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .collect();
    if items.is_empty() {
      None
    } else {
      Some(items)
    }
  })
}

impl Config {
  pub fn from_env() -> Result<Self, PipelineError> {
    let internal_token = std::env::var("RUST_INTERNAL_TOKEN")
      .ok()
      .filter(|v| !v.is_empty())
      .ok_or_else(|| PipelineError::Config("missing RUST_INTERNAL_TOKEN".to_string()))?;

    let routing_mode = match env_string("ROUTING_MODE", "adaptive").as_str() {
      "always_on" => RoutingMode::AlwaysOn,
      "forced" => RoutingMode::Forced,
      _ => RoutingMode::Adaptive,
    };

    let fusion_mode = match env_string("RETRIEVAL_FUSION_MODE", "rrf").as_str() {
      "weighted" => FusionMode::Weighted,
      _ => FusionMode::ReciprocalRank,
    };

    let policy_mode = match env_string("POLICY_MODE", "filter").as_str() {
      "redact" => PolicyMode::Redact,
      "audit_only" => PolicyMode::AuditOnly,
      _ => PolicyMode::Filter,
    };

    Ok(Config {
      scheduler: SchedulerConfig {
        timezone: env_string("SCHEDULER_TIMEZONE", "Europe/Amsterdam"),
        daily_limit_per_channel: env_parsed("SCHEDULER_DAILY_LIMIT_PER_CHANNEL", 10),
      },
      budgets: BudgetConfig {
        transcription_daily_usd: env_parsed("BUDGETS_TRANSCRIPTION_DAILY_USD", 5.00),
      },
      idempotency: IdempotencyConfig {
        max_video_duration_sec: env_parsed("IDEMPOTENCY_MAX_VIDEO_DURATION_SEC", 4_200),
      },
      retries: RetryConfig {
        max_attempts: env_parsed("RETRIES_MAX_ATTEMPTS", 3),
      },
      retrieval: RetrievalConfig {
        top_k: env_parsed("RETRIEVAL_TOP_K", 10),
        per_source_timeout_ms: env_parsed("RETRIEVAL_PER_SOURCE_TIMEOUT_MS", 1_500),
        rrf_k: env_parsed("RETRIEVAL_RRF_K", 60.0),
        fusion_mode,
      },
      routing: RoutingConfig { mode: routing_mode },
      policy: PolicyConfig {
        allowed_channels: env_csv("POLICY_ALLOWED_CHANNELS"),
        max_age_days: std::env::var("POLICY_MAX_AGE_DAYS")
          .ok()
          .and_then(|v| v.trim().parse::<i64>().ok()),
        mode: policy_mode,
      },
      chunking: ChunkingConfig {
        max_tokens_per_chunk: env_parsed("CHUNKING_MAX_TOKENS_PER_CHUNK", 1_000),
        overlap_tokens: env_parsed("CHUNKING_OVERLAP_TOKENS", 100),
      },
      index: IndexConfig {
        strict_all_sinks: env_bool("INDEX_STRICT_ALL_SINKS", false),
      },
      database_url: std::env::var("DATABASE_URL")
        .ok()
        .filter(|v| !v.is_empty()),
      internal_token,
    })
  }
}
