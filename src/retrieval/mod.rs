//! Query-time fan-out across the three retrieval sinks: parallel dispatch
//! (`fanout`), reciprocal-rank fusion (`fusion`), intent-based source
//! selection (`router`), and post-retrieval authorization (`policy`).

pub mod fanout;
pub mod fusion;
pub mod policy;
pub mod router;

use crate::providers::sinks::SourceFilters;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub use fanout::{FanoutError, RetrievalSources};
pub use fusion::FusedChunk;
pub use policy::{AuditEntry, Policy, PolicyMode};
pub use router::{FilterStrength, Intent, RoutingDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceTag {
  Semantic,
  Keyword,
  Structured,
}

impl SourceTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceTag::Semantic => "semantic",
      SourceTag::Keyword => "keyword",
      SourceTag::Structured => "structured",
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
  pub channel_id: Option<String>,
  pub min_published_at: Option<DateTime<Utc>>,
  pub max_published_at: Option<DateTime<Utc>>,
}

impl From<&RetrievalFilters> for SourceFilters {
  fn from(f: &RetrievalFilters) -> Self {
    SourceFilters {
      channel_id: f.channel_id.clone(),
      min_published_at: f.min_published_at,
      max_published_at: f.max_published_at,
    }
  }
}

pub const DEFAULT_TOP_K: usize = 10;
pub const MAX_TOP_K: usize = 100;

#[derive(Debug, Clone)]
pub struct RetrievalResult {
  pub chunks: Vec<FusedChunk>,
  pub errors: BTreeMap<String, String>,
  pub routing: RoutingDecision,
  pub no_sources_available: bool,
}

/// Top-level entry point wiring C8 (route) -> C7 (fan out + fuse) for a
/// single query. Policy enforcement (C9) is a separate, explicit step the
/// caller applies to the returned chunks.
pub async fn retrieve(
  query: &str,
  filters: &RetrievalFilters,
  top_k: usize,
  sources: &RetrievalSources<'_>,
  routing_mode: crate::config::RoutingMode,
  forced_sources: Option<&[SourceTag]>,
  per_source_timeout_ms: u64,
  rrf_k: f64,
) -> RetrievalResult {
  let top_k = top_k.clamp(1, MAX_TOP_K);
  let availability = sources.availability();
  let routing = router::route(query, filters, &availability, routing_mode, forced_sources);

  let (hits, errors) = fanout::fan_out(
    &routing.selected_sources,
    query,
    filters,
    top_k,
    sources,
    per_source_timeout_ms,
  )
  .await;

  let no_sources_available = hits.is_empty();
  let fused = fusion::fuse(hits, rrf_k, top_k);

  RetrievalResult {
    chunks: fused,
    errors,
    routing,
    no_sources_available,
  }
}
