use super::{RetrievalFilters, SourceTag};
use crate::config::RoutingMode;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
  Conceptual,
  Factual,
  Mixed,
  Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrength {
  Strong,
  Moderate,
  None,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
  pub selected_sources: Vec<SourceTag>,
  pub strategy: &'static str,
  pub rationale: String,
}

const CONCEPTUAL_SIGNALS: [&str; 5] = ["how", "why", "explain", "concept", "framework"];
const FACTUAL_SIGNALS: [&str; 4] = ["when", "who", "where", "which"];

fn looks_like_number_or_date(word: &str) -> bool {
  word.chars().any(|c| c.is_ascii_digit())
}

pub fn detect_intent(query: &str) -> Intent {
  let lowered = query.to_lowercase();
  let words: Vec<&str> = lowered.split_whitespace().collect();

  let conceptual = CONCEPTUAL_SIGNALS.iter().any(|s| lowered.contains(s));
  let factual = FACTUAL_SIGNALS.iter().any(|s| lowered.contains(s))
    || words.iter().any(|w| looks_like_number_or_date(w));

  match (conceptual, factual) {
    (true, true) => Intent::Mixed,
    (true, false) => Intent::Conceptual,
    (false, true) => Intent::Factual,
    (false, false) => Intent::Unknown,
  }
}

pub fn filter_strength(filters: &RetrievalFilters) -> FilterStrength {
  let has_channel = filters.channel_id.is_some();
  let has_date_range = filters.min_published_at.is_some() || filters.max_published_at.is_some();
  match (has_channel, has_date_range) {
    (true, true) => FilterStrength::Strong,
    (true, false) | (false, true) => FilterStrength::Moderate,
    (false, false) => FilterStrength::None,
  }
}

const ALL_SOURCES: [SourceTag; 3] = [SourceTag::Semantic, SourceTag::Keyword, SourceTag::Structured];

/// Implements §4.8's routing table, first-match-wins, then drops any
/// source the availability map marks unavailable.
pub fn route(
  query: &str,
  filters: &RetrievalFilters,
  availability: &BTreeSet<SourceTag>,
  mode: RoutingMode,
  forced_sources: Option<&[SourceTag]>,
) -> RoutingDecision {
  let intent = detect_intent(query);
  let strength = filter_strength(filters);

  let (mut selected, strategy): (Vec<SourceTag>, &'static str) = match mode {
    RoutingMode::AlwaysOn => (ALL_SOURCES.to_vec(), "always_on"),
    RoutingMode::Forced => (
      forced_sources.map(|s| s.to_vec()).unwrap_or_else(|| ALL_SOURCES.to_vec()),
      "forced",
    ),
    RoutingMode::Adaptive => match (strength, intent) {
      (FilterStrength::Strong, _) => (vec![SourceTag::Keyword, SourceTag::Structured], "filter_optimized"),
      (FilterStrength::None, Intent::Conceptual) => (vec![SourceTag::Semantic, SourceTag::Keyword], "semantic_optimized"),
      (FilterStrength::Moderate, Intent::Factual) => (vec![SourceTag::Keyword, SourceTag::Structured], "keyword_optimized"),
      (_, Intent::Mixed) => (ALL_SOURCES.to_vec(), "comprehensive"),
      _ => (ALL_SOURCES.to_vec(), "fallback"),
    },
  };

  let dropped: Vec<SourceTag> = selected.iter().copied().filter(|s| !availability.contains(s)).collect();
  selected.retain(|s| availability.contains(s));

  let rationale = if dropped.is_empty() {
    format!(
      "intent={:?} filter_strength={:?} strategy={strategy}",
      intent, strength
    )
  } else {
    format!(
      "intent={:?} filter_strength={:?} strategy={strategy} dropped_unavailable={:?}",
      intent, strength, dropped
    )
  };

  RoutingDecision {
    selected_sources: selected,
    strategy,
    rationale,
  }
}
