use super::{RetrievalFilters, SourceTag};
use crate::providers::sinks::{KeywordSink, SemanticSink, SourceFilters, SourceHit, StructuredSink};
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone)]
pub struct FanoutError {
  pub source: SourceTag,
  pub message: String,
}

/// Bundles the three retrieval sources for one call. Any source may be
/// absent (e.g. not configured for this deployment), in which case it is
/// simply unavailable and dropped by the router.
pub struct RetrievalSources<'a> {
  pub semantic: Option<&'a dyn SemanticSink>,
  pub keyword: Option<&'a dyn KeywordSink>,
  pub structured: Option<&'a dyn StructuredSink>,
}

impl<'a> RetrievalSources<'a> {
  pub fn availability(&self) -> BTreeSet<SourceTag> {
    let mut set = BTreeSet::new();
    if self.semantic.is_some() {
      set.insert(SourceTag::Semantic);
    }
    if self.keyword.is_some() {
      set.insert(SourceTag::Keyword);
    }
    if self.structured.is_some() {
      set.insert(SourceTag::Structured);
    }
    set
  }
}

/// Fans out in parallel to every selected, available source under an
/// independent per-source timeout. A source erroring or timing out is
/// dropped from fusion and recorded in `errors`.
pub async fn fan_out(
  selected: &[SourceTag],
  query: &str,
  filters: &RetrievalFilters,
  top_k: usize,
  sources: &RetrievalSources<'_>,
  per_source_timeout_ms: u64,
) -> (Vec<(SourceTag, Vec<SourceHit>)>, BTreeMap<String, String>) {
  let source_filters: SourceFilters = filters.into();
  let deadline = Duration::from_millis(per_source_timeout_ms);

  let mut futs: Vec<_> = Vec::new();
  for tag in selected {
    match tag {
      SourceTag::Semantic => {
        if let Some(semantic) = sources.semantic {
          let source_filters = &source_filters;
          futs.push(Box::pin(async move {
            let result = timeout(deadline, semantic.query(query, source_filters, top_k)).await;
            (SourceTag::Semantic, result)
          })
            as std::pin::Pin<Box<dyn std::future::Future<Output = _> + Send + '_>>);
        }
      }
      SourceTag::Keyword => {
        if let Some(keyword) = sources.keyword {
          let source_filters = &source_filters;
          futs.push(Box::pin(async move {
            let result = timeout(deadline, keyword.query(query, source_filters, top_k)).await;
            (SourceTag::Keyword, result)
          }));
        }
      }
      SourceTag::Structured => {
        if let Some(structured) = sources.structured {
          let source_filters = &source_filters;
          futs.push(Box::pin(async move {
            let result = timeout(deadline, structured.query(query, source_filters, top_k)).await;
            (SourceTag::Structured, result)
          }));
        }
      }
    }
  }

  let results = futures::future::join_all(futs).await;

  let mut hits = Vec::new();
  let mut errors = BTreeMap::new();
  for (tag, result) in results {
    match result {
      Ok(Ok(source_hits)) => hits.push((tag, source_hits)),
      Ok(Err(e)) => {
        errors.insert(tag.as_str().to_string(), e.to_string());
      }
      Err(_) => {
        errors.insert(tag.as_str().to_string(), "timed out".to_string());
      }
    }
  }

  (hits, errors)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::sinks::{InMemoryKeywordSink, InMemorySemanticSink, InMemoryStructuredSink};
  use crate::models::IndexRecord;
  use chrono::Utc;

  fn record(chunk_id: &str) -> IndexRecord {
    IndexRecord {
      video_id: "v1".to_string(),
      chunk_id: chunk_id.to_string(),
      token_count: 10,
      content_sha256: "abc".to_string(),
      text_preview: "rust concurrency patterns".to_string(),
      channel_id: "chan1".to_string(),
      published_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn fans_out_to_all_selected_available_sources() {
    let semantic = InMemorySemanticSink::default();
    semantic.upsert(&record("c1"), "rust concurrency", "model").await.unwrap();
    let keyword = InMemoryKeywordSink::default();
    keyword.upsert(&record("c1"), "rust concurrency").await.unwrap();

    let sources = RetrievalSources {
      semantic: Some(&semantic),
      keyword: Some(&keyword),
      structured: None,
    };

    let (hits, errors) = fan_out(
      &[SourceTag::Semantic, SourceTag::Keyword, SourceTag::Structured],
      "rust",
      &RetrievalFilters::default(),
      10,
      &sources,
      1500,
    )
    .await;

    assert_eq!(hits.len(), 2);
    assert!(errors.is_empty());
  }

  struct FailingSemantic;

  #[async_trait::async_trait]
  impl SemanticSink for FailingSemantic {
    async fn upsert(&self, _record: &IndexRecord, _text: &str, _embedding_model: &str) -> crate::error::Result<()> {
      Ok(())
    }
    async fn existing_chunk_ids(&self, _video_id: &str) -> crate::error::Result<Vec<String>> {
      Ok(vec![])
    }
    async fn query(&self, _query: &str, _filters: &SourceFilters, _limit: usize) -> crate::error::Result<Vec<SourceHit>> {
      Err(crate::error::PipelineError::transient("semantic source down"))
    }
  }

  #[tokio::test]
  async fn failing_source_is_dropped_and_recorded_as_error() {
    let semantic = FailingSemantic;
    let structured = InMemoryStructuredSink::default();
    structured.upsert(&record("c1"), "My Video").await.unwrap();

    let sources = RetrievalSources {
      semantic: Some(&semantic),
      keyword: None,
      structured: Some(&structured),
    };

    let (hits, errors) = fan_out(
      &[SourceTag::Semantic, SourceTag::Structured],
      "rust",
      &RetrievalFilters::default(),
      10,
      &sources,
      1500,
    )
    .await;

    assert_eq!(hits.len(), 1);
    assert!(errors.contains_key("semantic"));
  }
}
