use crate::error::Result;
use crate::models::IndexRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Query-time filters shared by all three retrieval sources.
#[derive(Debug, Clone, Default)]
pub struct SourceFilters {
  pub channel_id: Option<String>,
  pub min_published_at: Option<DateTime<Utc>>,
  pub max_published_at: Option<DateTime<Utc>>,
}

impl SourceFilters {
  fn matches(&self, channel_id: &str, published_at: DateTime<Utc>) -> bool {
    if let Some(want) = &self.channel_id {
      if want != channel_id {
        return false;
      }
    }
    if let Some(min) = self.min_published_at {
      if published_at < min {
        return false;
      }
    }
    if let Some(max) = self.max_published_at {
      if published_at > max {
        return false;
      }
    }
    true
  }
}

/// One hit as returned by a single retrieval source, before fusion.
#[derive(Debug, Clone)]
pub struct SourceHit {
  pub chunk_id: String,
  pub video_id: String,
  pub channel_id: String,
  pub published_at: DateTime<Utc>,
  pub score: f64,
  pub text_or_preview: String,
}

pub(crate) fn term_overlap_score(query: &str, text: &str) -> f64 {
  let query_terms: Vec<String> = query
    .split_whitespace()
    .map(|t| t.to_lowercase())
    .collect();
  if query_terms.is_empty() {
    return 0.0;
  }
  let lowered = text.to_lowercase();
  let hits = query_terms.iter().filter(|t| lowered.contains(t.as_str())).count();
  hits as f64 / query_terms.len() as f64
}

/// Semantic (vector) sink port. Embedding computation is delegated to the
/// sink implementation; the worker only records the embedding model
/// identifier/version alongside each chunk.
#[async_trait]
pub trait SemanticSink: Send + Sync {
  async fn upsert(&self, record: &IndexRecord, text: &str, embedding_model: &str) -> Result<()>;
  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>>;
  async fn query(&self, query: &str, filters: &SourceFilters, limit: usize) -> Result<Vec<SourceHit>>;
}

/// Keyword/full-text sink port. `ensure_index()` is idempotent.
#[async_trait]
pub trait KeywordSink: Send + Sync {
  async fn ensure_index(&self) -> Result<()>;
  async fn upsert(&self, record: &IndexRecord, text: &str) -> Result<()>;
  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>>;
  async fn query(&self, query: &str, filters: &SourceFilters, limit: usize) -> Result<Vec<SourceHit>>;
}

/// Structured/analytics sink port. Stores a preview only, never full text.
#[async_trait]
pub trait StructuredSink: Send + Sync {
  async fn upsert(&self, record: &IndexRecord, title: &str) -> Result<()>;
  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>>;
  async fn query(&self, query: &str, filters: &SourceFilters, limit: usize) -> Result<Vec<SourceHit>>;
}

#[derive(Default)]
pub struct InMemorySemanticSink {
  rows: DashMap<String, (IndexRecord, String, String)>,
}

#[async_trait]
impl SemanticSink for InMemorySemanticSink {
  async fn upsert(&self, record: &IndexRecord, text: &str, embedding_model: &str) -> Result<()> {
    self.rows.insert(
      record.chunk_id.clone(),
      (record.clone(), text.to_string(), embedding_model.to_string()),
    );
    Ok(())
  }

  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
    Ok(
      self
        .rows
        .iter()
        .filter(|e| e.value().0.video_id == video_id)
        .map(|e| e.key().clone())
        .collect(),
    )
  }

  async fn query(&self, query: &str, filters: &SourceFilters, limit: usize) -> Result<Vec<SourceHit>> {
    let mut hits: Vec<SourceHit> = self
      .rows
      .iter()
      .filter(|e| filters.matches(&e.value().0.channel_id, e.value().0.published_at))
      .map(|e| {
        let (record, text, _model) = e.value();
        SourceHit {
          chunk_id: record.chunk_id.clone(),
          video_id: record.video_id.clone(),
          channel_id: record.channel_id.clone(),
          published_at: record.published_at,
          score: term_overlap_score(query, text),
          text_or_preview: text.clone(),
        }
      })
      .filter(|h| h.score > 0.0)
      .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }
}

#[derive(Default)]
pub struct InMemoryKeywordSink {
  initialized: std::sync::atomic::AtomicBool,
  rows: DashMap<String, (IndexRecord, String)>,
}

#[async_trait]
impl KeywordSink for InMemoryKeywordSink {
  async fn ensure_index(&self) -> Result<()> {
    self.initialized.store(true, std::sync::atomic::Ordering::SeqCst);
    Ok(())
  }

  async fn upsert(&self, record: &IndexRecord, text: &str) -> Result<()> {
    self.rows.insert(record.chunk_id.clone(), (record.clone(), text.to_string()));
    Ok(())
  }

  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
    Ok(
      self
        .rows
        .iter()
        .filter(|e| e.value().0.video_id == video_id)
        .map(|e| e.key().clone())
        .collect(),
    )
  }

  async fn query(&self, query: &str, filters: &SourceFilters, limit: usize) -> Result<Vec<SourceHit>> {
    let mut hits: Vec<SourceHit> = self
      .rows
      .iter()
      .filter(|e| filters.matches(&e.value().0.channel_id, e.value().0.published_at))
      .map(|e| {
        let (record, text) = e.value();
        SourceHit {
          chunk_id: record.chunk_id.clone(),
          video_id: record.video_id.clone(),
          channel_id: record.channel_id.clone(),
          published_at: record.published_at,
          score: term_overlap_score(query, text),
          text_or_preview: text.clone(),
        }
      })
      .filter(|h| h.score > 0.0)
      .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }
}

#[derive(Default)]
pub struct InMemoryStructuredSink {
  rows: DashMap<String, (IndexRecord, String)>,
}

#[async_trait]
impl StructuredSink for InMemoryStructuredSink {
  async fn upsert(&self, record: &IndexRecord, title: &str) -> Result<()> {
    self
      .rows
      .insert(record.chunk_id.clone(), (record.clone(), title.to_string()));
    Ok(())
  }

  async fn existing_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
    Ok(
      self
        .rows
        .iter()
        .filter(|e| e.value().0.video_id == video_id)
        .map(|e| e.key().clone())
        .collect(),
    )
  }

  async fn query(&self, query: &str, filters: &SourceFilters, limit: usize) -> Result<Vec<SourceHit>> {
    let mut hits: Vec<SourceHit> = self
      .rows
      .iter()
      .filter(|e| filters.matches(&e.value().0.channel_id, e.value().0.published_at))
      .map(|e| {
        let (record, title) = e.value();
        let combined = format!("{title} {}", record.text_preview);
        SourceHit {
          chunk_id: record.chunk_id.clone(),
          video_id: record.video_id.clone(),
          channel_id: record.channel_id.clone(),
          published_at: record.published_at,
          score: term_overlap_score(query, &combined),
          text_or_preview: record.text_preview.clone(),
        }
      })
      .filter(|h| h.score > 0.0)
      .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(chunk_id: &str) -> IndexRecord {
    IndexRecord {
      video_id: "v1".to_string(),
      chunk_id: chunk_id.to_string(),
      token_count: 10,
      content_sha256: "abc".to_string(),
      text_preview: "preview about rust concurrency".to_string(),
      channel_id: "chan1".to_string(),
      published_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn semantic_sink_tracks_existing_chunks() {
    let sink = InMemorySemanticSink::default();
    sink
      .upsert(&record("v1_chunk_1"), "rust concurrency patterns", "text-embedding-3-small")
      .await
      .unwrap();
    let ids = sink.existing_chunk_ids("v1").await.unwrap();
    assert_eq!(ids, vec!["v1_chunk_1"]);
  }

  #[tokio::test]
  async fn semantic_sink_queries_by_term_overlap() {
    let sink = InMemorySemanticSink::default();
    sink
      .upsert(&record("v1_chunk_1"), "rust concurrency patterns", "text-embedding-3-small")
      .await
      .unwrap();
    let hits = sink.query("concurrency", &SourceFilters::default(), 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "v1_chunk_1");
  }

  #[tokio::test]
  async fn keyword_sink_ensure_index_is_idempotent() {
    let sink = InMemoryKeywordSink::default();
    sink.ensure_index().await.unwrap();
    sink.ensure_index().await.unwrap();
  }

  #[tokio::test]
  async fn keyword_sink_respects_channel_filter() {
    let sink = InMemoryKeywordSink::default();
    sink.upsert(&record("v1_chunk_1"), "rust concurrency patterns").await.unwrap();
    let filters = SourceFilters {
      channel_id: Some("other-channel".to_string()),
      ..Default::default()
    };
    let hits = sink.query("rust", &filters, 10).await.unwrap();
    assert!(hits.is_empty());
  }

  #[tokio::test]
  async fn structured_sink_stores_preview_only_via_record() {
    let sink = InMemoryStructuredSink::default();
    sink.upsert(&record("v1_chunk_1"), "My Video").await.unwrap();
    let ids = sink.existing_chunk_ids("v1").await.unwrap();
    assert_eq!(ids.len(), 1);
    let hits = sink.query("My Video", &SourceFilters::default(), 10).await.unwrap();
    assert_eq!(hits.len(), 1);
  }
}
