//! Trait "ports" for every external collaborator named in the external
//! interfaces: video listing, the operator spreadsheet, speech-to-text,
//! the LLM, the blob store, and the three retrieval sinks. Each port has
//! exactly one thin, real adapter plus an in-process fake used by tests
//! and available as a local/dev configuration choice.

pub mod blob_store;
pub mod llm;
pub mod openai;
pub mod sinks;
pub mod speech_to_text;
pub mod spreadsheet;
pub mod video_listing;
pub mod youtube;
pub mod youtube_api;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct VideoListing {
  pub video_id: String,
  pub title: String,
  pub published_at: DateTime<Utc>,
  pub duration_sec: i64,
  pub channel_id: String,
}

/// (a) Video listing provider: returns uploads for a channel within a
/// lookback window.
#[async_trait]
pub trait VideoListingProvider: Send + Sync {
  async fn list_recent_uploads(
    &self,
    channel_id: &str,
    since: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<VideoListing>>;
}

/// (b) Operator spreadsheet: a flat list of explicit backfill video URLs.
#[async_trait]
pub trait SpreadsheetProvider: Send + Sync {
  async fn list_backfill_urls(&self) -> Result<Vec<String>>;
}
