use super::{WorkerOutcome, WorkerStatus};
use crate::error::Result;
use crate::metadata_store::MetadataStore;
use crate::models::{Video, VideoSource, VideoStatus};
use crate::providers::{SpreadsheetProvider, VideoListingProvider};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct ScrapeOutputs {
  pub videos_discovered: u32,
  pub videos_skipped_duration: u32,
  pub errors: Vec<String>,
}

pub struct ScrapeInput<'a> {
  pub channel_id: &'a str,
  pub since: DateTime<Utc>,
  pub limit: usize,
  pub max_video_duration_sec: i64,
}

/// Resolves a channel's recent uploads and the operator spreadsheet's
/// explicit backfill links, normalizes each into a `Video`, and upserts
/// via the metadata store. One source erroring while the other succeeds
/// yields `Partial`, the default per §4.6.
pub async fn execute(
  input: ScrapeInput<'_>,
  store: &dyn MetadataStore,
  listing: &dyn VideoListingProvider,
  spreadsheet: &dyn SpreadsheetProvider,
) -> Result<WorkerOutcome<ScrapeOutputs>> {
  let mut outputs = ScrapeOutputs::default();
  let mut any_source_failed = false;

  match listing
    .list_recent_uploads(input.channel_id, input.since, input.limit)
    .await
  {
    Ok(listings) => {
      for listing in listings {
        if listing.duration_sec > input.max_video_duration_sec {
          outputs.videos_skipped_duration += 1;
          continue;
        }
        let now = Utc::now();
        let video = Video {
          video_id: listing.video_id.clone(),
          channel_id: listing.channel_id.clone(),
          title: listing.title,
          published_at: listing.published_at,
          duration_sec: listing.duration_sec,
          source: VideoSource::ChannelScrape,
          status: VideoStatus::Discovered,
          retry_count: 0,
          created_at: now,
          updated_at: now,
        };
        store.upsert_video(video).await?;
        outputs.videos_discovered += 1;
      }
    }
    Err(e) => {
      any_source_failed = true;
      outputs.errors.push(format!("video_listing: {e}"));
    }
  }

  match spreadsheet.list_backfill_urls().await {
    Ok(urls) => {
      for url in urls {
        let Some(video_id) = extract_video_id(&url) else {
          continue;
        };
        let now = Utc::now();
        let video = Video {
          video_id: video_id.clone(),
          channel_id: input.channel_id.to_string(),
          title: String::new(),
          published_at: now,
          duration_sec: 0,
          source: VideoSource::SheetBackfill,
          status: VideoStatus::Discovered,
          retry_count: 0,
          created_at: now,
          updated_at: now,
        };
        store.upsert_video(video).await?;
        outputs.videos_discovered += 1;
      }
    }
    Err(e) => {
      any_source_failed = true;
      outputs.errors.push(format!("spreadsheet: {e}"));
    }
  }

  let status = if any_source_failed {
    if outputs.videos_discovered > 0 {
      WorkerStatus::Partial
    } else {
      WorkerStatus::Failed
    }
  } else {
    WorkerStatus::Success
  };

  Ok(WorkerOutcome {
    status,
    outputs,
    cost_usd: 0.0,
    retry_hint: None,
  })
}

fn extract_video_id(url: &str) -> Option<String> {
  url
    .split("v=")
    .nth(1)
    .map(|s| s.split('&').next().unwrap_or(s).to_string())
    .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metadata_store::InMemoryMetadataStore;
  use crate::providers::spreadsheet::FakeSpreadsheetProvider;
  use crate::providers::video_listing::FakeVideoListingProvider;
  use crate::providers::VideoListing;
  use crate::error::PipelineError;
  use async_trait::async_trait;

  struct FailingSpreadsheet;

  #[async_trait]
  impl SpreadsheetProvider for FailingSpreadsheet {
    async fn list_backfill_urls(&self) -> Result<Vec<String>> {
      Err(PipelineError::transient("spreadsheet unavailable"))
    }
  }

  #[tokio::test]
  async fn discovers_videos_within_duration_limit() {
    let store = InMemoryMetadataStore::new();
    let listing = FakeVideoListingProvider::new();
    let now = Utc::now();
    listing.seed(
      "chan1",
      vec![
        VideoListing {
          video_id: "v1".to_string(),
          title: "ok".to_string(),
          published_at: now,
          duration_sec: 100,
          channel_id: "chan1".to_string(),
        },
        VideoListing {
          video_id: "v2".to_string(),
          title: "too long".to_string(),
          published_at: now,
          duration_sec: 5000,
          channel_id: "chan1".to_string(),
        },
      ],
    );
    let spreadsheet = FakeSpreadsheetProvider::new();
    let outcome = execute(
      ScrapeInput {
        channel_id: "chan1",
        since: now - chrono::Duration::days(1),
        limit: 10,
        max_video_duration_sec: 4200,
      },
      &store,
      &listing,
      &spreadsheet,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, WorkerStatus::Success);
    assert_eq!(outcome.outputs.videos_discovered, 1);
    assert_eq!(outcome.outputs.videos_skipped_duration, 1);
    assert!(store.get("v1").await.unwrap().is_some());
    assert!(store.get("v2").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn spreadsheet_failure_with_listing_success_is_partial() {
    let store = InMemoryMetadataStore::new();
    let listing = FakeVideoListingProvider::new();
    let now = Utc::now();
    listing.seed(
      "chan1",
      vec![VideoListing {
        video_id: "v1".to_string(),
        title: "ok".to_string(),
        published_at: now,
        duration_sec: 100,
        channel_id: "chan1".to_string(),
      }],
    );
    let outcome = execute(
      ScrapeInput {
        channel_id: "chan1",
        since: now - chrono::Duration::days(1),
        limit: 10,
        max_video_duration_sec: 4200,
      },
      &store,
      &listing,
      &FailingSpreadsheet,
    )
    .await
    .unwrap();
    assert_eq!(outcome.status, WorkerStatus::Partial);
    assert_eq!(outcome.outputs.videos_discovered, 1);
  }

  #[tokio::test]
  async fn backfill_urls_are_normalized_into_videos() {
    let store = InMemoryMetadataStore::new();
    let listing = FakeVideoListingProvider::new();
    let spreadsheet = FakeSpreadsheetProvider::new();
    spreadsheet.seed(vec!["https://youtube.com/watch?v=abc123&t=10".to_string()]);
    let outcome = execute(
      ScrapeInput {
        channel_id: "chan1",
        since: Utc::now() - chrono::Duration::days(1),
        limit: 10,
        max_video_duration_sec: 4200,
      },
      &store,
      &listing,
      &spreadsheet,
    )
    .await
    .unwrap();
    assert_eq!(outcome.outputs.videos_discovered, 1);
    assert!(store.get("abc123").await.unwrap().is_some());
  }
}
