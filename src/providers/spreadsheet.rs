use super::SpreadsheetProvider;
use crate::error::{PipelineError, Result};
use crate::http_client::http_client_for_url;
use async_trait::async_trait;
use std::sync::Mutex;

/// Reads the operator's backfill list from a Google Sheet published as CSV
/// (File > Share > Publish to web > CSV). The first column of each data row
/// is treated as a video URL; the header row is skipped.
pub struct GoogleSheetsSpreadsheetProvider {
  csv_url: String,
}

impl GoogleSheetsSpreadsheetProvider {
  pub fn new(csv_url: impl Into<String>) -> Self {
    GoogleSheetsSpreadsheetProvider { csv_url: csv_url.into() }
  }

  pub fn from_env() -> Option<Self> {
    std::env::var("SPREADSHEET_BACKFILL_CSV_URL")
      .ok()
      .filter(|v| !v.is_empty())
      .map(Self::new)
  }
}

#[async_trait]
impl SpreadsheetProvider for GoogleSheetsSpreadsheetProvider {
  async fn list_backfill_urls(&self) -> Result<Vec<String>> {
    let client = http_client_for_url(&self.csv_url).map_err(|e| PipelineError::transient(e.to_string()))?;
    let response = client
      .get(&self.csv_url)
      .send()
      .await
      .map_err(|e| PipelineError::transient(e.to_string()))?;

    if !response.status().is_success() {
      return Err(PipelineError::transient(format!(
        "spreadsheet fetch returned status {}",
        response.status()
      )));
    }

    let body = response
      .text()
      .await
      .map_err(|e| PipelineError::transient(e.to_string()))?;

    Ok(parse_backfill_urls(&body))
  }
}

fn parse_backfill_urls(csv_body: &str) -> Vec<String> {
  csv_body
    .lines()
    .skip(1)
    .filter_map(|line| line.split(',').next())
    .map(|cell| cell.trim().trim_matches('"').to_string())
    .filter(|url| !url.is_empty())
    .collect()
}

/// In-process fake for tests and local/dev runs without a configured sheet.
#[derive(Default)]
pub struct FakeSpreadsheetProvider {
  urls: Mutex<Vec<String>>,
}

impl FakeSpreadsheetProvider {
  pub fn new() -> Self {
    FakeSpreadsheetProvider::default()
  }

  pub fn seed(&self, urls: Vec<String>) {
    *self.urls.lock().unwrap() = urls;
  }
}

#[async_trait]
impl SpreadsheetProvider for FakeSpreadsheetProvider {
  async fn list_backfill_urls(&self) -> Result<Vec<String>> {
    Ok(self.urls.lock().unwrap().clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_first_column_skipping_header() {
    let csv = "url,note\nhttps://youtube.com/watch?v=abc,backfill\nhttps://youtube.com/watch?v=def,\n";
    let urls = parse_backfill_urls(csv);
    assert_eq!(
      urls,
      vec![
        "https://youtube.com/watch?v=abc".to_string(),
        "https://youtube.com/watch?v=def".to_string(),
      ]
    );
  }

  #[test]
  fn empty_body_yields_no_urls() {
    assert!(parse_backfill_urls("").is_empty());
    assert!(parse_backfill_urls("url\n").is_empty());
  }

  #[tokio::test]
  async fn fake_provider_returns_seeded_urls() {
    let fake = FakeSpreadsheetProvider::new();
    fake.seed(vec!["https://youtube.com/watch?v=xyz".to_string()]);
    let urls = fake.list_backfill_urls().await.unwrap();
    assert_eq!(urls, vec!["https://youtube.com/watch?v=xyz".to_string()]);
  }
}
