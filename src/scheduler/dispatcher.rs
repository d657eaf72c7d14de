use super::CancellationSignal;
use crate::error::Result;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  Scrape,
  Transcribe,
  Summarize,
  Index,
}

impl Stage {
  /// Default per-stage concurrency caps from §4.5.
  pub fn default_concurrency(&self) -> usize {
    match self {
      Stage::Scrape => 1,
      Stage::Transcribe => 3,
      Stage::Summarize => 3,
      Stage::Index => 5,
    }
  }
}

/// Drives bounded per-stage concurrency and per-`video_id` serialization.
/// Dispatch emits a monotonically increasing `seq` per run, used by the
/// observability emitter for event ordering.
pub struct Dispatcher {
  semaphores: std::collections::HashMap<Stage, Arc<Semaphore>>,
  video_locks: DashMap<String, Arc<Mutex<()>>>,
  seq: AtomicU64,
  cancellation: CancellationSignal,
}

impl Dispatcher {
  pub fn new(cancellation: CancellationSignal) -> Self {
    let mut semaphores = std::collections::HashMap::new();
    for stage in [Stage::Scrape, Stage::Transcribe, Stage::Summarize, Stage::Index] {
      semaphores.insert(stage, Arc::new(Semaphore::new(stage.default_concurrency())));
    }
    Dispatcher {
      semaphores,
      video_locks: DashMap::new(),
      seq: AtomicU64::new(0),
      cancellation,
    }
  }

  pub fn with_concurrency(cancellation: CancellationSignal, overrides: &[(Stage, usize)]) -> Self {
    let mut dispatcher = Self::new(cancellation);
    for (stage, cap) in overrides {
      dispatcher.semaphores.insert(*stage, Arc::new(Semaphore::new(*cap)));
    }
    dispatcher
  }

  pub fn next_seq(&self) -> u64 {
    self.seq.fetch_add(1, Ordering::SeqCst)
  }

  pub fn cancellation(&self) -> &CancellationSignal {
    &self.cancellation
  }

  fn lock_for(&self, video_id: &str) -> Arc<Mutex<()>> {
    self
      .video_locks
      .entry(video_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  /// Runs `job` under the stage's concurrency cap and the video's
  /// serialization lock. Bails out early (without running `job`) if the
  /// run was already cancelled.
  pub async fn dispatch<F, Fut, T>(&self, stage: Stage, video_id: &str, job: F) -> Result<Option<T>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if self.cancellation.is_cancelled() {
      return Ok(None);
    }
    let semaphore = self
      .semaphores
      .get(&stage)
      .expect("every stage has a configured semaphore")
      .clone();
    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");

    let video_lock = self.lock_for(video_id);
    let _video_guard = video_lock.lock().await;

    if self.cancellation.is_cancelled() {
      return Ok(None);
    }

    let _seq = self.next_seq();
    job().await.map(Some)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[tokio::test]
  async fn dispatch_runs_job_and_returns_result() {
    let dispatcher = Dispatcher::new(CancellationSignal::new());
    let result = dispatcher
      .dispatch(Stage::Transcribe, "v1", || async { Ok::<_, crate::error::PipelineError>(42) })
      .await
      .unwrap();
    assert_eq!(result, Some(42));
  }

  #[tokio::test]
  async fn dispatch_skips_job_after_cancellation() {
    let signal = CancellationSignal::new();
    signal.cancel();
    let dispatcher = Dispatcher::new(signal);
    let result = dispatcher
      .dispatch(Stage::Transcribe, "v1", || async { Ok::<_, crate::error::PipelineError>(42) })
      .await
      .unwrap();
    assert_eq!(result, None);
  }

  #[tokio::test]
  async fn same_video_id_jobs_are_serialized() {
    let dispatcher = Arc::new(Dispatcher::new(CancellationSignal::new()));
    let counter = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..5 {
      let dispatcher = dispatcher.clone();
      let counter = counter.clone();
      handles.push(tokio::spawn(async move {
        dispatcher
          .dispatch(Stage::Index, "shared-video", || {
            let counter = counter.clone();
            async move {
              let before = counter.fetch_add(1, Ordering::SeqCst);
              assert_eq!(before, 0, "no concurrent execution for the same video_id");
              tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
              counter.fetch_sub(1, Ordering::SeqCst);
              Ok::<_, crate::error::PipelineError>(())
            }
          })
          .await
      }));
    }
    for handle in handles {
      handle.await.unwrap().unwrap();
    }
  }

  #[test]
  fn seq_increments_monotonically() {
    let dispatcher = Dispatcher::new(CancellationSignal::new());
    assert_eq!(dispatcher.next_seq(), 0);
    assert_eq!(dispatcher.next_seq(), 1);
    assert_eq!(dispatcher.next_seq(), 2);
  }
}
