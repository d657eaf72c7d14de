pub mod dispatcher;
pub mod planner;
pub mod policy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;

/// Cooperative cancellation signal for a single run. Workers poll
/// `is_cancelled()` at I/O suspension points; `cancel()` wakes anyone
/// waiting in `wait_for_cancellation()`. Implemented by hand rather than
/// with `tokio_util::sync::CancellationToken` — the need here is narrow
/// enough that a small `Arc<AtomicBool>` + `Notify` pair is clearer.
#[derive(Clone)]
pub struct CancellationSignal {
  cancelled: Arc<AtomicBool>,
  notify: Arc<Notify>,
}

impl Default for CancellationSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl CancellationSignal {
  pub fn new() -> Self {
    CancellationSignal {
      cancelled: Arc::new(AtomicBool::new(false)),
      notify: Arc::new(Notify::new()),
    }
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
    self.notify.notify_waiters();
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  pub async fn wait_for_cancellation(&self) {
    if self.is_cancelled() {
      return;
    }
    self.notify.notified().await;
  }
}

/// Default grace period given to an in-flight worker to finish its current
/// external call and persist consistent state after cancellation.
pub const CANCELLATION_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn cancellation_wakes_waiters() {
    let signal = CancellationSignal::new();
    let waiter = signal.clone();
    let handle = tokio::spawn(async move {
      waiter.wait_for_cancellation().await;
    });
    signal.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .expect("waiter should wake")
      .unwrap();
  }

  #[test]
  fn not_cancelled_by_default() {
    assert!(!CancellationSignal::new().is_cancelled());
  }
}
