//! Connectivity signal and the reachability prober that feeds it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Boolean "should we try the network" source.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a new state. Subscribers are only woken on transitions.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      if online {
        tracing::info!("connectivity restored");
      } else {
        tracing::warn!("connectivity lost");
      }
    }
  }

  /// Receiver that resolves `changed()` on every online/offline transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Spawn a task that calls `probe` every `interval` and feeds the result
/// into `connectivity`. The first probe runs immediately.
pub fn spawn_prober<F, Fut>(connectivity: Connectivity, interval: Duration, probe: F) -> JoinHandle<()>
where
  F: Fn() -> Fut + Send + 'static,
  Fut: std::future::Future<Output = bool> + Send,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      let reachable = probe().await;
      tracing::trace!(reachable, "reachability probe");
      connectivity.set_online(reachable);
    }
  })
}
