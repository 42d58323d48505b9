//! Offline SOS queue: hold undeliverable alerts and replay them later.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use super::storage::QueueStorage;
use super::types::{
  AlertPayload, AlertStatus, GiveUpNotice, QueuedAlert, ReplayReport, SkipReason, Submitted,
};
use crate::guard::PassGuard;
use crate::net::Connectivity;

/// Durable outbox for SOS alerts.
///
/// Delivery failures are routine here and never returned as errors; only
/// storage failures are. Alerts that hit the retry ceiling are removed and
/// reported as `GiveUpNotice`s.
pub struct OfflineQueue<S: QueueStorage> {
  storage: S,
  connectivity: Connectivity,
  max_retries: u32,
  replaying: AtomicBool,
  notices: Mutex<Vec<GiveUpNotice>>,
}

impl<S: QueueStorage> OfflineQueue<S> {
  pub fn new(storage: S, connectivity: Connectivity) -> Self {
    Self {
      storage,
      connectivity,
      max_retries: 3,
      replaying: AtomicBool::new(false),
      notices: Mutex::new(Vec::new()),
    }
  }

  /// Set how many failed attempts an alert gets before it is dropped.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }

  /// Store `payload` as a new pending alert.
  pub fn enqueue(&self, payload: AlertPayload) -> Result<QueuedAlert> {
    self.enqueue_at(payload, Utc::now())
  }

  fn enqueue_at(&self, payload: AlertPayload, queued_at: DateTime<Utc>) -> Result<QueuedAlert> {
    let mut alert = QueuedAlert::new(payload, queued_at);
    alert.id = self.storage.insert(&alert)?;
    tracing::info!(id = alert.id, "SOS queued for later delivery");
    Ok(alert)
  }

  /// Send now if online, otherwise (or if the send fails) queue it.
  pub async fn submit<F, Fut>(&self, payload: AlertPayload, sender: F) -> Result<Submitted>
  where
    F: FnOnce(AlertPayload) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    if self.connectivity.is_online() {
      match sender(payload.clone()).await {
        Ok(()) => {
          tracing::info!("SOS delivered");
          return Ok(Submitted::Sent);
        }
        Err(e) => {
          tracing::warn!(error = %e, "SOS send failed, queueing");
        }
      }
    } else {
      tracing::info!("offline, queueing SOS");
    }

    Ok(Submitted::Queued(self.enqueue(payload)?))
  }

  /// Pending alerts in insertion order.
  pub fn list_pending(&self) -> Result<Vec<QueuedAlert>> {
    self.storage.list_by_status(AlertStatus::Pending)
  }

  pub fn pending_len(&self) -> Result<usize> {
    self.storage.count_by_status(AlertStatus::Pending)
  }

  /// Try to deliver every pending alert once, oldest first.
  ///
  /// Does nothing while offline or while another pass is running.
  pub async fn replay<F, Fut>(&self, sender: F) -> Result<ReplayReport>
  where
    F: Fn(AlertPayload) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    if !self.connectivity.is_online() {
      return Ok(ReplayReport::skipped(SkipReason::Offline));
    }

    let Some(_guard) = PassGuard::try_acquire(&self.replaying) else {
      tracing::debug!("replay already in progress");
      return Ok(ReplayReport::skipped(SkipReason::AlreadyRunning));
    };

    let pending = self.list_pending()?;
    let mut report = ReplayReport::default();

    for alert in pending {
      match sender(alert.payload.clone()).await {
        Ok(()) => {
          self.storage.delete(alert.id)?;
          tracing::info!(id = alert.id, "queued SOS delivered");
          report.delivered.push(alert.id);
        }
        Err(e) => {
          let retries = alert.retries + 1;
          if retries >= self.max_retries {
            self.storage.delete(alert.id)?;
            let notice = GiveUpNotice {
              alert_id: alert.id,
              payload: alert.payload,
              attempts: retries,
              last_error: e.to_string(),
              dropped_at: Utc::now(),
            };
            tracing::warn!(id = alert.id, attempts = retries, "dropping undeliverable SOS");
            // Buffer now: a later storage error in this pass must not hide it
            if let Ok(mut notices) = self.notices.lock() {
              notices.push(notice.clone());
            }
            report.dropped.push(notice);
          } else {
            self.storage.set_retries(alert.id, retries)?;
            tracing::debug!(id = alert.id, retries, error = %e, "SOS delivery failed, will retry");
            report.retried.push((alert.id, retries));
          }
        }
      }
    }

    Ok(report)
  }

  /// Give-up notices accumulated since the last drain.
  pub fn drain_notices(&self) -> Vec<GiveUpNotice> {
    self
      .notices
      .lock()
      .map(|mut n| std::mem::take(&mut *n))
      .unwrap_or_default()
  }

  /// Remove alerts queued more than `max_age_days` ago. Returns the count.
  pub fn age_sweep(&self, max_age_days: u32) -> Result<usize> {
    self.age_sweep_at(max_age_days, Utc::now())
  }

  fn age_sweep_at(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = now - Duration::days(i64::from(max_age_days));
    let stale = self.storage.list_queued_before(cutoff)?;
    for alert in &stale {
      self.storage.delete(alert.id)?;
    }
    if !stale.is_empty() {
      tracing::info!(removed = stale.len(), max_age_days, "swept old queued alerts");
    }
    Ok(stale.len())
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }
}
