//! Core types for the offline SOS queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// Message sent when the user leaves the free-text field empty.
pub const DEFAULT_SOS_MESSAGE: &str = "Emergency SOS request";

/// What the user raised: where, what, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
  pub latitude: f64,
  pub longitude: f64,
  pub message: Option<String>,
  /// When the SOS was raised on the device
  pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
  pub fn new(latitude: f64, longitude: f64, message: Option<String>) -> Self {
    Self {
      latitude,
      longitude,
      message: message.filter(|m| !m.trim().is_empty()),
      timestamp: Utc::now(),
    }
  }

  /// Message as sent to the backend.
  pub fn message_or_default(&self) -> &str {
    self.message.as_deref().unwrap_or(DEFAULT_SOS_MESSAGE)
  }
}

/// Lifecycle status of a queued alert.
///
/// Delivered and dropped alerts are deleted rather than marked, so the only
/// stored state is `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
  Pending,
}

impl AlertStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "PENDING",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "PENDING" => Ok(Self::Pending),
      other => Err(eyre!("Unknown alert status '{}'", other)),
    }
  }
}

/// An alert held in local storage until delivered or given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAlert {
  /// Assigned by storage on insert
  pub id: i64,
  pub payload: AlertPayload,
  /// When the alert entered the queue; drives the age sweep
  pub queued_at: DateTime<Utc>,
  pub status: AlertStatus,
  /// Failed replay attempts so far
  pub retries: u32,
}

impl QueuedAlert {
  /// A fresh pending entry. `id` is filled in by storage.
  pub fn new(payload: AlertPayload, queued_at: DateTime<Utc>) -> Self {
    Self {
      id: 0,
      payload,
      queued_at,
      status: AlertStatus::Pending,
      retries: 0,
    }
  }
}

/// Raised when an alert exhausts its retries and is removed from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct GiveUpNotice {
  pub alert_id: i64,
  pub payload: AlertPayload,
  pub attempts: u32,
  pub last_error: String,
  pub dropped_at: DateTime<Utc>,
}

impl std::fmt::Display for GiveUpNotice {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "SOS at {:.5},{:.5} could not be delivered after {} attempts and was dropped at {} ({})",
      self.payload.latitude,
      self.payload.longitude,
      self.attempts,
      self.dropped_at.format("%Y-%m-%d %H:%M:%S"),
      self.last_error
    )
  }
}

/// Why a replay pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Offline,
  AlreadyRunning,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
  /// Ids delivered and removed, in delivery order
  pub delivered: Vec<i64>,
  /// Ids that failed but stay pending, with their new retry count
  pub retried: Vec<(i64, u32)>,
  /// Alerts removed after reaching the retry ceiling
  pub dropped: Vec<GiveUpNotice>,
  pub skipped: Option<SkipReason>,
}

impl ReplayReport {
  pub fn skipped(reason: SkipReason) -> Self {
    Self {
      skipped: Some(reason),
      ..Self::default()
    }
  }

  pub fn attempted(&self) -> usize {
    self.delivered.len() + self.retried.len() + self.dropped.len()
  }
}

/// Result of `OfflineQueue::submit`.
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
  /// Delivered straight away
  Sent,
  /// Stored for a later replay pass
  Queued(QueuedAlert),
}
