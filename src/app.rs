use crate::config::Config;
use crate::db::Database;
use crate::net::{spawn_prober, ApiClient, Connectivity};
use crate::queue::{AlertPayload, OfflineQueue, ReplayReport, SkipReason, SqliteQueueStorage, Submitted};
use crate::tiles::{MemoryTileStorage, SqliteTileStorage, TileCache, TileSource, TileStorage};
use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use std::time::Duration;

/// Application state, built once at startup.
pub struct App {
  config: Config,
  client: ApiClient,
  connectivity: Connectivity,
  queue: OfflineQueue<SqliteQueueStorage>,
  tiles: TileCache<Box<dyn TileStorage>>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(&config.data_dir()?)?;
    let client = ApiClient::new(&config)?;

    // Assume offline until the first probe says otherwise
    let connectivity = Connectivity::new(false);

    let queue = OfflineQueue::new(SqliteQueueStorage::new(db.clone()), connectivity.clone())
      .with_max_retries(config.queue.max_retries);

    let tile_storage: Box<dyn TileStorage> = if config.tiles.persist {
      Box::new(SqliteTileStorage::new(db))
    } else {
      Box::new(MemoryTileStorage::default())
    };
    let tiles = TileCache::new(tile_storage).with_capacity(config.tiles.capacity_bytes);

    Ok(Self {
      config,
      client,
      connectivity,
      queue,
      tiles,
    })
  }

  /// One-shot reachability check for short-lived commands.
  async fn probe(&self) -> bool {
    let online = self.client.ping().await;
    self.connectivity.set_online(online);
    online
  }

  pub async fn sos(&self, latitude: f64, longitude: f64, message: Option<String>) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
      return Err(eyre!("Invalid coordinates {}, {}", latitude, longitude));
    }

    self.probe().await;
    let payload = AlertPayload::new(latitude, longitude, message);
    let client = self.client.clone();
    let outcome = self
      .queue
      .submit(payload, |p| async move { client.send_alert(&p, false).await })
      .await?;

    match outcome {
      Submitted::Sent => println!("SOS sent. Emergency contacts have been notified."),
      Submitted::Queued(alert) => println!(
        "SOS queued offline (#{}). It will be sent automatically when connection is restored.",
        alert.id
      ),
    }
    Ok(())
  }

  pub fn list_queue(&self) -> Result<()> {
    let pending = self.queue.list_pending()?;
    if pending.is_empty() {
      println!("No SOS events pending.");
      return Ok(());
    }

    println!("{} SOS event(s) pending", pending.len());
    for alert in pending {
      println!(
        "#{:<4} {}  {:>9.5},{:>10.5}  retries={}  {}",
        alert.id,
        alert.queued_at.format("%Y-%m-%d %H:%M:%S"),
        alert.payload.latitude,
        alert.payload.longitude,
        alert.retries,
        alert.payload.message_or_default()
      );
    }
    Ok(())
  }

  async fn replay_once(&self) -> Result<ReplayReport> {
    let client = self.client.clone();
    let report = self
      .queue
      .replay(move |payload| {
        let client = client.clone();
        async move { client.send_alert(&payload, true).await }
      })
      .await?;

    Self::print_report(&report);
    for notice in self.queue.drain_notices() {
      println!("! {}", notice);
    }
    Ok(report)
  }

  fn print_report(report: &ReplayReport) {
    match report.skipped {
      Some(SkipReason::Offline) => println!("Offline; queue not replayed."),
      Some(SkipReason::AlreadyRunning) => {}
      None if report.attempted() == 0 => {}
      None => println!(
        "Replayed {} SOS event(s): {} sent, {} will retry, {} dropped.",
        report.attempted(),
        report.delivered.len(),
        report.retried.len(),
        report.dropped.len()
      ),
    }
  }

  pub async fn replay(&self) -> Result<()> {
    self.probe().await;
    self.replay_once().await?;
    Ok(())
  }

  pub fn sweep(&self, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(self.config.queue.max_age_days);
    let removed = self.queue.age_sweep(days)?;
    println!("Removed {} SOS event(s) older than {} day(s).", removed, days);
    Ok(())
  }

  pub fn clear_queue(&self) -> Result<()> {
    self.queue.clear()?;
    println!("Offline SOS queue cleared.");
    Ok(())
  }

  pub async fn get_tile(&self, url: &str, out: Option<&Path>) -> Result<()> {
    let client = self.client.clone();
    let owned_url = url.to_string();
    let tile = self
      .tiles
      .fetch(url, || async move { client.fetch_tile(&owned_url).await })
      .await?;

    let source = match tile.source {
      TileSource::Cache => "cache",
      TileSource::Network => "network",
    };

    match out {
      Some(path) => {
        std::fs::write(path, &tile.data)
          .map_err(|e| eyre!("Failed to write tile to {}: {}", path.display(), e))?;
        println!("{} bytes from {} written to {}", tile.data.len(), source, path.display());
      }
      None => println!("{} bytes from {}", tile.data.len(), source),
    }
    Ok(())
  }

  pub fn tile_stats(&self) -> Result<()> {
    let stats = self.tiles.stats()?;
    println!(
      "{} tile(s), {:.2} MiB of {:.2} MiB",
      stats.entries,
      stats.total_bytes as f64 / (1024.0 * 1024.0),
      self.tiles.capacity() as f64 / (1024.0 * 1024.0)
    );
    Ok(())
  }

  pub fn clear_tiles(&self) -> Result<()> {
    self.tiles.clear()?;
    println!("Tile cache cleared.");
    Ok(())
  }

  /// Keep probing connectivity and replay the queue whenever it comes back,
  /// and periodically while alerts are pending. Runs until Ctrl-C.
  pub async fn watch(&self) -> Result<()> {
    self.queue.age_sweep(self.config.queue.max_age_days)?;

    let client = self.client.clone();
    let prober = spawn_prober(
      self.connectivity.clone(),
      Duration::from_secs(self.config.connectivity.probe_interval_secs.max(1)),
      move || {
        let client = client.clone();
        async move { client.ping().await }
      },
    );

    let mut online = self.connectivity.subscribe();
    let mut ticker =
      tokio::time::interval(Duration::from_secs(self.config.queue.replay_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(pending = self.queue.pending_len()?, "watching for connectivity");

    loop {
      tokio::select! {
        changed = online.changed() => {
          if changed.is_err() {
            break;
          }
          if *online.borrow_and_update() {
            self.replay_logged().await;
          }
        }
        _ = ticker.tick() => {
          if self.connectivity.is_online() && self.queue.pending_len().unwrap_or(0) > 0 {
            self.replay_logged().await;
          }
        }
        _ = tokio::signal::ctrl_c() => {
          tracing::info!("shutting down");
          break;
        }
      }
    }

    prober.abort();
    Ok(())
  }

  /// Replay inside the watch loop, where a storage error must not end the loop.
  async fn replay_logged(&self) {
    if let Err(e) = self.replay_once().await {
      tracing::error!(error = %e, "replay failed");
    }
  }
}
