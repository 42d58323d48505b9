//! Size-bounded tile cache with oldest-first eviction.

use chrono::Utc;
use color_eyre::Result;
use std::future::Future;
use std::sync::atomic::AtomicBool;

use super::storage::TileStorage;
use super::types::{tile_key, CacheStats, CachedTile, FetchedTile, PutOutcome, TileSource};
use crate::guard::PassGuard;

const DEFAULT_CAPACITY: u64 = 50 * 1024 * 1024;

/// Map tiles keyed by URL, holding at most `capacity` payload bytes.
pub struct TileCache<S: TileStorage> {
  storage: S,
  capacity: u64,
  putting: AtomicBool,
}

impl<S: TileStorage> TileCache<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage,
      capacity: DEFAULT_CAPACITY,
      putting: AtomicBool::new(false),
    }
  }

  pub fn with_capacity(mut self, capacity: u64) -> Self {
    self.capacity = capacity;
    self
  }

  pub fn capacity(&self) -> u64 {
    self.capacity
  }

  /// Store `bytes` for `url`, evicting the oldest tiles if needed.
  ///
  /// A tile larger than the whole cache is not stored and nothing is evicted.
  pub fn put(&self, url: &str, bytes: &[u8]) -> Result<PutOutcome> {
    let size = bytes.len() as u64;
    if size > self.capacity {
      tracing::debug!(url, size, capacity = self.capacity, "tile larger than cache, not caching");
      return Ok(PutOutcome::Rejected);
    }

    let Some(_guard) = PassGuard::try_acquire(&self.putting) else {
      tracing::debug!(url, "tile put already in progress, skipping");
      return Ok(PutOutcome::Busy);
    };

    let key = tile_key(url);

    // A re-put replaces the old entry, so its bytes don't count
    let others: Vec<_> = self
      .storage
      .list_oldest_first()?
      .into_iter()
      .filter(|m| m.key != key)
      .collect();
    let mut total: u64 = others.iter().map(|m| m.size).sum();

    let mut victims = Vec::new();
    for victim in others {
      if total + size <= self.capacity {
        break;
      }
      total -= victim.size;
      victims.push(victim.key);
    }
    let evicted = victims.len();

    self.storage.put_evicting(
      &CachedTile {
        key,
        url: url.to_string(),
        data: bytes.to_vec(),
        inserted_at: Utc::now().timestamp_millis(),
      },
      &victims,
    )?;

    if evicted > 0 {
      tracing::debug!(evicted, freed_to = total, "evicted tiles");
    }

    Ok(PutOutcome::Stored { evicted })
  }

  /// Cached bytes for `url`, if any.
  pub fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.storage.get(&tile_key(url))?.map(|t| t.data))
  }

  /// Return the cached tile, or fetch it, cache it, and return it.
  ///
  /// A failed cache write after a successful fetch is logged and the
  /// fetched bytes are still returned.
  pub async fn fetch<F, Fut>(&self, url: &str, fetcher: F) -> Result<FetchedTile>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
  {
    if let Some(data) = self.get(url)? {
      return Ok(FetchedTile {
        data,
        source: TileSource::Cache,
      });
    }

    let data = fetcher().await?;
    if let Err(e) = self.put(url, &data) {
      tracing::warn!(url, error = %e, "failed to cache tile");
    }

    Ok(FetchedTile {
      data,
      source: TileSource::Network,
    })
  }

  pub fn stats(&self) -> Result<CacheStats> {
    self.storage.stats()
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear()?;
    tracing::info!("tile cache cleared");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::tiles::storage::{MemoryTileStorage, SqliteTileStorage};
  use crate::tiles::types::TileMeta;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn cache(capacity: u64) -> TileCache<MemoryTileStorage> {
    TileCache::new(MemoryTileStorage::default()).with_capacity(capacity)
  }

  #[test]
  fn test_put_then_get_round_trips() {
    let cache = cache(1024);
    let bytes: Vec<u8> = (0..=255).collect();
    assert_eq!(
      cache.put("https://t/1/0/0.png", &bytes).unwrap(),
      PutOutcome::Stored { evicted: 0 }
    );
    assert_eq!(cache.get("https://t/1/0/0.png").unwrap(), Some(bytes));
    assert_eq!(cache.get("https://t/1/0/1.png").unwrap(), None);
  }

  #[test]
  fn test_second_tile_evicts_first_at_capacity() {
    let cache = TileCache::new(SqliteTileStorage::new(Database::open_in_memory().unwrap()))
      .with_capacity(100);

    cache.put("t1", &[1; 60]).unwrap();
    let outcome = cache.put("t2", &[2; 60]).unwrap();

    assert_eq!(outcome, PutOutcome::Stored { evicted: 1 });
    assert_eq!(cache.get("t1").unwrap(), None);
    assert_eq!(cache.get("t2").unwrap(), Some(vec![2; 60]));
    assert_eq!(
      cache.stats().unwrap(),
      CacheStats {
        total_bytes: 60,
        entries: 1
      }
    );
  }

  #[test]
  fn test_eviction_is_oldest_first_and_minimal() {
    let cache = cache(100);
    cache.put("a", &[0; 30]).unwrap();
    cache.put("b", &[0; 30]).unwrap();
    cache.put("c", &[0; 30]).unwrap();

    // Needs 20 more bytes: removing "a" alone is enough
    assert_eq!(
      cache.put("d", &[0; 30]).unwrap(),
      PutOutcome::Stored { evicted: 1 }
    );
    assert!(cache.get("a").unwrap().is_none());
    for url in ["b", "c", "d"] {
      assert!(cache.get(url).unwrap().is_some(), "{} should remain", url);
    }
  }

  #[test]
  fn test_capacity_invariant_over_many_puts() {
    let cache = cache(1000);
    for i in 0..200u32 {
      let size = (i * 37 % 300 + 1) as usize;
      let url = format!("https://t/{}", i);
      cache.put(&url, &vec![i as u8; size]).unwrap();
      assert!(cache.stats().unwrap().total_bytes <= 1000);
      // The tile just inserted always survives its own eviction pass
      assert_eq!(cache.get(&url).unwrap().map(|d| d.len()), Some(size));
    }
  }

  #[test]
  fn test_oversize_tile_rejected_without_eviction() {
    let cache = cache(100);
    cache.put("small", &[0; 50]).unwrap();

    assert_eq!(cache.put("huge", &[0; 101]).unwrap(), PutOutcome::Rejected);
    assert!(cache.get("huge").unwrap().is_none());
    assert!(cache.get("small").unwrap().is_some());
  }

  #[test]
  fn test_reput_same_url_does_not_double_count() {
    let cache = cache(100);
    cache.put("a", &[0; 40]).unwrap();
    cache.put("b", &[0; 40]).unwrap();

    assert_eq!(
      cache.put("a", &[1; 50]).unwrap(),
      PutOutcome::Stored { evicted: 0 }
    );
    assert_eq!(cache.stats().unwrap().total_bytes, 90);
    assert_eq!(cache.get("a").unwrap(), Some(vec![1; 50]));
  }

  #[test]
  fn test_clear_is_idempotent() {
    let cache = cache(100);
    cache.put("a", &[0; 10]).unwrap();

    cache.clear().unwrap();
    assert_eq!(cache.stats().unwrap(), CacheStats::default());
    cache.clear().unwrap();
    assert_eq!(cache.stats().unwrap(), CacheStats::default());
  }

  #[test]
  fn test_put_while_another_put_runs_is_skipped() {
    let cache = cache(100);
    let _held = PassGuard::try_acquire(&cache.putting).unwrap();
    assert_eq!(cache.put("a", &[0; 10]).unwrap(), PutOutcome::Busy);
    assert_eq!(cache.stats().unwrap().entries, 0);
  }

  #[tokio::test]
  async fn test_fetch_reads_through_once() {
    let cache = cache(100);
    let calls = AtomicU32::new(0);
    let fetcher = || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Ok::<_, color_eyre::Report>(vec![9u8; 16]) }
    };

    let first = cache.fetch("https://t/0/0/0.png", fetcher).await.unwrap();
    assert_eq!(first.source, TileSource::Network);
    let second = cache.fetch("https://t/0/0/0.png", fetcher).await.unwrap();
    assert_eq!(second.source, TileSource::Cache);
    assert_eq!(second.data, vec![9u8; 16]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fetch_failure_is_error_and_caches_nothing() {
    let cache = cache(100);
    let result = cache
      .fetch("https://t/0/0/0.png", || async { Err::<Vec<u8>, _>(eyre!("404")) })
      .await;
    assert!(result.is_err());
    assert_eq!(cache.stats().unwrap().entries, 0);
  }

  /// Tile storage that reads fine but cannot write.
  #[derive(Default)]
  struct ReadOnlyStorage {
    inner: MemoryTileStorage,
  }

  impl TileStorage for ReadOnlyStorage {
    fn get(&self, key: &str) -> Result<Option<CachedTile>> {
      self.inner.get(key)
    }
    fn put_evicting(&self, _tile: &CachedTile, _evict: &[String]) -> Result<()> {
      Err(eyre!("database or disk is full"))
    }
    fn list_oldest_first(&self) -> Result<Vec<TileMeta>> {
      self.inner.list_oldest_first()
    }
    fn stats(&self) -> Result<CacheStats> {
      self.inner.stats()
    }
    fn clear(&self) -> Result<()> {
      self.inner.clear()
    }
  }

  #[test]
  fn test_storage_failure_surfaces_on_put() {
    let cache = TileCache::new(ReadOnlyStorage::default()).with_capacity(100);
    assert!(cache.put("a", &[0; 10]).is_err());

    // The flag is released even though the put failed
    assert!(cache.put("a", &[0; 10]).is_err());
  }

  #[test]
  fn test_failed_put_keeps_existing_tiles() {
    let storage = ReadOnlyStorage::default();
    storage
      .inner
      .put_evicting(
        &CachedTile {
          key: tile_key("old"),
          url: "old".to_string(),
          data: vec![1; 60],
          inserted_at: 0,
        },
        &[],
      )
      .unwrap();
    let cache = TileCache::new(storage).with_capacity(100);

    assert!(cache.put("new", &[2; 60]).is_err());
    assert_eq!(cache.get("old").unwrap(), Some(vec![1; 60]));
  }

  #[tokio::test]
  async fn test_fetch_returns_bytes_when_cache_write_fails() {
    let cache = TileCache::new(ReadOnlyStorage::default()).with_capacity(100);
    let tile = cache
      .fetch("https://t/0/0/0.png", || async {
        Ok::<_, color_eyre::Report>(vec![5u8; 8])
      })
      .await
      .unwrap();

    assert_eq!(tile.source, TileSource::Network);
    assert_eq!(tile.data, vec![5u8; 8]);
    assert_eq!(cache.stats().unwrap().entries, 0);
  }
}
