//! Tile storage trait with SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use super::types::{CacheStats, CachedTile, TileMeta};
use crate::db::Database;

/// Trait for tile cache backends.
pub trait TileStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<CachedTile>>;

  /// Remove the `evict` keys and insert `tile` (replacing any tile with the
  /// same key) as one atomic step: either all of it happens or none of it.
  fn put_evicting(&self, tile: &CachedTile, evict: &[String]) -> Result<()>;

  /// All tiles ordered by (inserted_at, seq), oldest first.
  fn list_oldest_first(&self) -> Result<Vec<TileMeta>>;

  fn stats(&self) -> Result<CacheStats>;

  fn clear(&self) -> Result<()>;
}

impl<T: TileStorage + ?Sized> TileStorage for Box<T> {
  fn get(&self, key: &str) -> Result<Option<CachedTile>> {
    (**self).get(key)
  }

  fn put_evicting(&self, tile: &CachedTile, evict: &[String]) -> Result<()> {
    (**self).put_evicting(tile, evict)
  }

  fn list_oldest_first(&self) -> Result<Vec<TileMeta>> {
    (**self).list_oldest_first()
  }

  fn stats(&self) -> Result<CacheStats> {
    (**self).stats()
  }

  fn clear(&self) -> Result<()> {
    (**self).clear()
  }
}

/// SQLite-backed tiles in the `tile_cache` table.
pub struct SqliteTileStorage {
  db: Database,
}

impl SqliteTileStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl TileStorage for SqliteTileStorage {
  fn get(&self, key: &str) -> Result<Option<CachedTile>> {
    let conn = self.db.lock()?;
    conn
      .query_row(
        "SELECT tile_key, url, data, inserted_at FROM tile_cache WHERE tile_key = ?",
        params![key],
        |row| {
          Ok(CachedTile {
            key: row.get(0)?,
            url: row.get(1)?,
            data: row.get(2)?,
            inserted_at: row.get(3)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read tile: {}", e))
  }

  fn put_evicting(&self, tile: &CachedTile, evict: &[String]) -> Result<()> {
    let mut conn = self.db.lock()?;
    // Dropped without commit on any error, which rolls back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for key in evict {
      tx.execute("DELETE FROM tile_cache WHERE tile_key = ?", params![key])
        .map_err(|e| eyre!("Failed to evict tile: {}", e))?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO tile_cache (tile_key, url, data, size, inserted_at)
       VALUES (?, ?, ?, ?, ?)",
      params![tile.key, tile.url, tile.data, tile.size() as i64, tile.inserted_at],
    )
    .map_err(|e| eyre!("Failed to store tile: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn list_oldest_first(&self) -> Result<Vec<TileMeta>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT tile_key, size, inserted_at, seq FROM tile_cache ORDER BY inserted_at, seq")
      .map_err(|e| eyre!("Failed to prepare tile query: {}", e))?;

    let tiles = stmt
      .query_map([], |row| {
        let size: i64 = row.get(1)?;
        Ok(TileMeta {
          key: row.get(0)?,
          size: size as u64,
          inserted_at: row.get(2)?,
          seq: row.get(3)?,
        })
      })
      .map_err(|e| eyre!("Failed to query tiles: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read tile row: {}", e))?;

    Ok(tiles)
  }

  fn stats(&self) -> Result<CacheStats> {
    let conn = self.db.lock()?;
    let (total, count): (i64, i64) = conn
      .query_row(
        "SELECT COALESCE(SUM(size), 0), COUNT(*) FROM tile_cache",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(|e| eyre!("Failed to read cache stats: {}", e))?;

    Ok(CacheStats {
      total_bytes: total as u64,
      entries: count as usize,
    })
  }

  fn clear(&self) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM tile_cache", [])
      .map_err(|e| eyre!("Failed to clear tile cache: {}", e))?;
    Ok(())
  }
}

#[derive(Default)]
struct MemoryTiles {
  next_seq: i64,
  entries: HashMap<String, (i64, CachedTile)>,
}

/// Process-local tile storage, used when tiles should not be persisted.
#[derive(Default)]
pub struct MemoryTileStorage {
  inner: Mutex<MemoryTiles>,
}

impl MemoryTileStorage {
  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryTiles>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl TileStorage for MemoryTileStorage {
  fn get(&self, key: &str) -> Result<Option<CachedTile>> {
    Ok(self.lock()?.entries.get(key).map(|(_, t)| t.clone()))
  }

  fn put_evicting(&self, tile: &CachedTile, evict: &[String]) -> Result<()> {
    let mut tiles = self.lock()?;
    for key in evict {
      tiles.entries.remove(key);
    }
    tiles.next_seq += 1;
    let seq = tiles.next_seq;
    tiles.entries.insert(tile.key.clone(), (seq, tile.clone()));
    Ok(())
  }

  fn list_oldest_first(&self) -> Result<Vec<TileMeta>> {
    let tiles = self.lock()?;
    let mut metas: Vec<TileMeta> = tiles
      .entries
      .values()
      .map(|(seq, t)| TileMeta {
        key: t.key.clone(),
        size: t.size(),
        inserted_at: t.inserted_at,
        seq: *seq,
      })
      .collect();
    metas.sort_by_key(|m| (m.inserted_at, m.seq));
    Ok(metas)
  }

  fn stats(&self) -> Result<CacheStats> {
    let tiles = self.lock()?;
    Ok(CacheStats {
      total_bytes: tiles.entries.values().map(|(_, t)| t.size()).sum(),
      entries: tiles.entries.len(),
    })
  }

  fn clear(&self) -> Result<()> {
    self.lock()?.entries.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tile(key: &str, size: usize, inserted_at: i64) -> CachedTile {
    CachedTile {
      key: key.to_string(),
      url: format!("https://tiles.example/{}", key),
      data: vec![7; size],
      inserted_at,
    }
  }

  fn check_backend(storage: &dyn TileStorage) {
    storage.put_evicting(&tile("b", 10, 200), &[]).unwrap();
    storage.put_evicting(&tile("a", 20, 100), &[]).unwrap();
    storage.put_evicting(&tile("c", 30, 200), &[]).unwrap();

    let order: Vec<String> = storage
      .list_oldest_first()
      .unwrap()
      .into_iter()
      .map(|m| m.key)
      .collect();
    // "b" and "c" share a timestamp; insertion order decides
    assert_eq!(order, vec!["a", "b", "c"]);

    assert_eq!(
      storage.stats().unwrap(),
      CacheStats {
        total_bytes: 60,
        entries: 3
      }
    );
    assert_eq!(storage.get("a").unwrap().unwrap().data, vec![7; 20]);

    // Evict "a" while replacing "b"; the replaced key is re-sequenced
    storage
      .put_evicting(&tile("b", 5, 200), &["a".to_string()])
      .unwrap();
    assert!(storage.get("a").unwrap().is_none());
    let order: Vec<String> = storage
      .list_oldest_first()
      .unwrap()
      .into_iter()
      .map(|m| m.key)
      .collect();
    assert_eq!(order, vec!["c", "b"]);
    assert_eq!(storage.stats().unwrap().total_bytes, 35);

    storage.clear().unwrap();
    assert_eq!(storage.stats().unwrap(), CacheStats::default());
  }

  #[test]
  fn test_sqlite_backend() {
    check_backend(&SqliteTileStorage::new(Database::open_in_memory().unwrap()));
  }

  #[test]
  fn test_sqlite_failed_insert_rolls_back_evictions() {
    let db = Database::open_in_memory().unwrap();
    let storage = SqliteTileStorage::new(db.clone());
    storage.put_evicting(&tile("old", 10, 100), &[]).unwrap();

    // Make the INSERT fail after the DELETE has run inside the transaction
    db.lock()
      .unwrap()
      .execute_batch(
        "CREATE TRIGGER reject_new BEFORE INSERT ON tile_cache
         WHEN NEW.tile_key = 'new' BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
      )
      .unwrap();

    assert!(storage
      .put_evicting(&tile("new", 10, 200), &["old".to_string()])
      .is_err());
    assert!(storage.get("old").unwrap().is_some());
    assert_eq!(storage.stats().unwrap().entries, 1);
  }

  #[test]
  fn test_memory_backend() {
    check_backend(&MemoryTileStorage::default());
  }
}
