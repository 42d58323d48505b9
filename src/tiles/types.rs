//! Core types for the tile cache.

use sha2::{Digest, Sha256};

/// Stable, fixed-length storage key for a tile URL.
pub fn tile_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.trim().as_bytes());
  hex::encode(hasher.finalize())
}

/// A stored tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTile {
  pub key: String,
  pub url: String,
  pub data: Vec<u8>,
  /// Milliseconds since the Unix epoch
  pub inserted_at: i64,
}

impl CachedTile {
  pub fn size(&self) -> u64 {
    self.data.len() as u64
  }
}

/// Just enough of a tile to pick eviction victims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMeta {
  pub key: String,
  pub size: u64,
  pub inserted_at: i64,
  /// Insertion sequence; breaks `inserted_at` ties
  pub seq: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub total_bytes: u64,
  pub entries: usize,
}

/// What `TileCache::put` did with the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
  /// Stored, after evicting this many older tiles
  Stored { evicted: usize },
  /// Larger than the whole cache; not stored
  Rejected,
  /// Another put was mid-eviction; not stored
  Busy,
}

/// Where `TileCache::fetch` got the bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
  Cache,
  Network,
}

#[derive(Debug, Clone)]
pub struct FetchedTile {
  pub data: Vec<u8>,
  pub source: TileSource,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tile_key_is_stable_hex() {
    let a = tile_key("https://tile.openstreetmap.org/3/4/2.png");
    let b = tile_key("https://tile.openstreetmap.org/3/4/2.png");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, tile_key("https://tile.openstreetmap.org/3/4/3.png"));
  }
}
