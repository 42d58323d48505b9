//! Local map-tile cache bounded by total payload size.
//!
//! Tiles are keyed by a SHA-256 of their URL. When an insert would push the
//! cache over capacity, the oldest tiles (by insertion time, then insertion
//! order) are evicted until the new tile fits.

mod cache;
mod storage;
mod types;

pub use cache::TileCache;
pub use storage::{MemoryTileStorage, SqliteTileStorage, TileStorage};
pub use types::TileSource;
