//! Store adapters.
//!
//! The cache talks to its key-value store through the [`StoreAdapter`]
//! trait, a minimal Redis-shaped command set:
//! - `SET` / `GET` on plain values
//! - `INCR` on integer counters
//! - `RPUSH` / `LRANGE` on ordered lists
//! - `FLUSHDB` to clear everything
//!
//! Every command is atomic on its own. Nothing here makes a sequence of
//! commands atomic.
//!
//! Backends:
//! - [`MemoryStore`]: in-process, lost on drop
//! - [`JournaledStore`]: in-process with an on-disk command journal
//! - `RedisStore`: a real Redis server (cargo feature `redis`)

mod journal;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use journal::JournaledStore;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

use crate::error::Result;

/// Minimal command set of an external key-value store.
pub trait StoreAdapter: Send + Sync {
    /// Store `value` under `key`, replacing whatever was there.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read the plain value at `key`. `None` if the key was never set.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Increment the integer at `key` by one and return the new value.
    /// An absent key counts as zero.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Append `value` to the list at `key` and return the new length.
    fn rpush(&self, key: &str, value: &[u8]) -> Result<usize>;

    /// Read list elements `start..=stop`. Negative indices count from the
    /// end, so `(0, -1)` is the whole list.
    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>>;

    /// Delete every key.
    fn flush_all(&self) -> Result<()>;

    /// Make pending writes durable. No-op for backends without local state.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Resolve a Redis-style inclusive index range against a list length.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };

    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }

    Some((start as usize, stop as usize))
}
