//! # Instrumented Cache
//!
//! A scalar value cache over a Redis-shaped key-value store that counts
//! and records calls to its operations so they can be replayed later.
//!
//! ## Core Concepts
//!
//! - **Store adapters**: `SET`/`GET`/`INCR`/`RPUSH`/`LRANGE`/`FLUSHDB`
//!   behind one trait, with memory, journaled and Redis backends
//! - **Instrumentation**: wrappers that count calls and record rendered
//!   arguments and results without changing the wrapped operation
//! - **Replay**: a readable trace rebuilt from the counter and history lists
//!
//! ## Example
//!
//! ```ignore
//! use instrumented_cache::{Cache, CacheConfig, STORE_IDENTITY};
//!
//! let cache = Cache::open(CacheConfig::default())?;
//!
//! let key = cache.store("foo")?;
//! assert_eq!(cache.get_str(&key)?, "foo");
//!
//! let key = cache.store(42)?;
//! assert_eq!(cache.get_int(&key)?, 42);
//!
//! // Cache.store was called 2 times:
//! // Cache.store(*('foo',)) -> 6a1f...
//! // Cache.store(*(42,)) -> 0c9b...
//! println!("{}", cache.replay(&STORE_IDENTITY)?);
//! ```

pub mod adapter;
pub mod cache;
pub mod error;
pub mod instrument;
pub mod replay;
pub mod types;

// Re-exports
#[cfg(feature = "redis")]
pub use adapter::RedisStore;
pub use adapter::{JournaledStore, MemoryStore, StoreAdapter};
pub use cache::{BackendConfig, Cache, CacheConfig, STORE_IDENTITY};
pub use error::{CacheError, Result};
pub use instrument::{
    call_count, count_calls, from_fn, instrument, record_history, Counted, FnOperation,
    Instrumented, Operation, OperationExt, Recorded,
};
pub use replay::{replay, ReplayReport};
pub use types::*;
