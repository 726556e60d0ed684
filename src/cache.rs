//! Cache facade tying the store adapter and instrumentation together.

use crate::adapter::{JournaledStore, MemoryStore, StoreAdapter};
use crate::error::{CacheError, Result};
use crate::instrument::{call_count, instrument, Instrumented, Operation};
use crate::replay::{replay, ReplayReport};
use crate::types::{CacheKey, OperationId, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Identity under which [`Cache::store`] calls are counted and recorded.
pub const STORE_IDENTITY: OperationId = OperationId::from_static("Cache.store");

/// Which store the cache talks to.
#[derive(Clone, Debug)]
pub enum BackendConfig {
    /// Process-local memory.
    Memory,

    /// Process-local memory with a command journal in `path`.
    Journal {
        path: PathBuf,
        /// Fsync every N writes.
        sync_interval: u64,
    },

    /// A Redis server.
    #[cfg(feature = "redis")]
    Redis { url: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory
    }
}

/// Cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Backend to open.
    pub backend: BackendConfig,

    /// Flush the whole store when the cache opens.
    pub flush_on_open: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            flush_on_open: true,
        }
    }
}

/// The undecorated store operation: allocate a key and set the value.
struct StoreValue {
    store: Arc<dyn StoreAdapter>,
}

impl Operation<(Value,)> for StoreValue {
    type Output = CacheKey;

    fn invoke(&self, (value,): (Value,)) -> Result<CacheKey> {
        let key = CacheKey::generate();
        self.store.set(key.as_str(), &value.to_store_bytes())?;
        Ok(key)
    }
}

/// Scalar value cache with instrumented writes.
///
/// `store` is counted and recorded under [`STORE_IDENTITY`]; reads are not
/// instrumented.
pub struct Cache {
    store: Arc<dyn StoreAdapter>,
    store_op: Instrumented<StoreValue>,
}

impl Cache {
    /// Open the configured backend.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let store: Arc<dyn StoreAdapter> = match &config.backend {
            BackendConfig::Memory => Arc::new(MemoryStore::new()),
            BackendConfig::Journal {
                path,
                sync_interval,
            } => Arc::new(JournaledStore::open_with_sync_interval(path, *sync_interval)?),
            #[cfg(feature = "redis")]
            BackendConfig::Redis { url } => Arc::new(crate::adapter::RedisStore::connect(url)?),
        };

        if config.flush_on_open {
            store.flush_all()?;
        }

        tracing::info!(
            backend = ?config.backend,
            flushed = config.flush_on_open,
            "opened cache"
        );

        Ok(Self::with_store(store))
    }

    /// Build a cache over an already opened store. The store is not flushed.
    pub fn with_store(store: Arc<dyn StoreAdapter>) -> Self {
        let target = StoreValue {
            store: Arc::clone(&store),
        };
        let store_op = instrument(target, STORE_IDENTITY, Arc::clone(&store));
        Self { store, store_op }
    }

    /// Cache over a fresh in-memory store.
    pub fn new_in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Shared handle to the underlying store.
    pub fn adapter(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    /// Store a value under a fresh random key and return the key.
    pub fn store(&self, value: impl Into<Value>) -> Result<CacheKey> {
        self.store_op.invoke((value.into(),))
    }

    /// Store a dynamically typed value. Anything but a string or number is
    /// rejected before the store is touched.
    pub fn store_json(&self, value: &serde_json::Value) -> Result<CacheKey> {
        let value = Value::from_json(value)?;
        self.store(value)
    }

    /// Raw stored bytes, or `None` if nothing is stored under `key`.
    pub fn get(&self, key: impl AsRef<str>) -> Result<Option<Vec<u8>>> {
        self.store.get(key.as_ref())
    }

    /// Stored bytes passed through `transform`. `None` if absent.
    pub fn get_with<T, F>(&self, key: impl AsRef<str>, transform: F) -> Result<Option<T>>
    where
        F: FnOnce(Vec<u8>) -> Result<T>,
    {
        match self.get(key)? {
            Some(raw) => transform(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Stored value decoded as an integer.
    pub fn get_int(&self, key: impl AsRef<str>) -> Result<i64> {
        let key = key.as_ref();
        self.get_with(key, |raw| {
            std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| CacheError::Coercion {
                    key: key.to_string(),
                    target: "int",
                })
        })?
        .ok_or_else(|| CacheError::ValueAbsent(key.to_string()))
    }

    /// Stored value decoded as UTF-8 text.
    pub fn get_str(&self, key: impl AsRef<str>) -> Result<String> {
        let key = key.as_ref();
        self.get_with(key, |raw| {
            String::from_utf8(raw).map_err(|_| CacheError::Coercion {
                key: key.to_string(),
                target: "str",
            })
        })?
        .ok_or_else(|| CacheError::ValueAbsent(key.to_string()))
    }

    /// Number of recorded calls for `identity`.
    pub fn call_count(&self, identity: &OperationId) -> Result<i64> {
        call_count(self.store.as_ref(), identity)
    }

    /// Recorded call history for `identity`.
    pub fn replay(&self, identity: &OperationId) -> Result<ReplayReport> {
        replay(self.store.as_ref(), identity)
    }

    /// Make pending writes durable and release this handle.
    pub fn close(self) -> Result<()> {
        self.store.sync()?;
        tracing::info!("closed cache");
        Ok(())
    }
}
