//! Store adapter for a Redis server.

use super::StoreAdapter;
use crate::error::{CacheError, Result};
use parking_lot::Mutex;
use redis::{Client, Commands, Connection, RedisError};

/// Redis-backed store over a single blocking connection.
///
/// No timeouts are configured: a hung server hangs the caller.
pub struct RedisStore {
    connection: Mutex<Connection>,
}

impl RedisStore {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1/`).
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        let connection = client
            .get_connection()
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        tracing::info!(url, "connected to redis");

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

fn map_error(key: &str, e: RedisError) -> CacheError {
    match e.code() {
        Some("WRONGTYPE") => CacheError::WrongType(key.to_string()),
        Some("ERR") if e.to_string().contains("not an integer") => {
            CacheError::NotAnInteger(key.to_string())
        }
        _ => CacheError::StoreUnavailable(e.to_string()),
    }
}

impl StoreAdapter for RedisStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.connection
            .lock()
            .set::<_, _, ()>(key, value)
            .map_err(|e| map_error(key, e))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.connection
            .lock()
            .get::<_, Option<Vec<u8>>>(key)
            .map_err(|e| map_error(key, e))
    }

    fn incr(&self, key: &str) -> Result<i64> {
        self.connection
            .lock()
            .incr::<_, _, i64>(key, 1)
            .map_err(|e| map_error(key, e))
    }

    fn rpush(&self, key: &str, value: &[u8]) -> Result<usize> {
        self.connection
            .lock()
            .rpush::<_, _, usize>(key, value)
            .map_err(|e| map_error(key, e))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        self.connection
            .lock()
            .lrange::<_, Vec<Vec<u8>>>(key, start as isize, stop as isize)
            .map_err(|e| map_error(key, e))
    }

    fn flush_all(&self) -> Result<()> {
        let mut connection = self.connection.lock();
        redis::cmd("FLUSHDB")
            .query::<()>(&mut *connection)
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }
}
