//! In-process store with Redis command semantics.

use super::{resolve_range, StoreAdapter};
use crate::error::{CacheError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Value held under a key.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Entry {
    Plain(Vec<u8>),
    List(Vec<Vec<u8>>),
}

/// In-memory key-value store.
///
/// Each command holds the map lock for its whole duration, which gives
/// the same per-command atomicity a Redis server does.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Value `INCR key` would produce, without applying it.
    pub(crate) fn peek_incr(&self, key: &str) -> Result<i64> {
        next_counter(&self.entries.read(), key)
    }

    /// Fail with `WrongType` if `RPUSH key` would be rejected.
    pub(crate) fn check_list(&self, key: &str) -> Result<()> {
        match self.entries.read().get(key) {
            Some(Entry::Plain(_)) => Err(CacheError::WrongType(key.to_string())),
            _ => Ok(()),
        }
    }

    /// All entries, sorted by key.
    pub(crate) fn snapshot(&self) -> Vec<(String, Entry)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

fn parse_counter(key: &str, raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))
}

fn next_counter(entries: &HashMap<String, Entry>, key: &str) -> Result<i64> {
    let current = match entries.get(key) {
        None => 0,
        Some(Entry::Plain(raw)) => parse_counter(key, raw)?,
        Some(Entry::List(_)) => return Err(CacheError::WrongType(key.to_string())),
    };

    current
        .checked_add(1)
        .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))
}

impl StoreAdapter for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), Entry::Plain(value.to_vec()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.read().get(key) {
            None => Ok(None),
            Some(Entry::Plain(value)) => Ok(Some(value.clone())),
            Some(Entry::List(_)) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.write();
        let next = next_counter(&entries, key)?;
        entries.insert(key.to_string(), Entry::Plain(next.to_string().into_bytes()));

        Ok(next)
    }

    fn rpush(&self, key: &str, value: &[u8]) -> Result<usize> {
        let mut entries = self.entries.write();
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()))
        {
            Entry::List(items) => {
                items.push(value.to_vec());
                Ok(items.len())
            }
            Entry::Plain(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        match self.entries.read().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(items)) => Ok(match resolve_range(items.len(), start, stop) {
                Some((from, to)) => items[from..=to].to_vec(),
                None => Vec::new(),
            }),
            Some(Entry::Plain(_)) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn flush_all(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}
