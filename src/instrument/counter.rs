//! Call counting wrapper.

use super::Operation;
use crate::adapter::StoreAdapter;
use crate::error::{CacheError, Result};
use crate::types::OperationId;
use std::sync::Arc;

/// Operation wrapper that increments a persistent call counter.
pub struct Counted<O> {
    inner: O,
    identity: OperationId,
    store: Arc<dyn StoreAdapter>,
}

/// Wrap `inner` so each call first runs `INCR <identity>`.
///
/// If the increment fails the call fails and `inner` never runs.
pub fn count_calls<O>(inner: O, identity: OperationId, store: Arc<dyn StoreAdapter>) -> Counted<O> {
    Counted {
        inner,
        identity,
        store,
    }
}

impl<O> Counted<O> {
    pub fn identity(&self) -> &OperationId {
        &self.identity
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<Args, O> Operation<Args> for Counted<O>
where
    O: Operation<Args>,
{
    type Output = O::Output;

    fn invoke(&self, args: Args) -> Result<O::Output> {
        let count = self.store.incr(self.identity.counter_key())?;
        tracing::debug!(operation = %self.identity, count, "counted call");
        self.inner.invoke(args)
    }
}

/// Read the call counter for `identity`. A counter never incremented is 0.
pub fn call_count(store: &dyn StoreAdapter, identity: &OperationId) -> Result<i64> {
    match store.get(identity.counter_key())? {
        None => Ok(0),
        Some(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| CacheError::NotAnInteger(identity.counter_key().to_string())),
    }
}
