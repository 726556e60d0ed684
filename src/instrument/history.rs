//! Call history wrapper.

use super::Operation;
use crate::adapter::StoreAdapter;
use crate::error::Result;
use crate::types::{OperationId, Render, RenderArgs};
use std::sync::Arc;

/// Operation wrapper that appends rendered arguments and results to the
/// identity's input and output lists.
///
/// For a single sequential caller the n-th input and n-th output belong
/// to the same call. A call whose target fails leaves an input without a
/// matching output, and concurrent callers can interleave entries.
pub struct Recorded<O> {
    inner: O,
    identity: OperationId,
    inputs_key: String,
    outputs_key: String,
    store: Arc<dyn StoreAdapter>,
}

/// Wrap `inner` so each call is recorded under `identity`.
pub fn record_history<O>(
    inner: O,
    identity: OperationId,
    store: Arc<dyn StoreAdapter>,
) -> Recorded<O> {
    Recorded {
        inputs_key: identity.inputs_key(),
        outputs_key: identity.outputs_key(),
        inner,
        identity,
        store,
    }
}

impl<O> Recorded<O> {
    pub fn identity(&self) -> &OperationId {
        &self.identity
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<Args, O> Operation<Args> for Recorded<O>
where
    Args: RenderArgs,
    O: Operation<Args>,
    O::Output: Render,
{
    type Output = O::Output;

    fn invoke(&self, args: Args) -> Result<O::Output> {
        let input = args.render_args();
        self.store.rpush(&self.inputs_key, input.as_bytes())?;

        let output = match self.inner.invoke(args) {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(operation = %self.identity, error = %e, "recorded call failed");
                return Err(e);
            }
        };

        let rendered = output.render();
        self.store.rpush(&self.outputs_key, rendered.as_bytes())?;
        tracing::debug!(operation = %self.identity, %input, output = %rendered, "recorded call");

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryStore;
    use crate::instrument::from_fn;
    use crate::types::Value;

    fn entries(store: &dyn StoreAdapter, key: &str) -> Vec<String> {
        store
            .lrange(key, 0, -1)
            .unwrap()
            .into_iter()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .collect()
    }

    #[test]
    fn test_sequential_history_is_paired() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let id = OperationId::new("letter").unwrap();
        let letter = record_history(
            from_fn(|(n,): (i64,)| Ok(((b'a' + n as u8 - 1) as char).to_string())),
            id.clone(),
            store.clone(),
        );

        for n in 1..=3 {
            letter.invoke((n,)).unwrap();
        }

        assert_eq!(entries(store.as_ref(), &id.inputs_key()), vec!["(1,)", "(2,)", "(3,)"]);
        assert_eq!(entries(store.as_ref(), &id.outputs_key()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_result_returned_unrendered() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let id = OperationId::new("echo").unwrap();
        let echo = record_history(from_fn(|(v,): (Value,)| Ok(v)), id.clone(), store.clone());

        let out = echo.invoke((Value::Bytes(vec![0, 1]),)).unwrap();
        assert_eq!(out, Value::Bytes(vec![0, 1]));
        assert_eq!(entries(store.as_ref(), &id.inputs_key()), vec!["(b'\\x00\\x01',)"]);
        assert_eq!(entries(store.as_ref(), &id.outputs_key()), vec!["b'\\x00\\x01'"]);
    }

    #[test]
    fn test_failed_input_append_skips_target() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let id = OperationId::new("blocked").unwrap();
        // A plain value under the list key makes RPUSH fail.
        store.set(&id.inputs_key(), b"not a list").unwrap();

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_in = Arc::clone(&ran);
        let op = record_history(
            from_fn(move |(): ()| {
                ran_in.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }),
            id,
            store,
        );

        assert!(op.invoke(()).is_err());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
