//! Call instrumentation.
//!
//! An [`Operation`] is anything callable with a positional argument tuple
//! that returns a `Result`. Two wrappers add side effects in the store
//! without touching the wrapped operation:
//! - [`Counted`]: `INCR <identity>` before every call
//! - [`Recorded`]: `RPUSH <identity>:inputs` before and
//!   `RPUSH <identity>:outputs` after every call
//!
//! [`instrument`] applies both, counting outermost. The sequence of store
//! commands for one call is not atomic; concurrent callers of the same
//! identity may interleave their history entries.
//!
//! # Example
//!
//! ```ignore
//! let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
//! let id = OperationId::new("math.double")?;
//! let double = instrument(from_fn(|(x,): (i64,)| Ok(x * 2)), id.clone(), store.clone());
//!
//! assert_eq!(double.invoke((21,))?, 42);
//! assert_eq!(call_count(store.as_ref(), &id)?, 1);
//! ```

mod counter;
mod history;

pub use counter::{call_count, count_calls, Counted};
pub use history::{record_history, Recorded};

use crate::adapter::StoreAdapter;
use crate::error::Result;
use crate::types::OperationId;
use std::sync::Arc;

/// A callable unit of work taking a positional argument tuple.
pub trait Operation<Args> {
    type Output;

    fn invoke(&self, args: Args) -> Result<Self::Output>;
}

/// Operation backed by a closure.
#[derive(Clone)]
pub struct FnOperation<F>(F);

/// Turn a closure over an argument tuple into an [`Operation`].
pub fn from_fn<Args, T, F>(f: F) -> FnOperation<F>
where
    F: Fn(Args) -> Result<T>,
{
    FnOperation(f)
}

impl<Args, T, F> Operation<Args> for FnOperation<F>
where
    F: Fn(Args) -> Result<T>,
{
    type Output = T;

    fn invoke(&self, args: Args) -> Result<T> {
        (self.0)(args)
    }
}

/// An operation with both call counting and call history.
pub type Instrumented<O> = Counted<Recorded<O>>;

/// Wrap `operation` so each call is counted and recorded under `identity`.
///
/// Per call: increment counter, append input, run target, append output.
pub fn instrument<O>(
    operation: O,
    identity: OperationId,
    store: Arc<dyn StoreAdapter>,
) -> Instrumented<O> {
    count_calls(
        record_history(operation, identity.clone(), Arc::clone(&store)),
        identity,
        store,
    )
}

/// Method-style access to the two wrappers.
pub trait OperationExt: Sized {
    fn counted(self, identity: OperationId, store: Arc<dyn StoreAdapter>) -> Counted<Self> {
        count_calls(self, identity, store)
    }

    fn recorded(self, identity: OperationId, store: Arc<dyn StoreAdapter>) -> Recorded<Self> {
        record_history(self, identity, store)
    }
}

impl<T> OperationExt for T {}
