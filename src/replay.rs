//! Reconstruct a readable call trace from recorded history.

use crate::adapter::StoreAdapter;
use crate::error::Result;
use crate::instrument::call_count;
use crate::types::{CallRecord, OperationId};
use std::fmt;

/// Recorded history of one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayReport {
    pub identity: OperationId,
    /// Value of the call counter (0 if never called).
    pub count: i64,
    /// Input/output pairs, oldest first.
    pub calls: Vec<CallRecord>,
}

impl ReplayReport {
    /// Header line followed by one line per call.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.calls.len() + 1);
        lines.push(format!("{} was called {} times:", self.identity, self.count));
        for call in &self.calls {
            lines.push(format!("{}(*{}) -> {}", self.identity, call.input, call.output));
        }
        lines
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            f.write_str(line)?;
        }
        Ok(())
    }
}

/// Read the counter and both history lists for `identity`.
///
/// Inputs and outputs are paired by position. If one list is longer
/// (failed calls, concurrent callers), the surplus is dropped.
pub fn replay(store: &dyn StoreAdapter, identity: &OperationId) -> Result<ReplayReport> {
    let count = call_count(store, identity)?;
    let inputs = store.lrange(&identity.inputs_key(), 0, -1)?;
    let outputs = store.lrange(&identity.outputs_key(), 0, -1)?;

    if inputs.len() != outputs.len() {
        tracing::warn!(
            operation = %identity,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "history lists differ in length, truncating to shorter"
        );
    }

    let calls = inputs
        .iter()
        .zip(outputs.iter())
        .map(|(input, output)| CallRecord {
            input: String::from_utf8_lossy(input).into_owned(),
            output: String::from_utf8_lossy(output).into_owned(),
        })
        .collect();

    Ok(ReplayReport {
        identity: identity.clone(),
        count,
        calls,
    })
}
