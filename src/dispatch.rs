//! Concurrent fan-out of per-model operations
//!
//! Every target is dispatched at once and the batch waits for all of them to
//! settle. One failing target never cancels or short-circuits its siblings.

use crate::error::{FleetError, FleetResult};
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// A target whose operation failed, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: String,
    pub error: FleetError,
}

/// Aggregated result of a fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
    /// Targets the gateway no longer knew about; treated as no-ops
    pub skipped: Vec<String>,
}

impl BulkOutcome {
    /// True only if no target failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.id.as_str())
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    /// One-line operator summary naming every failed target
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        );
        if !self.skipped.is_empty() {
            line.push_str(&format!(", {} already gone", self.skipped.len()));
        }
        if !self.failed.is_empty() {
            let detail: Vec<String> = self
                .failed
                .iter()
                .map(|f| format!("{} ({})", f.id, f.error))
                .collect();
            line.push_str(": ");
            line.push_str(&detail.join("; "));
        }
        line
    }
}

enum Settled {
    Done,
    Gone,
    Failed(FleetError),
}

/// Run `op` for every id concurrently and wait for all of them to settle
///
/// Each call is bounded by `timeout`; an expired call counts as a failure for
/// that id only. Duplicate ids are dispatched once. A `NotFound` error means
/// the target is already gone and is reported under `skipped`.
pub async fn dispatch_all<I, S, F, Fut>(
    ids: I,
    timeout: Duration,
    op: F,
) -> FleetResult<BulkOutcome>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = FleetResult<()>>,
{
    let mut seen = HashSet::new();
    let ids: Vec<String> = ids
        .into_iter()
        .map(Into::into)
        .filter(|id| seen.insert(id.clone()))
        .collect();

    if ids.is_empty() {
        return Err(FleetError::EmptyBatch);
    }

    let calls = ids.iter().map(|id| {
        let call = op(id.clone());
        async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(())) => Settled::Done,
                Ok(Err(e)) if e.is_not_found() => Settled::Gone,
                Ok(Err(e)) => Settled::Failed(e),
                Err(_) => Settled::Failed(FleetError::Timeout {
                    secs: timeout.as_secs(),
                }),
            }
        }
    });

    let settled = join_all(calls).await;

    let mut outcome = BulkOutcome::default();
    for (id, result) in ids.into_iter().zip(settled) {
        match result {
            Settled::Done => outcome.succeeded.push(id),
            Settled::Gone => {
                tracing::debug!(model_id = %id, "Bulk target already gone");
                outcome.skipped.push(id);
            }
            Settled::Failed(error) => {
                tracing::warn!(model_id = %id, error = %error, "Bulk target failed");
                outcome.failed.push(BulkFailure { id, error });
            }
        }
    }

    Ok(outcome)
}
