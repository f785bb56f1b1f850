//! Concurrent fleet fan-out engine.
//!
//! Dispatches a tool handler against one concrete cluster or, for the `all`
//! sentinel, against every configured cluster at once — one task per
//! cluster, bounded parallelism equal to the fleet size, each cluster
//! isolated so one failure never aborts the others. Generalizes a
//! single-cluster runner (which only ever drives one client) into a
//! multi-cluster scheduler built on `futures::future::join_all`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::config::ClusterConfig;
use crate::domain::ToolError;

/// Cooperative cancellation flag shared between the MCP transport loop and
/// whatever fan-out dispatch is currently in flight. Checked at each
/// cluster task's entry point, before any client call is made for that
/// cluster, so a `notifications/cancelled` observed between dispatch start
/// and a given cluster task's first poll stops that cluster's work rather
/// than running it to completion.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the in-flight call (if any) cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag before starting a new top-level tool call, so a stale
    /// cancellation from a previous (already-finished) call never blocks
    /// this one.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One cluster's outcome from a fan-out dispatch: either a payload to merge,
/// or a `ToolError` recording why this cluster's handler failed.
pub enum ClusterOutcome<T> {
    Ok(T),
    Err(ToolError),
}

/// Run `handler` against every cluster in `targets` concurrently and collect
/// each cluster's outcome. The merged result preserves no particular
/// ordering from execution; callers sort by cluster ID before returning.
///
/// `handler` must not panic across the task boundary — any fallible step
/// should be folded into `ClusterOutcome::Err` before returning. Bounded
/// parallelism falls out naturally here: the fleet has at most eight
/// clusters, so spawning one task per target never needs an explicit
/// semaphore.
pub async fn dispatch<'a, T, F, Fut>(
    targets: Vec<&'a ClusterConfig>,
    cancellation: &CancellationToken,
    handler: F,
) -> Vec<(String, ClusterOutcome<T>)>
where
    T: Send + 'static,
    F: Fn(&'a ClusterConfig) -> Fut,
    Fut: std::future::Future<Output = ClusterOutcome<T>> + Send + 'a,
{
    let futures = targets.into_iter().map(|cluster| {
        let cluster_id = cluster.cluster_id.clone();
        let cancellation = cancellation.clone();
        async move {
            if cancellation.is_cancelled() {
                return (
                    cluster_id.clone(),
                    ClusterOutcome::Err(ToolError::new("cancelled", cluster_id, "cancelled by client")),
                );
            }
            (cluster_id, handler(cluster).await)
        }
    });
    let mut results = join_all(futures).await;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Split a fan-out result set into merged payloads and collected errors,
/// preserving the stable cluster-ID ordering `dispatch` already applied.
pub fn split<T>(results: Vec<(String, ClusterOutcome<T>)>) -> (Vec<T>, Vec<ToolError>) {
    let mut payloads = Vec::new();
    let mut errors = Vec::new();
    for (_, outcome) in results {
        match outcome {
            ClusterOutcome::Ok(payload) => payloads.push(payload),
            ClusterOutcome::Err(err) => errors.push(err),
        }
    }
    (payloads, errors)
}
