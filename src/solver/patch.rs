//! Optimistic concurrency for shared objects.
//!
//! A shared Ingress or HTTPRoute may be written by its owner and by any
//! number of concurrent challenges. Each attempt reads the object, computes
//! the desired `spec` change from that fresh copy, and patches with the read
//! `resourceVersion` as a precondition. A conflict means someone else wrote
//! first; the attempt is recomputed from a new read.

use crate::observability::metrics;
use crate::solver::SolverError;
use crate::store::{ClusterStore, StoreError, StoreObject};
use serde_json::{json, Value};
use tracing::debug;

/// Result of a read-compute-patch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PatchOutcome {
    /// The object already had the desired content
    Unchanged,
    Patched,
    /// The object does not exist (or vanished between read and write)
    Missing,
}

/// Read `namespace/name`, let `compute` derive a merge patch from the fresh
/// copy (`None` when nothing needs to change), and apply it with the read
/// `resourceVersion` as precondition. Conflicts are retried up to `limit`
/// attempts in total.
pub(crate) async fn patch_with_retry<S, K, F>(
    store: &S,
    namespace: &str,
    name: &str,
    limit: u32,
    mut compute: F,
) -> Result<PatchOutcome, SolverError>
where
    S: ClusterStore,
    K: StoreObject,
    F: FnMut(&K) -> Option<Value> + Send,
{
    let kind = K::kind(&());
    let attempts = limit.max(1);
    for attempt in 1..=attempts {
        let Some(current) = store.get::<K>(namespace, name).await? else {
            return Ok(PatchOutcome::Missing);
        };
        let Some(mut body) = compute(&current) else {
            return Ok(PatchOutcome::Unchanged);
        };
        with_precondition(&mut body, current.meta().resource_version.as_deref());

        match store.patch::<K>(namespace, name, &body).await {
            Ok(_) => return Ok(PatchOutcome::Patched),
            Err(StoreError::Conflict { .. }) => {
                metrics::increment_merge_conflicts_retried(&kind);
                debug!(
                    "conflict patching {} {}/{} (attempt {}/{}), re-reading",
                    kind, namespace, name, attempt, attempts
                );
            }
            Err(StoreError::NotFound { .. }) => return Ok(PatchOutcome::Missing),
            Err(e) => return Err(e.into()),
        }
    }

    Err(SolverError::ConflictRetriesExhausted {
        kind: kind.into_owned(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        attempts,
    })
}

fn with_precondition(body: &mut Value, resource_version: Option<&str>) {
    let Some(resource_version) = resource_version else {
        return;
    };
    if !body.is_object() {
        *body = json!({});
    }
    body["metadata"]["resourceVersion"] = json!(resource_version);
}
