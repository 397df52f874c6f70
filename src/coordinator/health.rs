//! Fleet health probe
//!
//! A node that answers with a bad state only adds a reason. A node that
//! cannot be reached aborts the whole probe.

use crate::cluster::{Cluster, StateCode};
use crate::common::{Error, Result, UniqueId};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Probe every node, at most `parallelism` at a time. Returns the reasons of
/// unhealthy nodes, ordered by node id.
pub async fn check_node_health(
    cluster: Arc<dyn Cluster>,
    nodes: Vec<UniqueId>,
    parallelism: usize,
) -> Result<Vec<String>> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut probes = JoinSet::new();
    for node in nodes {
        let cluster = cluster.clone();
        let semaphore = semaphore.clone();
        probes.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            let states = cluster
                .get_component_states(node)
                .await
                .map_err(|e| e.wrap(format!("failed to get component states of QueryNode={}", node)))?;
            Ok::<_, Error>((node, analyze_state(node, states.state, &states.status.reason, states.status.is_success())))
        });
    }

    let mut reasons = Vec::new();
    while let Some(joined) = probes.join_next().await {
        let outcome = joined.map_err(|e| Error::Internal(format!("health probe aborted: {}", e)));
        match outcome.and_then(|r| r) {
            Ok((node, Some(reason))) => reasons.push((node, reason)),
            Ok((_, None)) => {}
            Err(e) => {
                probes.abort_all();
                return Err(e);
            }
        }
    }
    reasons.sort_by_key(|(node, _)| *node);
    Ok(reasons.into_iter().map(|(_, reason)| reason).collect())
}

fn analyze_state(node: UniqueId, state: StateCode, reason: &str, success: bool) -> Option<String> {
    if !success {
        return Some(format!("QueryNode={} not healthy: {}", node, reason));
    }
    if state != StateCode::Healthy {
        return Some(format!("QueryNode={} not healthy: state={}", node, state));
    }
    None
}
