// SPDX-License-Identifier: MIT

//! Concurrent fan-out shared by the map-reduce and multi-agent flows

use futures::stream::{FuturesUnordered, StreamExt};

use crate::engine::{FlowError, Node, Store};

/// Run every `(node, store)` job on its own task.
///
/// Results come back in job order regardless of completion order. The first
/// failure observed is returned together with its job index; jobs still in
/// flight keep running to completion but their results are dropped.
pub(crate) async fn fan_out(jobs: Vec<(Node, Store)>) -> Result<Vec<Store>, (usize, FlowError)> {
    let total = jobs.len();
    let mut in_flight: FuturesUnordered<_> = jobs
        .into_iter()
        .enumerate()
        .map(|(index, (node, store))| {
            let name = node.name().to_string();
            let handle = tokio::spawn(async move { node.process(store).await });
            async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(FlowError::node_failure(name, join_err)),
                };
                (index, result)
            }
        })
        .collect();

    let mut results: Vec<Option<Store>> = vec![None; total];
    while let Some((index, result)) = in_flight.next().await {
        match result {
            Ok(store) => results[index] = Some(store),
            Err(err) => return Err((index, err)),
        }
    }

    Ok(results.into_iter().map(Option::unwrap_or_default).collect())
}
