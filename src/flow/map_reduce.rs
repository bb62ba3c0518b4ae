// SPDX-License-Identifier: MIT

//! MapReduce - fan a map node out over independent stores, then fold the
//! ordered results with a reduce node

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::fanout::fan_out;
use crate::engine::{FlowError, Node, NodeError, NodeResult, Process, Store};

pub struct MapReduce {
    map: Node,
    reduce: Node<Vec<Store>>,
    cancel: CancellationToken,
}

impl MapReduce {
    pub fn new(map: Node, reduce: Node<Vec<Store>>) -> Self {
        Self {
            map,
            reduce,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop before the map fan-out or before the reduce once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Map every store concurrently, then reduce the results in input order.
    ///
    /// All or nothing: if any map invocation fails the reduce node is never
    /// invoked.
    pub async fn call(&self, stores: Vec<Store>) -> Result<Store, FlowError> {
        if stores.is_empty() {
            return Err(FlowError::EmptyInput);
        }
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        log::info!(
            "MapReduce: mapping {} over {} stores",
            self.map.name(),
            stores.len()
        );
        let jobs = stores
            .into_iter()
            .map(|store| (self.map.clone(), store))
            .collect();
        let mapped = fan_out(jobs).await.map_err(|(index, err)| {
            log::error!("MapReduce: map over input {} failed: {}", index, err);
            FlowError::MapFailed {
                index,
                source: Box::new(err),
            }
        })?;

        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        log::info!(
            "MapReduce: reducing {} results with {}",
            mapped.len(),
            self.reduce.name()
        );
        self.reduce.process(mapped).await
    }
}

#[async_trait]
impl Process<Vec<Store>> for MapReduce {
    async fn process(&self, stores: Vec<Store>) -> NodeResult {
        self.call(stores).await.map_err(NodeError::new)
    }
}
