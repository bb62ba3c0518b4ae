// SPDX-License-Identifier: MIT

//! MultiAgent - run several nodes concurrently on copies of one store and
//! merge what they wrote

use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use super::fanout::fan_out;
use crate::engine::{FlowError, MergeStrategy, Node, NodeError, NodeResult, Process, Store};

/// Concurrent fan-out of nodes over one logical store.
///
/// Every node receives its own copy of the input store. The result starts
/// empty and every key of every output is copied into it in declaration
/// order, so when two nodes hold the same key the later-declared node wins.
/// Keys registered with [`MultiAgent::with_strategy`] are combined with that
/// strategy instead.
pub struct MultiAgent {
    nodes: Vec<Node>,
    strategies: HashMap<String, MergeStrategy>,
    cancel: CancellationToken,
}

impl MultiAgent {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            strategies: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Combine concurrent writes to `key` with `strategy` instead of overwriting
    pub fn with_strategy(mut self, key: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.strategies.insert(key.into(), strategy);
        self
    }

    /// Stop before the fan-out once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Run every node concurrently and merge their outputs
    pub async fn call(&self, store: Store) -> Result<Store, FlowError> {
        if self.nodes.is_empty() {
            log::warn!("MultiAgent has no nodes, returning input");
            return Ok(store);
        }
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        log::info!("MultiAgent: fanning out to {} nodes", self.nodes.len());
        let jobs = self
            .nodes
            .iter()
            .map(|node| (node.clone(), store.clone()))
            .collect();
        let outputs = fan_out(jobs).await.map_err(|(index, err)| {
            let node = self.nodes[index].name().to_string();
            log::error!("MultiAgent: node {} ({}) failed: {}", index, node, err);
            FlowError::BranchFailed {
                index,
                node,
                source: Box::new(err),
            }
        })?;

        Ok(self.merge(outputs))
    }

    /// Fold every output into one store, in declaration order
    fn merge(&self, outputs: Vec<Store>) -> Store {
        let mut merged = Store::new();

        for (node, output) in self.nodes.iter().zip(outputs) {
            log::debug!("MultiAgent: merging {} keys from {}", output.len(), node.name());
            for (key, value) in output {
                match self.strategies.get(&key) {
                    Some(&strategy) => merged.update_with(&key, value, strategy),
                    None => {
                        merged.insert(key, value);
                    }
                }
            }
        }

        merged
    }
}

#[async_trait]
impl Process for MultiAgent {
    async fn process(&self, store: Store) -> NodeResult {
        self.call(store).await.map_err(NodeError::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Node writing `key = value` after `delay_ms`
    fn writer(key: &'static str, value: Value, delay_ms: u64) -> Node {
        Node::from_fn(move |mut store: Store| {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                store.insert(key, value);
                Ok(store)
            }
        })
        .named(key)
    }

    #[tokio::test]
    async fn test_later_declared_node_wins() {
        // n2 finishes first; declaration order still decides
        let n1 = writer("k", json!("A"), 40);
        let n2 = Node::from_fn(|mut store: Store| async move {
            store.insert("k", "B");
            store.insert("only_n2", 2);
            Ok(store)
        });

        let out = MultiAgent::new(vec![n1, n2]).call(Store::new()).await.unwrap();
        assert_eq!(out.get("k"), Some(&json!("B")));
        assert_eq!(out.get("only_n2"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_artifacts_are_merged() {
        let agents = MultiAgent::new(vec![
            writer("typescript", json!("class Game {}"), 10),
            writer("html", json!("<canvas></canvas>"), 0),
            writer("tailwindcss", json!(".ship {}"), 5),
        ]);
        assert_eq!(agents.len(), 3);

        let out = agents.call(Store::new()).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get_str("html"), Some("<canvas></canvas>"));
    }

    #[tokio::test]
    async fn test_nodes_do_not_see_each_other() {
        let n1 = writer("first", json!(1), 0);
        let n2 = Node::from_fn(|mut store: Store| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let saw_first = store.contains_key("first");
            store.insert("saw_first", saw_first);
            Ok(store)
        });

        let out = MultiAgent::new(vec![n1, n2]).call(Store::new()).await.unwrap();
        assert_eq!(out.get("saw_first"), Some(&json!(false)));
        assert_eq!(out.get("first"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_later_declared_wins_over_seeded_key() {
        // n2 writes the value the input already holds; it still wins
        let mut input = Store::new();
        input.insert("k", "B");

        let n1 = writer("k", json!("A"), 0);
        let n2 = writer("k", json!("B"), 10);

        let out = MultiAgent::new(vec![n1, n2]).call(input).await.unwrap();
        assert_eq!(out.get("k"), Some(&json!("B")));
    }

    #[tokio::test]
    async fn test_untouched_later_copy_keeps_input_value() {
        let mut input = Store::new();
        input.insert("x", 1);

        let bump = writer("x", json!(2), 0);
        let idle = Node::from_fn(|store: Store| async move { Ok(store) });

        let out = MultiAgent::new(vec![bump.clone(), idle.clone()])
            .call(input.clone())
            .await
            .unwrap();
        assert_eq!(out.get("x"), Some(&json!(1)));

        let out = MultiAgent::new(vec![idle, bump]).call(input).await.unwrap();
        assert_eq!(out.get("x"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_key_removed_by_one_node_survives_in_another() {
        let mut input = Store::new();
        input.insert("ctx", "shared");

        let cleanup = Node::from_fn(|mut store: Store| async move {
            store.remove("ctx");
            Ok(store)
        });
        let idle = Node::from_fn(|store: Store| async move { Ok(store) });

        let out = MultiAgent::new(vec![cleanup, idle]).call(input).await.unwrap();
        assert_eq!(out.get_str("ctx"), Some("shared"));
    }

    #[tokio::test]
    async fn test_key_removed_by_every_node_is_gone() {
        let mut input = Store::new();
        input.insert("draft", "v0");

        let cleanup = Node::from_fn(|mut store: Store| async move {
            store.remove("draft");
            store.insert("done", true);
            Ok(store)
        });

        let out = MultiAgent::new(vec![cleanup.clone(), cleanup])
            .call(input)
            .await
            .unwrap();
        assert!(!out.contains_key("draft"));
        assert_eq!(out.get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_append_strategy() {
        let agents = MultiAgent::new(vec![
            writer("notes", json!("from a"), 20),
            writer("notes", json!("from b"), 0),
        ])
        .with_strategy("notes", MergeStrategy::Append);

        let out = agents.call(Store::new()).await.unwrap();
        assert_eq!(out.get("notes"), Some(&json!(["from a", "from b"])));
    }

    #[tokio::test]
    async fn test_failure_surfaces_and_in_flight_nodes_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let slow = Node::from_fn(move |store: Store| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(store)
            }
        });
        let broken =
            Node::from_fn(|_: Store| async { Err("html agent crashed".into()) }).named("html");

        match MultiAgent::new(vec![slow, broken]).call(Store::new()).await {
            Err(FlowError::BranchFailed { index, node, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(node, "html");
            }
            other => panic!("Expected BranchFailed, got {:?}", other),
        }

        // The slow node was not cancelled
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_nodes_returns_input() {
        let mut input = Store::new();
        input.insert("k", "v");
        let out = MultiAgent::new(vec![]).call(input.clone()).await.unwrap();
        assert_eq!(out, input);
    }
}
