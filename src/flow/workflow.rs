// SPDX-License-Identifier: MIT

//! Workflow - named steps executed in the topological order of their edges
//!
//! The store is threaded along edges: a step receives the output of its
//! predecessor that ran last, roots receive the initial store, and the run
//! returns the output of the last terminal step.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;

use crate::engine::{FlowError, Node, NodeError, NodeResult, Process, Store};

struct Step {
    name: String,
    node: Node,
}

/// DAG of named steps
pub struct Workflow {
    name: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    /// Outgoing edges per step, in the order they were connected
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    cancel: CancellationToken,
}

impl Workflow {
    pub fn new() -> Self {
        Self {
            name: "workflow".to_string(),
            steps: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Name used in logs
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stop between steps once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Register a step; names must be unique
    pub fn add_step(&mut self, name: impl Into<String>, node: Node) -> Result<(), FlowError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(FlowError::DuplicateStep(name));
        }

        self.index.insert(name.clone(), self.steps.len());
        self.steps.push(Step { name, node });
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        Ok(())
    }

    /// Add the edge `from -> to`.
    ///
    /// Fails if either step is unknown or if the edge would close a cycle;
    /// in both cases the graph is left unchanged.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), FlowError> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;

        if self.successors[from_idx].contains(&to_idx) {
            log::debug!("Workflow {}: edge {} -> {} already present", self.name, from, to);
            return Ok(());
        }

        if let Some(mut path) = self.path_between(to_idx, from_idx) {
            path.push(to_idx);
            return Err(FlowError::CycleDetected(self.names(&path)));
        }

        self.successors[from_idx].push(to_idx);
        self.predecessors[to_idx].push(from_idx);
        Ok(())
    }

    /// Step names in the order `run` executes them
    pub fn execution_order(&self) -> Result<Vec<&str>, FlowError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|i| self.steps[i].name.as_str())
            .collect())
    }

    /// Execute every step once, in topological order
    pub async fn run(&self, initial: Store) -> Result<Store, FlowError> {
        let order = self.topological_order()?;
        let Some(terminal) = order
            .iter()
            .rev()
            .copied()
            .find(|&i| self.successors[i].is_empty())
        else {
            log::warn!("Workflow {} has no steps, returning input", self.name);
            return Ok(initial);
        };

        let mut position = vec![0; self.steps.len()];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }

        // Each step is fed by the predecessor that runs last
        let feeder: Vec<Option<usize>> = self
            .predecessors
            .iter()
            .map(|preds| preds.iter().copied().max_by_key(|&p| position[p]))
            .collect();
        let mut pending = vec![0usize; self.steps.len()];
        let mut pending_roots = 0usize;
        for feed in &feeder {
            match feed {
                Some(p) => pending[*p] += 1,
                None => pending_roots += 1,
            }
        }

        log::info!(
            "Workflow {}: running {} steps {:?}",
            self.name,
            order.len(),
            self.names(&order)
        );

        let mut initial = Some(initial);
        let mut outputs: Vec<Option<Store>> = vec![None; self.steps.len()];

        for (pos, &i) in order.iter().enumerate() {
            let step = &self.steps[i];
            if self.cancel.is_cancelled() {
                log::info!("Workflow {} cancelled before step {}", self.name, step.name);
                return Err(FlowError::Cancelled);
            }

            let input = match feeder[i] {
                None => {
                    pending_roots -= 1;
                    take_or_clone(&mut initial, pending_roots == 0)
                }
                Some(p) => {
                    pending[p] -= 1;
                    take_or_clone(&mut outputs[p], pending[p] == 0)
                }
            };

            log::info!(
                "Workflow {}: step {} ({}/{})",
                self.name,
                step.name,
                pos + 1,
                order.len()
            );
            let output = step.node.process(input).await.map_err(|err| {
                log::error!("Workflow {}: step {} failed: {}", self.name, step.name, err);
                FlowError::step(step.name.clone(), err)
            })?;

            if pending[i] > 0 || i == terminal {
                outputs[i] = Some(output);
            }
        }

        Ok(outputs[terminal].take().unwrap_or_default())
    }

    /// Wrap this workflow as a node so it can be nested in other flows
    pub fn into_node(self) -> Node {
        let name = self.name.clone();
        Node::new(self).named(name)
    }

    fn lookup(&self, name: &str) -> Result<usize, FlowError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::UnknownStep(name.to_string()))
    }

    fn names(&self, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| self.steps[i].name.clone())
            .collect()
    }

    /// Kahn's algorithm; roots in insertion order, then FIFO
    fn topological_order(&self) -> Result<Vec<usize>, FlowError> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &self.successors[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.steps.len() {
            let stuck: Vec<usize> = (0..self.steps.len())
                .filter(|&i| in_degree[i] > 0)
                .collect();
            return Err(FlowError::CycleDetected(self.names(&stuck)));
        }

        Ok(order)
    }

    /// Depth-first search for a path `from -> ... -> to`
    fn path_between(&self, from: usize, to: usize) -> Option<Vec<usize>> {
        let mut visited = vec![false; self.steps.len()];
        let mut stack = vec![(from, 0usize)];
        visited[from] = true;

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if node == to {
                return Some(stack.iter().map(|&(n, _)| n).collect());
            }
            match self.successors[node].get(top.1).copied() {
                Some(child) => {
                    top.1 += 1;
                    if !visited[child] {
                        visited[child] = true;
                        stack.push((child, 0));
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
        None
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Process for Workflow {
    async fn process(&self, store: Store) -> NodeResult {
        self.run(store).await.map_err(NodeError::new)
    }
}

fn take_or_clone(slot: &mut Option<Store>, last_use: bool) -> Store {
    if last_use {
        slot.take().unwrap_or_default()
    } else {
        slot.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// Step that appends its name to the store's `trace` and the shared log
    fn tracing_step(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Node {
        Node::from_fn(move |mut store: Store| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name.to_string());
                store.update_with("trace", json!(name), crate::engine::MergeStrategy::Append);
                Ok(store)
            }
        })
        .named(name)
    }

    fn trace(store: &Store) -> Vec<&str> {
        store
            .get("trace")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn build(
        names: &[&'static str],
        edges: &[(&str, &str)],
    ) -> (Workflow, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut wf = Workflow::new();
        for name in names {
            wf.add_step(*name, tracing_step(*name, log.clone())).unwrap();
        }
        for (from, to) in edges {
            wf.connect(from, to).unwrap();
        }
        (wf, log)
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let (wf, log) = build(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);

        let out = wf.run(Store::new()).await.unwrap();
        assert_eq!(trace(&out), vec!["a", "b", "c"]);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_order_follows_edges_not_insertion() {
        let (wf, log) = build(
            &["review", "code", "research"],
            &[("research", "code"), ("code", "review")],
        );

        assert_eq!(
            wf.execution_order().unwrap(),
            vec!["research", "code", "review"]
        );
        let out = wf.run(Store::new()).await.unwrap();
        assert_eq!(trace(&out), vec!["research", "code", "review"]);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_roots_run_first_in_insertion_order() {
        let (wf, log) = build(&["x", "z", "y"], &[("x", "z")]);

        assert_eq!(wf.execution_order().unwrap(), vec!["x", "y", "z"]);
        wf.run(Store::new()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_diamond_threads_last_predecessor() {
        let (wf, _) = build(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        let out = wf.run(Store::new()).await.unwrap();
        // c receives a's output (not b's) and d receives c's output
        assert_eq!(trace(&out), vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_result_is_last_terminal_step() {
        let (wf, _) = build(&["a", "b", "c"], &[("a", "b"), ("a", "c")]);

        let out = wf.run(Store::new()).await.unwrap();
        assert_eq!(trace(&out), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_every_root_gets_initial_store() {
        let (wf, _) = build(&["a", "b"], &[]);
        let mut input = Store::new();
        input.insert("topic", "maple syrup");

        let out = wf.run(input).await.unwrap();
        assert_eq!(trace(&out), vec!["b"]);
        assert_eq!(out.get_str("topic"), Some("maple syrup"));
    }

    #[test]
    fn test_duplicate_step() {
        let mut wf = Workflow::new();
        wf.add_step("a", Node::from_fn(|s: Store| async { Ok(s) })).unwrap();

        let err = wf
            .add_step("a", Node::from_fn(|s: Store| async { Ok(s) }))
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateStep(name) if name == "a"));
        assert_eq!(wf.len(), 1);
    }

    #[test]
    fn test_unknown_step() {
        let (mut wf, _) = build(&["a"], &[]);

        assert!(matches!(wf.connect("a", "ghost"), Err(FlowError::UnknownStep(n)) if n == "ghost"));
        assert!(matches!(wf.connect("ghost", "a"), Err(FlowError::UnknownStep(n)) if n == "ghost"));
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_execution() {
        let (mut wf, log) = build(&["a", "b"], &[("a", "b")]);

        match wf.connect("b", "a") {
            Err(FlowError::CycleDetected(path)) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("Expected CycleDetected, got {:?}", other),
        }
        assert!(matches!(wf.connect("a", "a"), Err(FlowError::CycleDetected(_))));

        // The rejected edges were not added; the DAG still runs
        wf.run(Store::new()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_longer_cycle_path() {
        let (mut wf, _) = build(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        match wf.connect("c", "a") {
            Err(FlowError::CycleDetected(path)) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("Expected CycleDetected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeated_edge_is_ignored() {
        let (mut wf, log) = build(&["a", "b"], &[("a", "b")]);
        wf.connect("a", "b").unwrap();

        wf.run(Store::new()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failure_tagged_and_aborts() {
        let (mut wf, log) = build(&["a", "c"], &[]);
        wf.add_step(
            "b",
            Node::from_fn(|_: Store| async { Err("model refused".into()) }).named("coder"),
        )
        .unwrap();
        wf.connect("a", "b").unwrap();
        wf.connect("b", "c").unwrap();

        match wf.run(Store::new()).await {
            Err(FlowError::Step { step, source }) => {
                assert_eq!(step, "b");
                assert!(matches!(
                    *source,
                    FlowError::NodeFailure { ref node, .. } if node == "coder"
                ));
            }
            other => panic!("Expected Step failure, got {:?}", other),
        }
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_empty_workflow_returns_input() {
        let mut input = Store::new();
        input.insert("k", 1);
        let out = Workflow::new().run(input.clone()).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let token = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let canceller = token.clone();

        let mut wf = Workflow::new().with_cancellation(token);
        wf.add_step(
            "a",
            Node::from_fn(move |s: Store| {
                let canceller = canceller.clone();
                async move {
                    canceller.cancel();
                    Ok(s)
                }
            }),
        )
        .unwrap();
        wf.add_step("b", tracing_step("b", log.clone())).unwrap();
        wf.connect("a", "b").unwrap();

        assert!(matches!(wf.run(Store::new()).await, Err(FlowError::Cancelled)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nested_workflow() {
        let (inner, _) = build(&["inner_a", "inner_b"], &[("inner_a", "inner_b")]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut outer = Workflow::new().named("outer");
        outer.add_step("start", tracing_step("start", log.clone())).unwrap();
        outer.add_step("nested", inner.named("inner").into_node()).unwrap();
        outer.connect("start", "nested").unwrap();

        let out = outer.run(Store::new()).await.unwrap();
        assert_eq!(trace(&out), vec!["start", "inner_a", "inner_b"]);
    }
}
