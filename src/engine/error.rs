// SPDX-License-Identifier: MIT

//! Typed error handling for agentflow-rs
//!
//! Node bodies fail with [`NodeError`]; everything the engine surfaces to a
//! caller is a [`FlowError`].

use std::fmt;
use thiserror::Error;

use super::store::Store;

/// Boxed error type carried as the cause of a node failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the orchestration layer
#[derive(Debug, Error)]
pub enum FlowError {
    /// A node body returned an error or panicked
    #[error("Node '{node}' failed: {source}")]
    NodeFailure {
        node: String,
        #[source]
        source: BoxError,
    },

    /// An agent's node failed on every attempt
    #[error("Exhausted {attempts} attempt(s): {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<FlowError>,
    },

    /// A step with this name is already registered
    #[error("Duplicate step: {0}")]
    DuplicateStep(String),

    /// A step name used in an edge is not registered
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// The edge set does not form a DAG
    #[error("Cycle detected: {0:?}")]
    CycleDetected(Vec<String>),

    /// MapReduce was invoked with no input stores
    #[error("MapReduce invoked with no input stores")]
    EmptyInput,

    /// A workflow step failed
    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<FlowError>,
    },

    /// A RAG stage failed
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<FlowError>,
    },

    /// A map invocation failed
    #[error("Map over input {index} failed: {source}")]
    MapFailed {
        index: usize,
        #[source]
        source: Box<FlowError>,
    },

    /// A multi-agent branch failed
    #[error("Branch {index} ('{node}') failed: {source}")]
    BranchFailed {
        index: usize,
        node: String,
        #[source]
        source: Box<FlowError>,
    },

    /// The run was cancelled between node invocations
    #[error("Run cancelled")]
    Cancelled,
}

impl FlowError {
    /// Create a node failure
    pub fn node_failure(node: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::NodeFailure {
            node: node.into(),
            source: source.into(),
        }
    }

    /// Tag an inner failure with the workflow step that produced it
    pub fn step(step: impl Into<String>, source: FlowError) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Tag an inner failure with a RAG stage name
    pub fn stage(stage: &'static str, source: FlowError) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Follow the tagging wrappers down to the innermost failure
    pub fn root(&self) -> &FlowError {
        match self {
            Self::ExhaustedRetries { source, .. }
            | Self::Step { source, .. }
            | Self::Stage { source, .. }
            | Self::MapFailed { source, .. }
            | Self::BranchFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Failure returned by a node body.
///
/// Any error convertible into [`BoxError`] converts into a `NodeError`, so
/// node bodies can use `?` freely. A body may also hand back the store it had
/// partially mutated; an [`Agent`](crate::flow::Agent) retries with that
/// store instead of the one the attempt started from.
pub struct NodeError {
    source: BoxError,
    store: Option<Store>,
}

impl NodeError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
            store: None,
        }
    }

    /// Fail while handing the partially mutated store back to the caller
    pub fn with_store(store: Store, source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
            store: Some(store),
        }
    }

    pub fn source(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    pub(crate) fn into_parts(self) -> (BoxError, Option<Store>) {
        (self.source, self.store)
    }
}

impl<E> From<E> for NodeError
where
    E: Into<BoxError>,
{
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

impl fmt::Debug for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeError")
            .field("source", &self.source)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}
