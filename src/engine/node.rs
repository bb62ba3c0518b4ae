// SPDX-License-Identifier: MIT

//! Node - the uniform unit of work orchestrated by every flow
//!
//! A node wraps either an async body, which runs on the calling task, or a
//! blocking body, which is shipped to tokio's blocking pool. Callers only see
//! [`Node::process`].

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::error::{FlowError, NodeError};
use super::store::Store;

/// Result of a single node body invocation
pub type NodeResult = Result<Store, NodeError>;

const ANONYMOUS: &str = "<anonymous>";

/// Async node body.
///
/// `I` is the node input; it is a [`Store`] everywhere except for the reduce
/// step of a map-reduce, which receives the ordered per-input results.
#[async_trait]
pub trait Process<I = Store>: Send + Sync {
    async fn process(&self, input: I) -> NodeResult;
}

/// Adapter turning an async closure into a [`Process`]
struct FnProcess<F>(F);

#[async_trait]
impl<I, F, Fut> Process<I> for FnProcess<F>
where
    I: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult> + Send + 'static,
{
    async fn process(&self, input: I) -> NodeResult {
        (self.0)(input).await
    }
}

type BlockingFn<I> = dyn Fn(I) -> NodeResult + Send + Sync;

enum Body<I> {
    Direct(Arc<dyn Process<I>>),
    Blocking(Arc<BlockingFn<I>>),
}

impl<I> Clone for Body<I> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(p) => Self::Direct(Arc::clone(p)),
            Self::Blocking(f) => Self::Blocking(Arc::clone(f)),
        }
    }
}

/// A named or anonymous unit of work: `process(input) -> store`.
///
/// Cloning is cheap; clones share the same body.
pub struct Node<I = Store> {
    name: Option<Arc<str>>,
    body: Body<I>,
}

impl<I> Clone for Node<I> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

impl<I: Send + 'static> Node<I> {
    /// Wrap a struct-backed async body
    pub fn new<P>(body: P) -> Self
    where
        P: Process<I> + 'static,
    {
        Self {
            name: None,
            body: Body::Direct(Arc::new(body)),
        }
    }

    /// Wrap an async closure
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        Self::new(FnProcess(f))
    }

    /// Wrap a synchronous closure that must not run on the scheduler threads
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(I) -> NodeResult + Send + Sync + 'static,
    {
        Self {
            name: None,
            body: Body::Blocking(Arc::new(f)),
        }
    }

    /// Give the node a name used in logs and errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(ANONYMOUS)
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.body, Body::Blocking(_))
    }

    /// Run the body once and surface a failure as [`FlowError::NodeFailure`]
    pub async fn process(&self, input: I) -> Result<Store, FlowError> {
        self.invoke(input).await.map_err(|err| {
            let (source, _) = err.into_parts();
            FlowError::NodeFailure {
                node: self.name().to_string(),
                source,
            }
        })
    }

    /// Run the body once, keeping any partial store a failure hands back.
    /// Panics in either body shape are reported as failures.
    pub(crate) async fn invoke(&self, input: I) -> NodeResult {
        log::debug!(
            "Dispatching node {} ({})",
            self.name(),
            if self.is_blocking() { "blocking" } else { "direct" }
        );
        match &self.body {
            Body::Direct(body) => AssertUnwindSafe(body.process(input))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panicked(payload))),
            Body::Blocking(body) => {
                let body = Arc::clone(body);
                match tokio::task::spawn_blocking(move || body(input)).await {
                    Ok(result) => result,
                    Err(join_err) if join_err.is_panic() => Err(panicked(join_err.into_panic())),
                    Err(join_err) => Err(NodeError::new(join_err)),
                }
            }
        }
    }
}

impl<I> fmt::Debug for Node<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name.as_deref().unwrap_or(ANONYMOUS))
            .field(
                "body",
                &match self.body {
                    Body::Direct(_) => "direct",
                    Body::Blocking(_) => "blocking",
                },
            )
            .finish()
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> NodeError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    NodeError::new(format!("node body panicked: {}", message))
}
