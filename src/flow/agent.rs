// SPDX-License-Identifier: MIT

//! Agent - a node bound to a bounded retry policy

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::engine::{FlowError, Node, NodeError, NodeResult, Process, Store};

/// How many times a node is attempted and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (1 = no retry)
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Executes one node against one store, retrying failures.
///
/// Retries are not transactional: the next attempt gets the store the
/// failed attempt handed back through [`NodeError::with_store`], or the
/// store the failed attempt started from when nothing was handed back.
/// Side effects performed by a failed attempt are not undone.
pub struct Agent {
    node: Node,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Agent {
    /// Create an agent that attempts the node once
    pub fn new(node: Node) -> Self {
        Self::with_policy(node, RetryPolicy::default())
    }

    pub fn with_policy(node: Node, policy: RetryPolicy) -> Self {
        let max_attempts = policy.max_attempts;
        Self {
            node,
            policy,
            cancel: CancellationToken::new(),
        }
        .max_attempts(max_attempts)
    }

    /// Set the attempt budget; values below 1 are raised to 1
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        if max_attempts == 0 {
            log::warn!(
                "Agent {}: max_attempts must be at least 1, using 1",
                self.node.name()
            );
        }
        self.policy.max_attempts = max_attempts.max(1);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.policy.retry_delay = retry_delay;
        self
    }

    /// Stop between attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Run the node until it succeeds or the attempt budget is spent
    pub async fn decide(&self, store: Store) -> Result<Store, FlowError> {
        let attempts = self.policy.max_attempts;
        let mut input = store;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                log::info!("Agent {} cancelled before attempt {}", self.name(), attempt);
                return Err(FlowError::Cancelled);
            }

            let has_next = attempt < attempts;
            let snapshot = has_next.then(|| input.clone());

            let (source, partial) = match self.node.invoke(input).await {
                Ok(output) => {
                    if attempt > 1 {
                        log::info!("Agent {} succeeded on attempt {}", self.name(), attempt);
                    }
                    return Ok(output);
                }
                Err(err) => err.into_parts(),
            };

            log::warn!(
                "Agent {} attempt {}/{} failed: {}",
                self.name(),
                attempt,
                attempts,
                source
            );

            if !has_next {
                return Err(FlowError::ExhaustedRetries {
                    attempts,
                    source: Box::new(FlowError::NodeFailure {
                        node: self.name().to_string(),
                        source,
                    }),
                });
            }

            input = partial.or(snapshot).unwrap_or_default();

            if !self.policy.retry_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        log::info!("Agent {} cancelled during retry delay", self.name());
                        return Err(FlowError::Cancelled);
                    }
                    _ = tokio::time::sleep(self.policy.retry_delay) => {}
                }
            }
        }

        unreachable!("max_attempts is at least 1")
    }

    /// Use this agent wherever a node is expected (e.g. as a workflow step)
    pub fn into_node(self) -> Node {
        let name = self.name().to_string();
        Node::new(self).named(name)
    }
}

#[async_trait]
impl Process for Agent {
    async fn process(&self, store: Store) -> NodeResult {
        self.decide(store).await.map_err(NodeError::new)
    }
}
