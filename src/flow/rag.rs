// SPDX-License-Identifier: MIT

//! Rag - fixed retrieve-then-generate pipeline

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::{FlowError, Node, NodeError, NodeResult, Process, Store};

const RETRIEVE: &str = "retrieve";
const GENERATE: &str = "generate";

pub struct Rag {
    retrieve: Node,
    generate: Node,
    cancel: CancellationToken,
}

impl Rag {
    pub fn new(retrieve: Node, generate: Node) -> Self {
        Self {
            retrieve,
            generate,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between the two stages once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Retrieve, then generate on the retrieved store. No retry: wrap a
    /// stage in an [`Agent`](super::Agent) for that.
    pub async fn call(&self, store: Store) -> Result<Store, FlowError> {
        let retrieved = self.stage(RETRIEVE, &self.retrieve, store).await?;
        self.stage(GENERATE, &self.generate, retrieved).await
    }

    async fn stage(
        &self,
        stage: &'static str,
        node: &Node,
        store: Store,
    ) -> Result<Store, FlowError> {
        if self.cancel.is_cancelled() {
            log::info!("Rag cancelled before {}", stage);
            return Err(FlowError::Cancelled);
        }
        log::info!("Rag: {} with {}", stage, node.name());
        node.process(store).await.map_err(|err| {
            log::error!("Rag: {} failed: {}", stage, err);
            FlowError::stage(stage, err)
        })
    }
}

#[async_trait]
impl Process for Rag {
    async fn process(&self, store: Store) -> NodeResult {
        self.call(store).await.map_err(NodeError::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Node {
        Node::from_fn(move |mut store: Store| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                if fail {
                    return Err(format!("{} backend down", name).into());
                }
                let query = store.get_str("query").unwrap_or_default().to_string();
                let context = store.get_str("context").unwrap_or_default().to_string();
                match name {
                    "retriever" => store.insert("context", format!("context for {}", query)),
                    _ => store.insert("response", format!("summary of {}", context)),
                };
                Ok(store)
            }
        })
        .named(name)
    }

    fn query(text: &str) -> Store {
        let mut store = Store::new();
        store.insert("query", text);
        store
    }

    #[tokio::test]
    async fn test_retrieve_then_generate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let rag = Rag::new(
            recording("retriever", log.clone(), false),
            recording("generator", log.clone(), false),
        );

        let out = rag.call(query("sky color")).await.unwrap();
        assert_eq!(
            out.get_str("response"),
            Some("summary of context for sky color")
        );
        assert_eq!(*log.lock().unwrap(), vec!["retriever", "generator"]);
    }

    #[tokio::test]
    async fn test_retrieve_failure_skips_generate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let rag = Rag::new(
            recording("retriever", log.clone(), true),
            recording("generator", log.clone(), false),
        );

        match rag.call(query("q")).await {
            Err(FlowError::Stage { stage, .. }) => assert_eq!(stage, "retrieve"),
            other => panic!("Expected retrieve stage failure, got {:?}", other),
        }
        assert_eq!(*log.lock().unwrap(), vec!["retriever"]);
    }

    #[tokio::test]
    async fn test_generate_failure_is_tagged() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let rag = Rag::new(
            recording("retriever", log.clone(), false),
            recording("generator", log.clone(), true),
        );

        let err = rag.call(query("q")).await.unwrap_err();
        assert!(matches!(err, FlowError::Stage { stage: "generate", .. }));
        assert!(err.to_string().contains("generator backend down"));
    }

    #[tokio::test]
    async fn test_cancelled_before_retrieve() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        token.cancel();
        let rag = Rag::new(
            recording("retriever", log.clone(), false),
            recording("generator", log.clone(), false),
        )
        .with_cancellation(token);

        assert!(matches!(rag.call(query("q")).await, Err(FlowError::Cancelled)));
        assert!(log.lock().unwrap().is_empty());
    }
}
