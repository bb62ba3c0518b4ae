// SPDX-License-Identifier: MIT

//! Flow module - composition strategies over `Node` and `Store`
//!
//! - `Agent` - one node with bounded retries
//! - `Workflow` - DAG of named steps
//! - `MapReduce` - concurrent map, ordered reduce
//! - `MultiAgent` - concurrent nodes on copies of one store, merged
//! - `Rag` - retrieve then generate

mod agent;
mod fanout;
mod map_reduce;
mod multi_agent;
mod rag;
mod workflow;

pub use agent::{Agent, RetryPolicy};
pub use map_reduce::MapReduce;
pub use multi_agent::MultiAgent;
pub use rag::Rag;
pub use workflow::Workflow;
