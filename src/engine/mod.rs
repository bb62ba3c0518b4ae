// SPDX-License-Identifier: MIT

//! Engine module - the leaf abstractions every flow is built from
//!
//! - `Store` - the shared key-value context
//! - `Node` - uniform wrapper over async and blocking node bodies
//! - `FlowError` / `NodeError` - the error taxonomy

pub mod error;
pub mod node;
pub mod store;

pub use error::{BoxError, FlowError, NodeError};
pub use node::{Node, NodeResult, Process};
pub use store::{MergeStrategy, Store};
