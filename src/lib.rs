// SPDX-License-Identifier: MIT

//! Small orchestration engine for LLM-style units of work.
//!
//! A [`Node`](engine::Node) wraps an async or blocking body over a shared
//! [`Store`](engine::Store). The `flow` coordinators compose nodes: retrying
//! [`Agent`](flow::Agent), DAG [`Workflow`](flow::Workflow), concurrent
//! [`MapReduce`](flow::MapReduce) and [`MultiAgent`](flow::MultiAgent), and
//! the two-stage [`Rag`](flow::Rag) pipeline.

pub mod config;
pub mod engine;
pub mod flow;
pub mod model;
