// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core engine for testfx.
//!
//! The flow of a request through testfx:
//!
//! 1. A [`TestSource`](source::TestSource) produces a tree of [`TestNode`](node::TestNode)s.
//! 2. The [`BfsTestNodeVisitor`](visitor::BfsTestNodeVisitor) walks it breadth-first, pruning
//!    what the [`TestExecutionFilter`](test_filter::TestExecutionFilter) excludes and expanding
//!    parameterized nodes through the [`TestArgumentsManager`](expansion::TestArgumentsManager).
//! 3. The [`ExecutionAdapter`](adapter::ExecutionAdapter) runs each reported node and publishes
//!    its state changes on the [`MessageBus`](bus::MessageBus).
//! 4. In server mode, a [`PerRequestStateAggregator`](server::PerRequestStateAggregator) batches
//!    those changes and the [`ServerTestHost`](server::ServerTestHost) sends them to the client.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod errors;
pub mod expansion;
mod helpers;
pub mod node;
mod panic;
pub mod server;
pub mod signal;
pub mod source;
pub mod telemetry;
pub mod test_filter;
mod time;
pub mod visitor;

pub use helpers::plural;
