// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server mode: serving discovery and run requests to a client over JSON-RPC.
//!
//! * [`MessageHandler`] frames messages over any byte stream.
//! * [`ServerTestHost`] dispatches requests and runs them concurrently.
//! * [`PerRequestStateAggregator`] batches the updates of each request.
//! * [`ClientCompatibility`] gates wire behavior on the client's version.

mod aggregator;
mod compat;
mod host;
mod transport;

pub use aggregator::*;
pub use compat::*;
pub use host::*;
pub use transport::*;
