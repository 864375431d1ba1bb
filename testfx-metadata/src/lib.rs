// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Wire types for the testfx server-mode protocol.
//!
//! A testfx test host in server mode talks to a single client (an IDE or a CI
//! driver) over a duplex byte stream. Every frame carries one JSON-RPC 2.0
//! message, represented here as [`RpcMessage`]. The parameter and result
//! payloads of the methods the host understands live in the [`protocol`]
//! module, and test nodes are exchanged in the flat shape described by
//! [`SerializedTestNode`].

mod errors;
mod exit_codes;
pub mod protocol;
mod rpc;
mod test_node;

pub use errors::*;
pub use exit_codes::*;
pub use rpc::*;
pub use test_node::*;
