// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The message bus carrying test node updates from the execution adapter to consumers.
//!
//! Publishing never blocks: the bus is an unbounded channel, and the consumer (usually a
//! [`PerRequestStateAggregator`](crate::server::PerRequestStateAggregator) or the console
//! reporter) decides how quickly to drain it.

use crate::{
    errors::MessageBusClosed,
    node::{TestNodeSnapshot, TestNodeUid},
};
use testfx_metadata::protocol::RunId;
use tokio::sync::mpsc;

/// A change to a test node, published by the execution adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct TestNodeUpdateMessage {
    /// The run this update belongs to.
    pub run_id: RunId,
    /// The node's identity and properties after the change.
    pub node: TestNodeSnapshot,
    /// The uid of the node's parent, if it has one.
    pub parent: Option<TestNodeUid>,
}

/// Creates a new message bus.
pub fn message_bus() -> (MessageBus, MessageBusReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (MessageBus { sender }, MessageBusReceiver { receiver })
}

/// The publishing side of the message bus.
#[derive(Clone, Debug)]
pub struct MessageBus {
    sender: mpsc::UnboundedSender<TestNodeUpdateMessage>,
}

impl MessageBus {
    /// Publishes an update.
    pub fn publish(&self, message: TestNodeUpdateMessage) -> Result<(), MessageBusClosed> {
        self.sender.send(message).map_err(|_| MessageBusClosed)
    }
}

/// The consuming side of the message bus.
#[derive(Debug)]
pub struct MessageBusReceiver {
    receiver: mpsc::UnboundedReceiver<TestNodeUpdateMessage>,
}

impl MessageBusReceiver {
    /// Receives the next update. Returns `None` once every [`MessageBus`] is dropped and all
    /// updates have been received.
    pub async fn recv(&mut self) -> Option<TestNodeUpdateMessage> {
        self.receiver.recv().await
    }
}
