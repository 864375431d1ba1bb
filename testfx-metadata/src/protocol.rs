// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parameter and result payloads for the server-mode methods.

use crate::{RequestId, SerializedTestNode};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The kind for [`RunId`].
pub enum RunKind {}

impl TypedUuidKind for RunKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("testfx_run");
        TAG
    }
}

/// Correlates every update of a discovery or run request. Chosen by the client.
pub type RunId = TypedUuid<RunKind>;

/// Name and version of one side of the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's name, e.g. `test-anywhere`.
    pub name: String,
    /// The peer's version. Usually, but not necessarily, a semantic version.
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestArgs {
    /// The client's process id.
    pub process_id: i32,
    /// The client's name and version.
    pub client_info: PeerInfo,
    /// What the client supports.
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

/// Capabilities advertised by a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Testing related capabilities.
    #[serde(default)]
    pub testing: ClientTestingCapabilities,
}

/// Testing capabilities advertised by a client. Anything not advertised is unsupported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTestingCapabilities {
    /// The client can attach a debugger to the test host.
    #[serde(default)]
    pub debugger_provider: bool,
}

/// Result of the `initialize` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponseArgs {
    /// The server's process id.
    pub process_id: u32,
    /// The server's name and version.
    pub server_info: PeerInfo,
    /// What the server supports.
    pub capabilities: ServerCapabilities,
}

/// Capabilities advertised by a server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Testing related capabilities.
    #[serde(default)]
    pub testing: ServerTestingCapabilities,
}

/// Testing capabilities advertised by a server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTestingCapabilities {
    /// The server answers `testing/discoverTests`.
    #[serde(default)]
    pub supports_discovery: bool,
    /// The server serves several discovery/run requests concurrently.
    #[serde(default)]
    pub multi_request_support: bool,
    /// The server understands VSTest-style provider requests.
    #[serde(default)]
    pub vstest_provider: bool,
    /// Run responses may carry attachments.
    #[serde(default)]
    pub attachments_support: bool,
    /// The server accepts more than one connection.
    #[serde(default)]
    pub multi_connection_provider: bool,
}

/// Parameters of `testing/discoverTests` and `testing/runTests`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRequestArgs {
    /// Correlation id for every update sent for this request.
    pub run_id: RunId,
    /// Restricts the request to these nodes (by uid).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<SerializedTestNode>>,
    /// Restricts the request to nodes matching this tree path filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_filter: Option<String>,
}

/// Result of `testing/runTests`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponseArgs {
    /// Files produced by the run.
    #[serde(default)]
    pub attachments: Vec<Artifact>,
}

/// Result of `testing/discoverTests`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponseArgs {}

/// A file produced by a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Location of the file.
    pub uri: String,
    /// Name of the component that produced the file.
    pub producer: String,
    /// Kind of the file, e.g. `trx`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable name.
    pub display_name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameters of `$/cancelRequest`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequestArgs {
    /// The id of the request to cancel.
    pub id: RequestId,
}

/// One entry of a `testing/testUpdates/tests` notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestNodeUpdate {
    /// The updated node.
    pub node: SerializedTestNode,
    /// Uid of the parent node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Parameters of `testing/testUpdates/tests`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNodeUpdatesArgs {
    /// The request the updates belong to.
    pub run_id: RunId,
    /// Updates in the order they were buffered.
    pub changes: Vec<TestNodeUpdate>,
}

/// Severity of a `client/log` notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// Verbose diagnostics.
    Trace,
    /// Debugging information.
    Debug,
    /// Informational message.
    Information,
    /// Something unexpected but recoverable.
    Warning,
    /// A failure.
    Error,
    /// A failure that stops the host.
    Critical,
}

/// Parameters of `client/log`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEventArgs {
    /// Severity.
    pub level: LogLevel,
    /// The message.
    pub message: String,
}

/// Parameters of `telemetry/update`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEventArgs {
    /// The event name.
    pub event_name: String,
    /// String valued properties, booleans rendered as `"true"`/`"false"`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Numeric measurements; durations are in milliseconds.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Converts a payload to a JSON value.
///
/// Payload types in this module only contain maps with string keys, so serialization can't fail.
pub fn to_params<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
