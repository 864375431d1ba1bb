// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::RpcMessageError;
use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;
use std::fmt;

/// The JSON-RPC version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names understood or emitted by a testfx test host.
pub mod methods {
    /// Client to server request: handshake. Must be the first request.
    pub const INITIALIZE: &str = "initialize";

    /// Client to server request: discover tests.
    pub const DISCOVER_TESTS: &str = "testing/discoverTests";

    /// Client to server request: run tests.
    pub const RUN_TESTS: &str = "testing/runTests";

    /// Client to server notification: cancel an in-flight request.
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";

    /// Client to server notification: the client is going away.
    pub const EXIT: &str = "exit";

    /// Server to client notification: a batch of test node updates.
    pub const TEST_UPDATES: &str = "testing/testUpdates/tests";

    /// Server to client notification: a log message.
    pub const CLIENT_LOG: &str = "client/log";

    /// Server to client notification: a telemetry event.
    pub const TELEMETRY_UPDATE: &str = "telemetry/update";
}

/// Error codes carried by [`ErrorMessage`].
///
/// The codes below -32000 are reserved by JSON-RPC 2.0.
pub enum ErrorCodes {}

impl ErrorCodes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal error while serving the request.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// A request other than `initialize` arrived before `initialize`.
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;

    /// The request was cancelled through `$/cancelRequest` or host shutdown.
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// The identifier of a request, echoed back in its response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric identifier.
    Number(i64),
    /// A string identifier.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A single message exchanged over the server-mode transport.
///
/// Every [`RpcMessage::Request`] is eventually answered by exactly one
/// [`RpcMessage::Response`] or [`RpcMessage::Error`] carrying the same id.
/// Notifications are never answered.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawMessage")]
pub enum RpcMessage {
    /// A request expecting a reply.
    Request(RequestMessage),
    /// A one-way message.
    Notification(NotificationMessage),
    /// A successful reply.
    Response(ResponseMessage),
    /// A failed reply.
    Error(ErrorMessage),
}

impl RpcMessage {
    /// Creates a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self::Request(RequestMessage {
            id: id.into(),
            method: method.into(),
            params: Some(params),
        })
    }

    /// Creates a notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification(NotificationMessage {
            method: method.into(),
            params: Some(params),
        })
    }

    /// Creates a successful response.
    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(ResponseMessage { id, result })
    }

    /// Creates an error response.
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            id,
            code,
            message: message.into(),
            data: None,
        })
    }

    /// Returns the method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }
}

/// A request: `{ id, method, params }`.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestMessage {
    /// The request id.
    pub id: RequestId,
    /// The method to invoke.
    pub method: String,
    /// The parameters, if any.
    pub params: Option<Value>,
}

/// A notification: `{ method, params }`.
#[derive(Clone, Debug, PartialEq)]
pub struct NotificationMessage {
    /// The method to invoke.
    pub method: String,
    /// The parameters, if any.
    pub params: Option<Value>,
}

/// A successful response: `{ id, result }`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseMessage {
    /// The id of the request this answers.
    pub id: RequestId,
    /// The result. May be `null`.
    pub result: Value,
}

/// An error response: `{ id, error: { code, message, data } }`.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorMessage {
    /// The id of the request this answers. `None` if the request id couldn't be determined.
    pub id: Option<RequestId>,
    /// One of [`ErrorCodes`], or an application defined code.
    pub code: i32,
    /// A short description of the error.
    pub message: String,
    /// Additional data about the error.
    pub data: Option<Value>,
}

impl Serialize for RpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        match self {
            Self::Request(request) => {
                map.serialize_entry("id", &request.id)?;
                map.serialize_entry("method", &request.method)?;
                if let Some(params) = &request.params {
                    map.serialize_entry("params", params)?;
                }
            }
            Self::Notification(notification) => {
                map.serialize_entry("method", &notification.method)?;
                if let Some(params) = &notification.params {
                    map.serialize_entry("params", params)?;
                }
            }
            Self::Response(response) => {
                map.serialize_entry("id", &response.id)?;
                map.serialize_entry("result", &response.result)?;
            }
            Self::Error(error) => {
                // JSON-RPC requires `"id": null` when the id is unknown.
                map.serialize_entry("id", &error.id)?;
                map.serialize_entry(
                    "error",
                    &RawError {
                        code: error.code,
                        message: error.message.clone(),
                        data: error.data.clone(),
                    },
                )?;
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    // A present-but-null result must stay distinguishable from a missing one.
    #[serde(default, deserialize_with = "deserialize_present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Serialize, Deserialize)]
struct RawError {
    code: i32,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawMessage> for RpcMessage {
    type Error = RpcMessageError;

    fn try_from(raw: RawMessage) -> Result<Self, RpcMessageError> {
        if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(RpcMessageError::UnsupportedVersion { found: raw.jsonrpc });
        }

        match (raw.method, raw.id, raw.result, raw.error) {
            (Some(method), Some(id), _, _) => Ok(Self::Request(RequestMessage {
                id,
                method,
                params: raw.params,
            })),
            (Some(method), None, _, _) => Ok(Self::Notification(NotificationMessage {
                method,
                params: raw.params,
            })),
            (None, id, _, Some(error)) => Ok(Self::Error(ErrorMessage {
                id,
                code: error.code,
                message: error.message,
                data: error.data,
            })),
            (None, Some(id), Some(result), None) => Ok(Self::Response(ResponseMessage { id, result })),
            (None, None, Some(_), None) => Err(RpcMessageError::MissingId),
            (None, _, None, None) => Err(RpcMessageError::UnknownShape),
        }
    }
}
