// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while interpreting a JSON object as a JSON-RPC message.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RpcMessageError {
    /// The `jsonrpc` member was missing or wasn't `"2.0"`.
    UnsupportedVersion {
        /// The version that was found, if any.
        found: Option<String>,
    },

    /// The object had neither a `method`, a `result` nor an `error` member.
    UnknownShape,

    /// A response or error object was missing its `id` member.
    MissingId,
}

impl fmt::Display for RpcMessageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found: Some(found) } => {
                write!(f, "unsupported JSON-RPC version `{found}` (expected `2.0`)")
            }
            Self::UnsupportedVersion { found: None } => {
                write!(f, "missing `jsonrpc` member (expected `2.0`)")
            }
            Self::UnknownShape => write!(
                f,
                "object is neither a request, a notification, a response nor an error"
            ),
            Self::MissingId => write!(f, "response is missing its `id` member"),
        }
    }
}

impl error::Error for RpcMessageError {}

/// An execution state string that isn't known to this version of testfx.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownExecutionStateError {
    input: String,
}

impl UnknownExecutionStateError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the unrecognized input.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for UnknownExecutionStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unsupported execution state `{}` (known states: {})",
            self.input,
            crate::ExecutionState::variants().join(", "),
        )
    }
}

impl error::Error for UnknownExecutionStateError {}
