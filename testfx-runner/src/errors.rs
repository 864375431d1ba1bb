// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testfx.

use crate::node::TestNodeUid;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, io};
use testfx_filtering::errors::TreeNodeFilterParseErrors;
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse testfx config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// A test source failed to produce its nodes.
#[derive(Debug, Error)]
#[error("failed to discover tests from `{source_name}`")]
pub struct TestSourceError {
    source_name: String,
    #[source]
    error: Box<dyn error::Error + Send + Sync>,
}

impl TestSourceError {
    /// Creates a new `TestSourceError`.
    pub fn new(
        source_name: impl Into<String>,
        error: impl Into<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            error: error.into(),
        }
    }
}

/// An error building a [`TestExecutionFilter`](crate::test_filter::TestExecutionFilter) from a
/// request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FilterBuildError {
    /// The tree node filter couldn't be parsed.
    #[error("invalid tree node filter")]
    TreeNodeFilter(#[from] TreeNodeFilterParseErrors),

    /// Both a uid list and a tree node filter were given.
    #[error("a request can't specify both a list of tests and a tree node filter")]
    BothFilters,
}

/// An error returned by [`BfsTestNodeVisitor::visit`](crate::visitor::BfsTestNodeVisitor::visit).
#[derive(Debug, Error)]
pub enum VisitError<E> {
    /// Two included nodes share a uid.
    #[error("duplicate test node uid `{0}`")]
    DuplicateUid(TestNodeUid),

    /// The callback failed, which stops the walk.
    #[error("visitor callback failed")]
    Callback(#[source] E),
}

/// The message bus was closed before an update could be published.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("message bus closed")]
pub struct MessageBusClosed;

/// An error executing a discovery or run request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The test source failed.
    #[error(transparent)]
    Source(#[from] TestSourceError),

    /// Two tests share a uid.
    #[error("duplicate test node uid `{0}`")]
    DuplicateUid(TestNodeUid),

    /// Nobody listens to updates anymore.
    #[error(transparent)]
    MessageBusClosed(#[from] MessageBusClosed),
}

impl From<VisitError<MessageBusClosed>> for ExecuteError {
    fn from(err: VisitError<MessageBusClosed>) -> Self {
        match err {
            VisitError::DuplicateUid(uid) => Self::DuplicateUid(uid),
            VisitError::Callback(err) => Self::MessageBusClosed(err),
        }
    }
}

/// An error reading or writing server-mode frames.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Reading from the stream failed.
    #[error("error reading from the client")]
    Read(#[source] io::Error),

    /// Writing to the stream failed.
    #[error("error writing to the client")]
    Write(#[source] io::Error),

    /// A header line couldn't be parsed.
    #[error("invalid frame header `{line}`")]
    InvalidHeader {
        /// The offending line.
        line: String,
    },

    /// The frame had no `Content-Length` header.
    #[error("frame is missing a Content-Length header")]
    MissingContentLength,

    /// The frame body is larger than allowed.
    #[error("frame body of {size} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge {
        /// The announced size.
        size: usize,
        /// The configured maximum.
        max: usize,
    },

    /// The frame body isn't a valid JSON-RPC message. The stream is still usable.
    #[error("received malformed message")]
    Malformed(#[source] serde_json::Error),

    /// A message couldn't be serialized.
    #[error("error serializing message")]
    Serialize(#[source] serde_json::Error),

    /// The stream ended in the middle of a frame.
    #[error("stream ended in the middle of a frame")]
    UnexpectedEof,
}

impl TransportError {
    /// Returns true if the connection can keep being used after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Read(err)
    }
}

/// An error sending a telemetry event.
#[derive(Debug, Error)]
#[error("failed to send telemetry event `{event_name}`")]
pub struct TelemetrySendError {
    event_name: String,
    #[source]
    error: Box<dyn error::Error + Send + Sync>,
}

impl TelemetrySendError {
    /// Creates a new `TelemetrySendError`.
    pub fn new(
        event_name: impl Into<String>,
        error: impl Into<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            error: error.into(),
        }
    }
}

/// Display adapter for an error and its chain of sources, on one line.
#[derive(Debug)]
pub struct DisplayErrorChain<E>(E);

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
