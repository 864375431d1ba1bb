// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use owo_colors::OwoColorize;
use std::error::Error;
use testfx_filtering::errors::TreeNodeFilterParseErrors;
use testfx_metadata::TestfxExitCode;
use testfx_runner::errors::{
    ConfigParseError, ExecuteError, SignalHandlerSetupError, TransportError,
};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are mostly placeholders: the expected way to print errors is
// display_to_stderr, which colorizes them.

/// An expected failure of the test host, mapped to a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        error: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirNotUtf8 {
        #[source]
        error: camino::FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("filter parse error")]
    FilterParseError { errors: TreeNodeFilterParseErrors },
    #[error("unknown server protocol `{protocol}`")]
    UnknownServerProtocol { protocol: String },
    #[error("error creating the async runtime")]
    RuntimeCreate {
        #[source]
        error: std::io::Error,
    },
    #[error("error setting up signal handler")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("error listening on port {port}")]
    ServerBind {
        port: u16,
        #[source]
        error: std::io::Error,
    },
    #[error("error connecting to {host}:{port}")]
    ServerConnect {
        host: String,
        port: u16,
        #[source]
        error: std::io::Error,
    },
    #[error("server transport failed")]
    ServerTransport {
        #[from]
        err: TransportError,
    },
    #[error("test execution failed")]
    ExecuteError {
        #[from]
        err: ExecuteError,
    },
    #[error("error writing output")]
    WriteOutput {
        #[source]
        error: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output(error: std::io::Error) -> Self {
        Self::WriteOutput { error }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDir { .. }
            | Self::CurrentDirNotUtf8 { .. }
            | Self::RuntimeCreate { .. }
            | Self::SignalHandlerSetupError { .. } => TestfxExitCode::GENERIC_FAILURE,
            Self::ConfigParseError { .. } | Self::UnknownServerProtocol { .. } => {
                TestfxExitCode::INVALID_CONFIGURATION
            }
            Self::FilterParseError { .. } => TestfxExitCode::INVALID_COMMAND_LINE,
            Self::ServerBind { .. } | Self::ServerConnect { .. } | Self::ServerTransport { .. } => {
                TestfxExitCode::SERVER_TRANSPORT_FAILED
            }
            Self::ExecuteError { err } => match err {
                ExecuteError::MessageBusClosed(_) => TestfxExitCode::GENERIC_FAILURE,
                _ => TestfxExitCode::TEST_SOURCE_FAILED,
            },
            Self::WriteOutput { .. } => TestfxExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDir { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::CurrentDirNotUtf8 { error } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    error.as_path().display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse testfx config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::FilterParseError { errors } => {
                for single_error in &errors.errors {
                    let report = miette::Report::new(single_error.clone())
                        .with_source_code(errors.input.clone());
                    error!(target: NO_HEADING_TARGET, "{:?}", report);
                }

                error!(
                    "failed to parse tree node filter `{}`",
                    errors.input.style(styles.bold)
                );
                None
            }
            Self::UnknownServerProtocol { protocol } => {
                error!(
                    "unknown server protocol `{}` (known protocols: {})",
                    protocol.style(styles.bold),
                    "jsonrpc".style(styles.bold),
                );
                None
            }
            Self::RuntimeCreate { error } => {
                error!("error creating the async runtime");
                Some(error as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("error setting up signal handler");
                err.source()
            }
            Self::ServerBind { port, error } => {
                error!("error listening on port {}", port.style(styles.bold));
                Some(error as &dyn Error)
            }
            Self::ServerConnect { host, port, error } => {
                let addr = format!("{host}:{port}");
                error!("error connecting to client at {}", addr.style(styles.bold));
                Some(error as &dyn Error)
            }
            Self::ServerTransport { err } => {
                error!("server transport failed");
                Some(err as &dyn Error)
            }
            Self::ExecuteError { err } => {
                error!("test execution failed");
                Some(err as &dyn Error)
            }
            Self::WriteOutput { error } => {
                error!("error writing output");
                Some(error as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use testfx_filtering::TreeNodeFilter;

    fn filter_error() -> ExpectedError {
        let errors = TreeNodeFilter::parse("no-leading-slash").expect_err("filter is invalid");
        ExpectedError::FilterParseError { errors }
    }

    #[test_case(filter_error(), TestfxExitCode::INVALID_COMMAND_LINE; "filter")]
    #[test_case(
        ExpectedError::UnknownServerProtocol { protocol: "grpc".to_owned() },
        TestfxExitCode::INVALID_CONFIGURATION;
        "protocol"
    )]
    #[test_case(
        ExpectedError::ServerBind {
            port: 80,
            error: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        },
        TestfxExitCode::SERVER_TRANSPORT_FAILED;
        "bind"
    )]
    #[test_case(
        ExpectedError::write_output(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        TestfxExitCode::WRITE_OUTPUT_ERROR;
        "write output"
    )]
    fn exit_codes(error: ExpectedError, expected: i32) {
        assert_eq!(error.process_exit_code(), expected);
    }
}
