// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while parsing tree node filters.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A set of errors that occurred while parsing a tree node filter.
#[derive(Clone, Debug, Error)]
#[error("failed to parse tree node filter `{input}`")]
#[non_exhaustive]
pub struct TreeNodeFilterParseErrors {
    /// The input string.
    pub input: String,

    /// The parse errors returned.
    pub errors: Vec<ParseSingleError>,
}

impl TreeNodeFilterParseErrors {
    pub(crate) fn new(input: impl Into<String>, errors: Vec<ParseSingleError>) -> Self {
        Self {
            input: input.into(),
            errors,
        }
    }
}

/// An individual error that occurred while parsing a tree node filter.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq)]
#[non_exhaustive]
pub enum ParseSingleError {
    /// The filter was empty.
    #[error("expected filter")]
    EmptyFilter,

    /// A filter path didn't start with `/`.
    #[error("expected '/'")]
    ExpectedSlash(#[label("filters are paths starting with '/'")] SourceSpan),

    /// A segment between two `/` was empty.
    #[error("empty path segment")]
    EmptySegment(#[label("missing display name")] SourceSpan),

    /// A `%` wasn't followed by two hex digits.
    #[error("invalid percent encoding")]
    InvalidPercentEncoding(#[label("expected two hex digits after '%'")] SourceSpan),

    /// Percent-encoded bytes didn't form valid UTF-8.
    #[error("percent-encoded bytes are not valid UTF-8")]
    InvalidUtf8(#[label("invalid UTF-8 sequence")] SourceSpan),

    /// A property predicate had no name.
    #[error("expected property name")]
    ExpectedPropertyKey(#[label("missing property name")] SourceSpan),

    /// A property predicate had no `=`.
    #[error("expected '='")]
    ExpectedEquals(#[label("missing '='")] SourceSpan),

    /// A property predicate wasn't closed.
    #[error("expected ']'")]
    ExpectedCloseBracket(#[label("missing ']'")] SourceSpan),

    /// Input that doesn't belong in a segment.
    #[error("unexpected input")]
    UnexpectedInput(#[label("unexpected input")] SourceSpan),

    /// `**` appeared before the last segment.
    #[error("'**' must be the last segment")]
    AnyDepthNotLast(#[label("followed by more segments")] SourceSpan),

    /// A segment pattern couldn't be compiled.
    #[error("invalid segment pattern")]
    InvalidPattern {
        /// The segment.
        #[label("{}", message)]
        span: SourceSpan,

        /// The error message.
        message: String,
    },

    /// An unknown parse error occurred.
    #[error("unknown parsing error")]
    Unknown,
}
