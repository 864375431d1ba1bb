// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing for tree node filters.
//!
//! Like the rest of the parsers in this crate, parsing never stops at the first error: errors are
//! pushed into the parsing state, the offending input is skipped, and parsing resumes at the next
//! `/` so that every problem in a filter is reported at once.

use crate::errors::ParseSingleError;
use miette::SourceSpan;
use winnow::{
    LocatingSlice, Parser,
    combinator::{opt, trace},
    stream::{Location, Stream},
    token::{take_till, take_while},
};

pub(crate) type Span<'a> = winnow::Stateful<LocatingSlice<&'a str>, State<'a>>;
type Error = ();
type PResult<T> = winnow::ModalResult<T, Error>;

#[derive(Debug)]
pub(crate) struct State<'a> {
    errors: &'a mut Vec<ParseSingleError>,
}

impl<'a> State<'a> {
    fn new(errors: &'a mut Vec<ParseSingleError>) -> Self {
        Self { errors }
    }

    fn report_error(&mut self, error: ParseSingleError) {
        self.errors.push(error);
    }
}

pub(crate) fn new_span<'a>(input: &'a str, errors: &'a mut Vec<ParseSingleError>) -> Span<'a> {
    Span {
        input: LocatingSlice::new(input),
        state: State::new(errors),
    }
}

/// A piece of a segment name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternFragment {
    /// Decoded literal text.
    Literal(String),
    /// `*`.
    Wildcard,
}

/// One `/`-separated segment of a filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ParsedSegment {
    pub(crate) fragments: Vec<PatternFragment>,
    pub(crate) property: Option<(String, String)>,
    pub(crate) span: SourceSpan,
}

impl ParsedSegment {
    /// Returns true if this segment is exactly `**`.
    pub(crate) fn is_any_depth(&self) -> bool {
        self.property.is_none()
            && matches!(
                self.fragments.as_slice(),
                [PatternFragment::Wildcard, PatternFragment::Wildcard]
            )
    }
}

/// Parses a filter into its segments. Errors are reported to the state.
pub(crate) fn parse(mut input: Span<'_>) -> Vec<ParsedSegment> {
    match parse_filter.parse_next(&mut input) {
        Ok(segments) => segments,
        Err(_) => {
            // The parsers below always recover, so this shouldn't happen.
            input.state.report_error(ParseSingleError::Unknown);
            Vec::new()
        }
    }
}

fn parse_filter(input: &mut Span<'_>) -> PResult<Vec<ParsedSegment>> {
    trace("parse_filter", |input: &mut Span<'_>| {
        let mut segments = Vec::new();
        if input.eof_offset() == 0 {
            input.state.report_error(ParseSingleError::EmptyFilter);
            return Ok(segments);
        }

        loop {
            let start = input.current_token_start();
            if opt('/').parse_next(input)?.is_none() {
                // Only possible for the first segment: every later iteration starts at a '/'.
                input
                    .state
                    .report_error(ParseSingleError::ExpectedSlash((start, 0).into()));
            }

            if let Some(segment) = parse_segment.parse_next(input)? {
                segments.push(segment);
            }

            if input.eof_offset() == 0 {
                break;
            }
        }

        Ok(segments)
    })
    .parse_next(input)
}

#[derive(Debug, Default)]
struct SegmentBuilder {
    fragments: Vec<PatternFragment>,
    // Percent-encoded bytes are buffered so that multi-byte sequences decode as a unit.
    pending: Vec<u8>,
    pending_start: usize,
}

impl SegmentBuilder {
    fn push_literal(&mut self, text: &str) {
        match self.fragments.last_mut() {
            Some(PatternFragment::Literal(existing)) => existing.push_str(text),
            _ => self.fragments.push(PatternFragment::Literal(text.to_owned())),
        }
    }

    fn push_escaped(&mut self, byte: u8, offset: usize) {
        if self.pending.is_empty() {
            self.pending_start = offset;
        }
        self.pending.push(byte);
    }

    /// Decodes buffered escapes. Returns false if they weren't valid UTF-8.
    fn flush(&mut self, end: usize, state: &mut State<'_>) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let bytes = std::mem::take(&mut self.pending);
        match String::from_utf8(bytes) {
            Ok(text) => {
                self.push_literal(&text);
                true
            }
            Err(_) => {
                state.report_error(ParseSingleError::InvalidUtf8(
                    (self.pending_start, end - self.pending_start).into(),
                ));
                false
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.pending.is_empty()
    }
}

fn decode_hex_pair(hex: &str) -> u8 {
    hex.chars()
        .filter_map(|c| c.to_digit(16))
        .fold(0, |acc, digit| (acc << 4) | digit as u8)
}

fn parse_segment(input: &mut Span<'_>) -> PResult<Option<ParsedSegment>> {
    trace("parse_segment", |input: &mut Span<'_>| {
        let start = input.current_token_start();
        let mut builder = SegmentBuilder::default();
        let mut valid = true;

        loop {
            let offset = input.current_token_start();
            if opt('%').parse_next(input)?.is_some() {
                match opt(take_while(2, |c: char| c.is_ascii_hexdigit())).parse_next(input)? {
                    Some(hex) => builder.push_escaped(decode_hex_pair(hex), offset),
                    None => {
                        input
                            .state
                            .report_error(ParseSingleError::InvalidPercentEncoding(
                                (offset, 1).into(),
                            ));
                        valid = false;
                    }
                }
                continue;
            }

            if !builder.flush(offset, &mut input.state) {
                valid = false;
            }

            if let Some(text) = opt(take_till(1.., ('/', '%', '*', '[', ']'))).parse_next(input)? {
                builder.push_literal(text);
                continue;
            }
            if opt('*').parse_next(input)?.is_some() {
                builder.fragments.push(PatternFragment::Wildcard);
                continue;
            }
            break;
        }

        let property = parse_property(input, &mut valid)?;

        // Anything left before the next '/' doesn't belong in a segment.
        let garbage_start = input.current_token_start();
        let garbage: &str = take_till(0.., '/').parse_next(input)?;
        if !garbage.is_empty() {
            input.state.report_error(ParseSingleError::UnexpectedInput(
                (garbage_start, garbage.len()).into(),
            ));
            valid = false;
        }

        let end = input.current_token_start();
        if builder.is_empty() && property.is_none() {
            if valid {
                input
                    .state
                    .report_error(ParseSingleError::EmptySegment((start, end - start).into()));
            }
            return Ok(None);
        }

        if !valid {
            return Ok(None);
        }

        Ok(Some(ParsedSegment {
            fragments: builder.fragments,
            property,
            span: (start, end - start).into(),
        }))
    })
    .parse_next(input)
}

fn parse_property(input: &mut Span<'_>, valid: &mut bool) -> PResult<Option<(String, String)>> {
    let open = input.current_token_start();
    if opt('[').parse_next(input)?.is_none() {
        return Ok(None);
    }

    let key: Option<&str> = opt(take_till(1.., ('=', ']', '/'))).parse_next(input)?;
    if key.is_none() {
        let at = input.current_token_start();
        input
            .state
            .report_error(ParseSingleError::ExpectedPropertyKey((at, 0).into()));
        *valid = false;
    }

    if opt('=').parse_next(input)?.is_none() {
        let at = input.current_token_start();
        input
            .state
            .report_error(ParseSingleError::ExpectedEquals((at, 0).into()));
        *valid = false;
    }

    let value: &str = take_till(0.., (']', '/')).parse_next(input)?;

    if opt(']').parse_next(input)?.is_none() {
        let at = input.current_token_start();
        input
            .state
            .report_error(ParseSingleError::ExpectedCloseBracket((open, at - open).into()));
        *valid = false;
    }

    Ok(key.map(|key| (key.to_owned(), value.to_owned())))
}
