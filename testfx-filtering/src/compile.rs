// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::ParseSingleError,
    expression::{FilterSegment, NameMatcher, PropertyPredicate},
    parsing::{PatternFragment, ParsedSegment},
};

pub(crate) fn compile(
    segments: Vec<ParsedSegment>,
) -> Result<Vec<FilterSegment>, Vec<ParseSingleError>> {
    let mut errors = Vec::new();
    let last = segments.len().saturating_sub(1);
    let mut compiled = Vec::with_capacity(segments.len());

    for (index, segment) in segments.into_iter().enumerate() {
        if segment.is_any_depth() {
            if index != last {
                errors.push(ParseSingleError::AnyDepthNotLast(segment.span));
            }
            compiled.push(FilterSegment::AnyDepth);
            continue;
        }

        let property = segment
            .property
            .map(|(key, value)| PropertyPredicate { key, value });
        match compile_name(segment.fragments) {
            Ok(name) => compiled.push(FilterSegment::Name { name, property }),
            Err(message) => errors.push(ParseSingleError::InvalidPattern {
                span: segment.span,
                message,
            }),
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(errors)
    }
}

fn compile_name(fragments: Vec<PatternFragment>) -> Result<NameMatcher, String> {
    let has_wildcard = fragments
        .iter()
        .any(|fragment| matches!(fragment, PatternFragment::Wildcard));

    if !has_wildcard {
        let text = fragments
            .into_iter()
            .map(|fragment| match fragment {
                PatternFragment::Literal(text) => text,
                PatternFragment::Wildcard => String::new(),
            })
            .collect();
        return Ok(NameMatcher::Equal(text));
    }

    let mut pattern = String::from("^(?s:");
    for fragment in &fragments {
        match fragment {
            PatternFragment::Literal(text) => pattern.push_str(&regex::escape(text)),
            PatternFragment::Wildcard => pattern.push_str(".*"),
        }
    }
    pattern.push_str(")$");

    let regex = regex::Regex::new(&pattern).map_err(|err| err.to_string())?;
    Ok(NameMatcher::Pattern { fragments, regex })
}
