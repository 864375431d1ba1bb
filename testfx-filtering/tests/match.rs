// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use testfx_filtering::{
    TreeNodeFilter,
    errors::{ParseSingleError, TreeNodeFilterParseErrors},
};
use test_case::test_case;

#[track_caller]
fn parse(input: &str) -> TreeNodeFilter {
    match TreeNodeFilter::parse(input) {
        Ok(filter) => filter,
        Err(TreeNodeFilterParseErrors { errors, .. }) => {
            panic!("failed to parse {input:?}: {errors:?}")
        }
    }
}

#[test_case("/A/B", &["A"], true ; "ancestor passes through")]
#[test_case("/A/B", &["A", "B"], true ; "exact path")]
#[test_case("/A/B", &["A", "C"], false ; "sibling is excluded")]
#[test_case("/A/B", &["X"], false ; "other root is excluded")]
#[test_case("/A/B", &["A", "B", "C"], false ; "deeper than the filter")]
#[test_case("/A/B%2FC", &["A", "B/C"], true ; "encoded slash matches literal slash")]
#[test_case("/A/B/C", &["A", "B/C"], false ; "unencoded slash is a separator")]
#[test_case("/A/%252F", &["A", "%2F"], true ; "double encoding")]
#[test_case("/A/%2F", &["A", "%2F"], false ; "single encoding decodes to a slash")]
#[test_case("/A/Test*", &["A", "TestOne"], true ; "wildcard suffix")]
#[test_case("/A/*One", &["A", "TestTwo"], false ; "wildcard prefix mismatch")]
#[test_case("/A/%2A", &["A", "*"], true ; "encoded star is literal")]
#[test_case("/A/%2A", &["A", "x"], false ; "encoded star is not a wildcard")]
#[test_case("/A/**", &["A", "B", "C", "D"], true ; "any depth")]
#[test_case("/A/**", &["B", "C"], false ; "any depth is still anchored")]
#[test_case("/**", &["anything"], true ; "everything")]
fn matches_path(filter: &str, path: &[&str], expected: bool) {
    let filter = parse(filter);
    assert_eq!(
        filter.matches(path, &()),
        expected,
        "filter {filter} against {path:?}"
    );
}

#[test]
fn property_predicate_applies_at_node_depth() {
    let filter = parse("/A/*[Category=Smoke]");

    assert!(filter.matches(&["A", "t1"], &[("Category", "Smoke")]));
    assert!(!filter.matches(&["A", "t1"], &[("Category", "Slow")]));
    assert!(!filter.matches(&["A", "t1"], &()));
    // Ancestors don't need to carry the property.
    assert!(filter.matches(&["A"], &()));

    let owned = vec![("Owner".to_owned(), "me".to_owned())];
    let filter = parse("/A[Owner=me]/B");
    assert!(filter.matches(&["A"], &owned));
    // The predicate belongs to the ancestor, so it isn't checked again for its children.
    assert!(filter.matches(&["A", "B"], &()));
}

#[test_case("" , vec![ParseSingleError::EmptyFilter] ; "empty")]
#[test_case("A", vec![ParseSingleError::ExpectedSlash((0, 0).into())] ; "no leading slash")]
#[test_case("/A//B", vec![ParseSingleError::EmptySegment((3, 0).into())] ; "empty segment")]
#[test_case("/A/%G1", vec![ParseSingleError::InvalidPercentEncoding((3, 1).into())] ; "bad escape")]
#[test_case("/A/**/B", vec![ParseSingleError::AnyDepthNotLast((3, 2).into())] ; "any depth not last")]
#[test_case(
    "/A[k=v",
    vec![ParseSingleError::ExpectedCloseBracket((2, 4).into())]
    ; "unterminated predicate"
)]
fn parse_errors(input: &str, expected: Vec<ParseSingleError>) {
    let errors = TreeNodeFilter::parse(input).expect_err("filter is invalid");
    assert_eq!(errors.input, input);
    assert_eq!(errors.errors, expected);
}
