//! Reference token scanner.
//!
//! Pure extraction of `[code]` tokens from text. The pipeline only feeds it
//! plain-text leaves when splitting, so resolved nodes are never re-matched.

use crate::model::ref_code::RefCode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;

static REF_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([a-z][0-9][a-z0-9]{4})\]").expect("valid reference token regex")
});

/// One `[code]` occurrence; `range` covers the brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSpan {
    pub range: Range<usize>,
    pub code: RefCode,
}

/// Distinct codes in first-occurrence order, brackets stripped.
pub fn scan_codes(text: &str) -> Vec<RefCode> {
    let mut seen = HashSet::new();
    find_code_spans(text)
        .into_iter()
        .filter_map(|span| seen.insert(span.code.clone()).then_some(span.code))
        .collect()
}

/// Every `[code]` occurrence with its byte range, left to right.
pub fn find_code_spans(text: &str) -> Vec<CodeSpan> {
    REF_TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let code = RefCode::parse(caps.get(1)?.as_str()).ok()?;
            Some(CodeSpan {
                range: whole.range(),
                code,
            })
        })
        .collect()
}
