//! Extraction of fenced blocks from model responses.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Draft, Program};

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)?[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap()
});

static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());

/// Return the body of the first fenced code block, if any.
///
/// Only one block is expected; later blocks are ignored.
pub fn extract_code_block(markdown: &str) -> Option<&str> {
    CODE_BLOCK_RE
        .captures(markdown)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|body| !body.trim().is_empty())
}

/// Turn a model response into a draft, using the sentinel when no block is found.
pub fn draft_from_response(response: &str) -> Draft {
    match extract_code_block(response) {
        Some(body) => Draft::Program(Program::new(body)),
        None => Draft::unextractable(),
    }
}

/// Locate a JSON object in a model response.
///
/// Accepts a fenced block or a bare object; for bare text the span runs from
/// the first `{` to the last `}`.
pub fn extract_json_object(response: &str) -> Option<&str> {
    if let Some(body) = JSON_BLOCK_RE
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| body.starts_with('{'))
    {
        return Some(body);
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}
