//! Template substitution between node outputs.
//!
//! An input value is a template iff it is a string of exactly the form
//! `{{nodeId.output}}`. The whole string is then replaced with the `output`
//! field of that node's result, keeping the original JSON type (a numeric
//! output stays a number). Mid-string interpolation is not supported; strings
//! that do not match pass through unchanged.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use plexus_core::TaskGraph;

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\{\{([A-Za-z0-9_]+)\.output\}\}$").expect("template pattern is valid")
    })
}

/// Resolution failures. Either one fails the node that carried the template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The referenced node has not completed (or does not exist)
    #[error("dependency result for node '{0}' not found")]
    MissingResult(String),

    /// The referenced result is not an object carrying an `output` key
    #[error("dependency result for node '{0}' does not have an 'output' key")]
    MissingOutput(String),
}

/// Resolve every template in `input` against the graph's completed results.
///
/// # Errors
///
/// Returns a [`TemplateError`] naming the offending node id.
pub fn resolve_input(
    graph: &TaskGraph,
    input: &Map<String, Value>,
) -> Result<Map<String, Value>, TemplateError> {
    let mut resolved = Map::with_capacity(input.len());
    for (key, value) in input {
        let replacement = match value {
            Value::String(text) => match template_pattern().captures(text) {
                Some(captures) => Some(lookup_output(graph, &captures[1])?),
                None => None,
            },
            _ => None,
        };
        resolved.insert(key.clone(), replacement.unwrap_or_else(|| value.clone()));
    }
    Ok(resolved)
}

fn lookup_output(graph: &TaskGraph, node_id: &str) -> Result<Value, TemplateError> {
    let result = graph
        .node_results
        .get(node_id)
        .ok_or_else(|| TemplateError::MissingResult(node_id.to_string()))?;
    let Value::Object(fields) = result else {
        return Err(TemplateError::MissingOutput(node_id.to_string()));
    };
    fields
        .get("output")
        .cloned()
        .ok_or_else(|| TemplateError::MissingOutput(node_id.to_string()))
}
