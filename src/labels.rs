//! Label set predicates used to decide which DaemonSets a node depends on

use std::collections::BTreeMap;
use thiserror::Error;

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Failed to parse label '{0}', expected key:value")]
pub struct LabelPairError(pub String);

/// True if every pair of `needles` is present in `haystack`
///
/// An empty side never matches: a filter with no labels selects nothing.
pub fn map_contains_all(haystack: &Labels, needles: &Labels) -> bool {
    if haystack.is_empty() || needles.is_empty() {
        return false;
    }
    needles
        .iter()
        .all(|(key, value)| haystack.get(key) == Some(value))
}

/// True if at least one pair of `needles` is present in `haystack`
pub fn map_contains_any(haystack: &Labels, needles: &Labels) -> bool {
    needles
        .iter()
        .any(|(key, value)| haystack.get(key) == Some(value))
}

/// True if a pod with `selector` may be scheduled on a node with `node_labels`
///
/// An empty selector places no constraint.
pub fn node_selector_matches(node_labels: &Labels, selector: &Labels) -> bool {
    selector.is_empty() || map_contains_all(node_labels, selector)
}

/// Parse a `key:value` pair; both sides must be non-empty and the separator
/// must appear exactly once
pub fn parse_label_pair(raw: &str) -> Result<(String, String), LabelPairError> {
    let mut chunks = raw.split(':');
    match (chunks.next(), chunks.next(), chunks.next()) {
        (Some(key), Some(value), None) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(LabelPairError(raw.to_string())),
    }
}

#[cfg(test)]
#[path = "labels_test.rs"]
mod tests;
