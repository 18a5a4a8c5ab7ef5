//! Constrained JSONPath evaluator (spec.md §4.A).
//!
//! Supports a restricted subset only: a root marker (`$`/`$.`, both
//! optional), dot-separated object-key segments, and an array-expansion
//! suffix (`[]`/`[*]`) on a segment or bare at the root. No filters, no
//! indices, no other wildcards.

use serde_json::Value;

/// Evaluate `path` against `root`, returning the ordered list of matched
/// values (possibly empty). Never fails — an unmatched segment simply
/// produces no values, per spec.md §4.A step 2 ("If the candidate is
/// null/absent, skip").
pub fn evaluate<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let stripped = strip_root(path);
    if stripped.is_empty() {
        return vec![root];
    }

    let mut current: Vec<&'a Value> = vec![root];
    for token in stripped.split('.') {
        current = step(&current, token);
        if current.is_empty() {
            break;
        }
    }
    current
}

/// Strip a leading `$.` or `$` root marker.
fn strip_root(path: &str) -> &str {
    if let Some(rest) = path.strip_prefix("$.") {
        rest
    } else if let Some(rest) = path.strip_prefix('$') {
        rest
    } else {
        path
    }
}

/// Apply one dot-separated segment to the current set of live values.
fn step<'a>(current: &[&'a Value], token: &str) -> Vec<&'a Value> {
    let (key, is_array) = split_array_suffix(token);

    let mut next = Vec::new();
    for value in current {
        let candidate = match value {
            Value::Object(map) => {
                if key.is_empty() {
                    None
                } else {
                    map.get(key)
                }
            }
            Value::Array(_) if key.is_empty() => Some(*value),
            _ => None,
        };

        let Some(candidate) = candidate else { continue };
        if matches!(candidate, Value::Null) {
            continue;
        }

        if is_array {
            if let Value::Array(items) = candidate {
                next.extend(items.iter());
            }
            // A non-list candidate under an array-terminated segment
            // produces nothing, per spec.md §4.A step 2/3.
        } else {
            next.push(candidate);
        }
    }
    next
}

/// Split a segment into `(key, is_array_terminated)`, stripping `[]`/`[*]`.
fn split_array_suffix(token: &str) -> (&str, bool) {
    if let Some(key) = token.strip_suffix("[]") {
        (key, true)
    } else if let Some(key) = token.strip_suffix("[*]") {
        (key, true)
    } else {
        (token, false)
    }
}
