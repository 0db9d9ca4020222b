//! Outbound payload sanitization.
//!
//! Strips markup-injection patterns from every string in a payload before it
//! is sent. Traversal is iterative over an explicit worklist with a depth
//! bound and a node budget, so hostile nesting cannot exhaust the stack.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::{DEPTH_SENTINEL, MAX_SANITIZE_DEPTH, MAX_SANITIZE_NODES, MAX_STRING_LEN};

/// Patterns removed from strings, applied in order.
#[allow(clippy::expect_used)]
static STRIP_PATTERNS: LazyLock<[Regex; 5]> = LazyLock::new(|| {
    [
        r"[<>]",
        r"(?i)javascript:",
        r"(?i)on\w+=",
        r"(?i)data:",
        r"(?i)vbscript:",
    ]
    .map(|pattern| Regex::new(pattern).expect("static pattern compiles"))
});

/// Bounds applied by one sanitization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeLimits {
    /// Containers nested deeper than this are replaced by the sentinel.
    pub max_depth: usize,
    /// Values visited past this budget are replaced by the sentinel.
    pub max_nodes: usize,
    /// Strings are truncated to this many characters.
    pub max_string_len: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            max_depth: MAX_SANITIZE_DEPTH,
            max_nodes: MAX_SANITIZE_NODES,
            max_string_len: MAX_STRING_LEN,
        }
    }
}

/// What a sanitization pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Values visited.
    pub visited: usize,
    /// Containers replaced for exceeding the depth bound.
    pub depth_cuts: usize,
    /// Values replaced for exceeding the node budget.
    pub budget_cuts: usize,
}

impl SanitizeReport {
    /// Returns `true` if any subtree was replaced by the sentinel.
    #[must_use]
    pub const fn was_cut(&self) -> bool {
        self.depth_cuts > 0 || self.budget_cuts > 0
    }
}

/// Sanitizes a payload with the default limits.
#[must_use]
pub fn sanitize(value: Value) -> Value {
    let (value, report) = sanitize_with(value, SanitizeLimits::default());
    if report.was_cut() {
        tracing::warn!(
            depth_cuts = report.depth_cuts,
            budget_cuts = report.budget_cuts,
            "sanitization bound reached, subtree replaced"
        );
    }
    value
}

/// Sanitizes a payload with explicit limits.
///
/// The root sits at depth 0. Object keys are left untouched.
#[must_use]
pub fn sanitize_with(mut value: Value, limits: SanitizeLimits) -> (Value, SanitizeReport) {
    let mut report = SanitizeReport::default();
    {
        let mut worklist: Vec<(&mut Value, usize)> = vec![(&mut value, 0)];

        while let Some((node, depth)) = worklist.pop() {
            report.visited += 1;
            if report.visited > limits.max_nodes {
                *node = Value::String(DEPTH_SENTINEL.to_string());
                report.budget_cuts += 1;
                continue;
            }

            let is_container = node.is_array() || node.is_object();
            if is_container && depth > limits.max_depth {
                *node = Value::String(DEPTH_SENTINEL.to_string());
                report.depth_cuts += 1;
                continue;
            }

            match node {
                Value::String(text) => {
                    let cleaned = match clean_string(text, limits.max_string_len) {
                        Cow::Owned(clean) => Some(clean),
                        Cow::Borrowed(_) => None,
                    };
                    if let Some(clean) = cleaned {
                        *text = clean;
                    }
                }
                Value::Array(items) => {
                    worklist.extend(items.iter_mut().rev().map(|item| (item, depth + 1)));
                }
                Value::Object(fields) => {
                    worklist.extend(fields.values_mut().map(|item| (item, depth + 1)));
                }
                Value::Null | Value::Bool(_) | Value::Number(_) => {}
            }
        }
    }

    (value, report)
}

/// Strips unsafe patterns, trims and truncates a single string.
#[must_use]
pub fn clean_string(text: &str, max_chars: usize) -> Cow<'_, str> {
    let mut current = Cow::Borrowed(text);
    for pattern in STRIP_PATTERNS.iter() {
        let replaced = match pattern.replace_all(&current, "") {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            current = Cow::Owned(replaced);
        }
    }

    let trimmed = current.trim();
    let needs_truncate = trimmed.chars().count() > max_chars;
    if !needs_truncate && trimmed.len() == current.len() {
        return current;
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    Cow::Owned(cut)
}
