//! Condition evaluation for `condition` nodes.
//!
//! The evaluator is total: it never errors on malformed input, and it is
//! side-effect-free. The literal strings `"true"` and `"false"` return
//! themselves; any other condition evaluates to whether the node received
//! any input at all. A richer sandboxed evaluator may replace this, but it
//! must keep both properties.

use serde_json::{json, Map, Value};

/// Evaluate a condition over the node's gathered inputs.
///
/// Returns the node output `{ "passed": bool, "condition": ... }`.
pub fn evaluate(condition: Option<&str>, inputs: &Map<String, Value>) -> Value {
    let passed = match condition.map(str::trim) {
        Some("true") => true,
        Some("false") => false,
        _ => !inputs.is_empty(),
    };

    json!({
        "passed": passed,
        "condition": condition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs_with(key: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), json!({"ok": true}));
        map
    }

    #[test]
    fn test_literal_true_and_false() {
        let empty = Map::new();
        assert_eq!(evaluate(Some("true"), &empty)["passed"], json!(true));
        assert_eq!(evaluate(Some("false"), &inputs_with("a"))["passed"], json!(false));
    }

    #[test]
    fn test_literals_trim_whitespace() {
        let empty = Map::new();
        assert_eq!(evaluate(Some("  true "), &empty)["passed"], json!(true));
    }

    #[test]
    fn test_non_literal_checks_inputs() {
        assert_eq!(
            evaluate(Some("payload.amount > 10"), &inputs_with("a"))["passed"],
            json!(true)
        );
        assert_eq!(
            evaluate(Some("payload.amount > 10"), &Map::new())["passed"],
            json!(false)
        );
    }

    #[test]
    fn test_missing_condition_checks_inputs() {
        assert_eq!(evaluate(None, &inputs_with("a"))["passed"], json!(true));
        assert_eq!(evaluate(None, &Map::new())["passed"], json!(false));
    }

    #[test]
    fn test_condition_echoed_in_output() {
        let out = evaluate(Some("x == 1"), &Map::new());
        assert_eq!(out["condition"], json!("x == 1"));
    }
}
