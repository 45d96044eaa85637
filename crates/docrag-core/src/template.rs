//! `[placeholder]` substitution for report templates.
//!
//! Substitution is a single left-to-right pass over the template. Text
//! produced by a replacement is never scanned again, so a value that
//! itself contains `[other]` is written verbatim and the result does not
//! depend on the order of keys in the context.

use serde_json::{Map, Value};

/// String form of a context value: strings verbatim, everything else as
/// compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `[key]` whose key is present in `context`.
///
/// Unknown placeholders and unbalanced brackets are left untouched.
///
/// ```rust
/// use docrag_core::template::merge_template;
/// use serde_json::json;
///
/// let ctx = json!({"name": "Alice"});
/// let out = merge_template("Hi [name], see [ref].", ctx.as_object().unwrap());
/// assert_eq!(out, "Hi Alice, see [ref].");
/// ```
pub fn merge_template(template: &str, context: &Map<String, Value>) -> String {
    if context.is_empty() {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find(']').and_then(|close| {
            context
                .get(&after[..close])
                .map(|value| (value_to_text(value), close))
        });
        match replaced {
            Some((text, close)) => {
                out.push_str(&text);
                rest = &after[close + 1..];
            }
            None => {
                out.push('[');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let out = merge_template("[name] and [name]", &ctx(json!({"name": "Alice"})));
        assert_eq!(out, "Alice and Alice");
    }

    #[test]
    fn test_unmatched_placeholders_kept() {
        let out = merge_template("[a] [b] [", &ctx(json!({"a": "1"})));
        assert_eq!(out, "1 [b] [");
    }

    #[test]
    fn test_non_string_values_use_json_form() {
        let out = merge_template(
            "[n] [flag] [list]",
            &ctx(json!({"n": 42, "flag": true, "list": [1, 2]})),
        );
        assert_eq!(out, "42 true [1,2]");
    }

    #[test]
    fn test_replacement_is_not_rescanned() {
        let context = ctx(json!({"a": "[b]", "b": "B"}));
        assert_eq!(merge_template("[a] [b]", &context), "[b] B");

        let reversed = ctx(json!({"b": "B", "a": "[b]"}));
        assert_eq!(merge_template("[a] [b]", &reversed), "[b] B");
    }

    #[test]
    fn test_nested_brackets() {
        let out = merge_template("[[name]]", &ctx(json!({"name": "Alice"})));
        assert_eq!(out, "[Alice]");
    }

    #[test]
    fn test_empty_context_is_identity() {
        assert_eq!(merge_template("[x]", &Map::new()), "[x]");
    }
}
