//! Recovery pipeline for model output.
//!
//! LLMs return JSON in several dialects: raw, wrapped in a fenced code block
//! of any tag, nested under an envelope key, or with computable fields left
//! out. [`recover_json`] runs the extraction strategies in order and
//! [`normalize_framework`] fills the computable fields. Each strategy is a
//! pure function so every stage is testable on its own.

use serde_json::Value;

use super::AgentError;
use crate::model::Framework;

/// Envelope keys a model may wrap its document under. Checked in order.
const WRAPPER_KEYS: [&str; 5] = ["output", "roadmap", "framework", "data", "result"];

/// Recover a JSON document from a model response body.
///
/// Strategies, in order:
/// 1. the body is raw JSON;
/// 2. the body wraps JSON in a fenced block of any tag;
/// 3. the recovered value nests the document under one of
///    {output, roadmap, framework, data, result} (applied repeatedly, so
///    `{"output": {"data": ...}}` unwraps fully).
///
/// # Examples
///
/// ```rust
/// use roadweave::agents::recover_json;
///
/// let body = "```json\n{\"output\": {\"stages\": []}}\n```";
/// let value = recover_json(body).unwrap();
/// assert!(value.get("stages").is_some());
/// ```
pub fn recover_json(body: &str) -> Result<Value, AgentError> {
    let raw = parse_raw(body)
        .or_else(|| parse_fenced(body))
        .ok_or_else(|| AgentError::Parse {
            reason: "no JSON document found in response body".to_string(),
        })?;
    Ok(unwrap_envelopes(raw))
}

/// Strategy 1: the trimmed body parses as-is.
fn parse_raw(body: &str) -> Option<Value> {
    serde_json::from_str(body.trim()).ok()
}

/// Strategy 2: extract the first fenced block, whatever its tag, and parse
/// its interior. Falls back to the widest brace-delimited span for bodies
/// that mix prose with a single JSON object.
fn parse_fenced(body: &str) -> Option<Value> {
    if let Some(open) = body.find("```") {
        let after_tag = &body[open + 3..];
        let content_start = after_tag.find('\n').map(|i| i + 1).unwrap_or(0);
        let content = &after_tag[content_start..];
        if let Some(close) = content.find("```") {
            if let Ok(value) = serde_json::from_str(content[..close].trim()) {
                return Some(value);
            }
        }
    }
    // Prose-wrapped object without a fence.
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end > start {
        serde_json::from_str(body[start..=end].trim()).ok()
    } else {
        None
    }
}

/// Strategy 3: descend through known envelope keys until the value stops
/// being a single-purpose wrapper.
fn unwrap_envelopes(mut value: Value) -> Value {
    loop {
        let inner = match &value {
            Value::Object(map) => WRAPPER_KEYS
                .iter()
                .find_map(|key| map.get(*key))
                .filter(|inner| inner.is_object() || inner.is_array())
                .cloned(),
            _ => None,
        };
        match inner {
            Some(inner) => value = inner,
            None => return value,
        }
    }
}

/// Strategy 4: deserialize a framework document, filling computable fields
/// the model omitted.
///
/// - `stages[i].order` defaults to the 1-based position;
/// - `total_estimated_hours` defaults to the sum of concept hours;
/// - `recommended_completion_weeks` defaults to
///   `ceil(total_hours / target_hours_per_week)`.
pub fn normalize_framework(
    value: Value,
    target_hours_per_week: f64,
) -> Result<Framework, AgentError> {
    let mut framework: Framework =
        serde_json::from_value(value).map_err(|e| AgentError::InvalidDocument {
            what: "framework",
            message: e.to_string(),
        })?;

    if framework.stages.is_empty() {
        return Err(AgentError::InvalidDocument {
            what: "framework",
            message: "framework has no stages".to_string(),
        });
    }

    for (index, stage) in framework.stages.iter_mut().enumerate() {
        if stage.order == 0 {
            stage.order = index as u32 + 1;
        }
    }

    if framework.total_estimated_hours <= 0.0 {
        framework.total_estimated_hours =
            framework.concepts().map(|c| c.estimated_hours).sum();
    }

    if framework.recommended_completion_weeks == 0 {
        let per_week = if target_hours_per_week > 0.0 {
            target_hours_per_week
        } else {
            5.0
        };
        framework.recommended_completion_weeks =
            (framework.total_estimated_hours / per_week).ceil().max(1.0) as u32;
    }

    Ok(framework)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_json_passes_through() {
        let value = recover_json(r#"{"stages": [1, 2]}"#).unwrap();
        assert_eq!(value["stages"][1], 2);
    }

    #[test]
    fn fenced_block_of_any_tag() {
        for tag in ["json", "JSON", "javascript", ""] {
            let body = format!("Here you go:\n```{tag}\n{{\"ok\": true}}\n```\nDone.");
            let value = recover_json(&body).unwrap();
            assert_eq!(value["ok"], true, "tag {tag:?}");
        }
    }

    #[test]
    fn prose_wrapped_object_without_fence() {
        let body = "Sure! The result is {\"score\": 0.9} as requested.";
        let value = recover_json(body).unwrap();
        assert_eq!(value["score"], 0.9);
    }

    #[test]
    fn envelope_keys_unwrap_recursively() {
        let body = r#"{"output": {"data": {"stages": []}}}"#;
        let value = recover_json(body).unwrap();
        assert!(value.get("stages").is_some());
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        let err = recover_json("I could not produce JSON, sorry.").unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[test]
    fn normalization_fills_order_and_totals() {
        // Wrapped + fenced + missing order/total, the full recovery chain.
        let body = "```json\n{\"output\":{\"stages\":[{\"title\":\"S\",\"modules\":[{\"title\":\"M\",\"concepts\":[{\"concept_id\":\"c1\",\"title\":\"C\",\"estimated_hours\":6.0}]}]}]}}\n```";
        let value = recover_json(body).unwrap();
        let framework = normalize_framework(value, 3.0).unwrap();
        assert_eq!(framework.stages[0].order, 1);
        assert_eq!(framework.total_estimated_hours, 6.0);
        assert_eq!(framework.recommended_completion_weeks, 2);
    }

    #[test]
    fn explicit_fields_are_not_overwritten() {
        let value = json!({
            "stages": [
                {"title": "A", "order": 7, "modules": []},
                {"title": "B", "modules": []},
            ],
            "total_estimated_hours": 40.0,
            "recommended_completion_weeks": 4,
        });
        let framework = normalize_framework(value, 10.0).unwrap();
        assert_eq!(framework.stages[0].order, 7);
        assert_eq!(framework.stages[1].order, 2);
        assert_eq!(framework.total_estimated_hours, 40.0);
        assert_eq!(framework.recommended_completion_weeks, 4);
    }

    #[test]
    fn stageless_framework_is_invalid() {
        let err = normalize_framework(json!({"stages": []}), 5.0).unwrap_err();
        assert!(matches!(err, AgentError::InvalidDocument { .. }));
    }
}
