//! Normalization of the free-form `Action Input` a model sends to a tool.

use serde_json::Value;

use newsagent_shared::{NewsAgentError, Result};

/// Keys a structured payload may carry the query under, in priority order.
const QUERY_KEYS: [&str; 2] = ["query", "description"];

/// A tool query reduced to plain text.
///
/// Accepts a JSON object with a `query` or `description` string, a JSON
/// string, or bare text. Surrounding code fences and quotes are stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolQuery(String);

impl ToolQuery {
    pub fn parse(raw: &str) -> Result<Self> {
        let body = strip_fences(raw.trim());
        if body.is_empty() {
            return Err(NewsAgentError::validation("tool input is empty"));
        }

        let text = if body.starts_with('{') || body.starts_with('"') {
            match serde_json::from_str::<Value>(body) {
                Ok(Value::String(s)) => s,
                Ok(Value::Object(map)) => QUERY_KEYS
                    .iter()
                    .find_map(|k| match map.get(*k) {
                        Some(Value::String(s)) => Some(s.clone()),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        NewsAgentError::validation(
                            "tool input object has no string `query` or `description` field",
                        )
                    })?,
                Ok(_) => {
                    return Err(NewsAgentError::validation("tool input must be text or an object"));
                }
                Err(e) if body.starts_with('{') => {
                    return Err(NewsAgentError::validation(format!(
                        "tool input is not valid JSON: {e}"
                    )));
                }
                Err(_) => body.trim_matches('"').to_string(),
            }
        } else {
            body.to_string()
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(NewsAgentError::validation("tool query is empty"));
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence.
    let rest = match rest.find('\n') {
        Some(pos) if !rest[..pos].contains(['{', '"']) => &rest[pos + 1..],
        _ => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_text_passes_through() {
        let q = ToolQuery::parse("  AI in healthcare  ").unwrap();
        assert_eq!(q.as_str(), "AI in healthcare");
    }

    #[test]
    fn object_with_query_or_description() {
        assert_eq!(
            ToolQuery::parse(r#"{"query": "diagnostic imaging"}"#).unwrap().as_str(),
            "diagnostic imaging"
        );
        assert_eq!(
            ToolQuery::parse(r#"{"description": "clinical trials", "type": "str"}"#)
                .unwrap()
                .as_str(),
            "clinical trials"
        );
    }

    #[test]
    fn json_string_is_unwrapped() {
        assert_eq!(ToolQuery::parse(r#""wearables""#).unwrap().as_str(), "wearables");
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "```json\n{\"query\": \"drug discovery\"}\n```";
        assert_eq!(ToolQuery::parse(raw).unwrap().as_str(), "drug discovery");
    }

    #[test]
    fn malformed_and_empty_inputs_are_rejected() {
        assert!(ToolQuery::parse("").is_err());
        assert!(ToolQuery::parse("   ").is_err());
        assert!(ToolQuery::parse(r#"{"query": "#).is_err());
        assert!(ToolQuery::parse(r#"{"limit": 3}"#).is_err());
        assert!(ToolQuery::parse(r#"{"query": "   "}"#).is_err());
        assert!(ToolQuery::parse("[1, 2]").is_ok());
    }
}
