//! Extraction prompt and response parsing.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use paperagent_shared::{PaperAgentError, Result};

/// Leading/trailing Markdown code fence, with optional language tag.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*(.*?)\s*```\s*$").expect("fence regex"));

/// Separator used when the model answers a field with a list.
const LIST_SEPARATOR: &str = "; ";

/// Build the fixed extraction prompt for `fields` over `paper_text`.
pub fn build_prompt(fields: &[String], paper_text: &str) -> String {
    let keys = fields
        .iter()
        .map(|f| format!("  \"{f}\": \"...\""))
        .collect::<Vec<_>>()
        .join(",\n");
    let descriptions = fields
        .iter()
        .map(|f| format!("- {f}: {}", describe(f)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a senior researcher reading an academic paper. Extract the \
requested information from the paper text below.\n\n\
Fields:\n{descriptions}\n\n\
Answer with a single JSON object and nothing else, using exactly these keys:\n\
{{\n{keys}\n}}\n\n\
Each value is a concise string (or a list of strings). If the paper does not \
state something, answer \"Not mentioned\". Do not add opinions.\n\n\
--- PAPER TEXT ---\n{paper_text}\n--- END PAPER TEXT ---\n"
    )
}

fn describe(field: &str) -> &'static str {
    match field {
        "method" => "the core technique, its key components, and what distinguishes it from prior work",
        "contribution" => "the main theoretical and practical contributions",
        "key_results" => "datasets, metrics, and headline numbers compared with the state of the art",
        "limitations" => "limitations acknowledged by the authors or evident from the experiments",
        "background" => "the research problem and the shortcomings of existing approaches",
        "open_source" => "whether code, models, or data are released, with links",
        _ => "as described by the paper",
    }
}

/// Parse the model's reply into a value per field.
///
/// Accepts fenced or bare JSON, string or string-list values. Every field
/// must be present; extra keys are ignored.
pub fn parse_response(raw: &str, fields: &[String]) -> Result<BTreeMap<String, String>> {
    let body = strip_fences(raw);
    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(PaperAgentError::parse("model reply is not a JSON object")),
        // Prose around the object: fall back to the outermost braces.
        Err(first) => match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                match serde_json::from_str::<Value>(&body[start..=end]) {
                    Ok(Value::Object(map)) => map,
                    _ => return Err(PaperAgentError::parse(format!("model reply is not JSON: {first}"))),
                }
            }
            _ => return Err(PaperAgentError::parse(format!("model reply is not JSON: {first}"))),
        },
    };

    let mut out = BTreeMap::new();
    for field in fields {
        let value = object
            .get(field)
            .ok_or_else(|| PaperAgentError::parse(format!("model reply is missing `{field}`")))?;
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(PaperAgentError::parse(format!(
                        "`{field}` list holds a non-string: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?
                .join(LIST_SEPARATOR),
            other => {
                return Err(PaperAgentError::parse(format!(
                    "`{field}` has unsupported value: {other}"
                )));
            }
        };
        out.insert(field.clone(), text);
    }
    Ok(out)
}

fn strip_fences(raw: &str) -> &str {
    match FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

/// First `max_chars` characters of `text`, and whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        ["method", "contribution"].map(String::from).to_vec()
    }

    #[test]
    fn prompt_lists_every_key() {
        let p = build_prompt(&fields(), "BODY");
        assert!(p.contains("\"method\": \"...\""));
        assert!(p.contains("\"contribution\": \"...\""));
        assert!(p.contains("- method: the core technique"));
        assert!(p.contains("BODY"));
    }

    #[test]
    fn parses_fenced_json_with_lists() {
        let raw = "```json\n{\"method\": \" Diffusion \", \"contribution\": [\"a\", \"b\"], \"extra\": 1}\n```";
        let out = parse_response(raw, &fields()).unwrap();
        assert_eq!(out["method"], "Diffusion");
        assert_eq!(out["contribution"], "a; b");
        assert!(!out.contains_key("extra"));
    }

    #[test]
    fn tolerates_prose_around_object() {
        let raw = "Here you go:\n{\"method\": \"m\", \"contribution\": \"c\"}\nHope that helps.";
        assert_eq!(parse_response(raw, &fields()).unwrap()["contribution"], "c");
    }

    #[test]
    fn missing_or_malformed_fields_fail() {
        assert!(parse_response("{\"method\": \"m\"}", &fields()).is_err());
        assert!(parse_response("{\"method\": 3, \"contribution\": \"c\"}", &fields()).is_err());
        assert!(parse_response("no json here", &fields()).is_err());
        assert!(parse_response("[1, 2]", &fields()).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), ("hé", true));
        assert_eq!(truncate_chars("abc", 3), ("abc", false));
        assert_eq!(truncate_chars("", 0), ("", false));
    }
}
