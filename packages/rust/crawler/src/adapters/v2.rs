use serde_json::Value;

use super::{ApiAdapter, DEFAULT_SUBMISSION_NAME};

/// API v2 (`api2.openreview.net`): every content field is `{"value": ...}`.
pub struct V2Adapter;

impl ApiAdapter for V2Adapter {
    fn field<'a>(&self, content: &'a Value, key: &str) -> Option<&'a Value> {
        content.get(key)?.get("value")
    }

    fn submission_name(&self, group: &Value) -> String {
        group
            .get("content")
            .and_then(|c| self.field(c, "submission_name"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SUBMISSION_NAME)
            .to_string()
    }

    fn name(&self) -> &str {
        "v2"
    }
}
