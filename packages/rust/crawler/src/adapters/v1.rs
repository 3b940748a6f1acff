use serde_json::Value;

use super::{ApiAdapter, DEFAULT_SUBMISSION_NAME};

/// API v1 (`api.openreview.net`): content fields hold values directly.
pub struct V1Adapter;

impl ApiAdapter for V1Adapter {
    fn field<'a>(&self, content: &'a Value, key: &str) -> Option<&'a Value> {
        content.get(key)
    }

    // v1 venues do not publish a submission name on the group.
    fn submission_name(&self, _group: &Value) -> String {
        DEFAULT_SUBMISSION_NAME.to_string()
    }

    fn name(&self) -> &str {
        "v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_plain_values() {
        let content = json!({"title": "T"});
        assert_eq!(V1Adapter.field(&content, "title"), Some(&json!("T")));
        assert_eq!(V1Adapter.submission_name(&json!({"content": {}})), "Submission");
    }
}
