//! `check`: can this machine run the pipeline with this configuration?

use serde::Serialize;
use tracing::debug;

use paperagent_analyzer::required_tools;
use paperagent_shared::{AnalysisConfig, PaperAgentError, Result, mask_api_key, resolve_api_key};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvReport {
    /// Runtime ok and nothing missing. A missing API key does not make the
    /// environment unready; only Stage 4 needs it.
    pub ready: bool,
    /// Emitted as `python_ok`, the key orchestrators of this report read.
    #[serde(rename = "python_ok")]
    pub runtime_ok: bool,
    pub missing_packages: Vec<String>,
    pub api_configured: bool,
    pub api_key_masked: Option<String>,
    pub api_key_env: String,
}

/// Inspect the environment without touching the network.
pub fn check(config: &AnalysisConfig, explicit_key: Option<&str>) -> EnvReport {
    let runtime_ok = match reqwest::Client::builder().build() {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "HTTP client unavailable");
            false
        }
    };

    let missing_packages = missing_tools(required_tools(config.extractor));

    let key = resolve_api_key(config, explicit_key);

    EnvReport {
        ready: runtime_ok && missing_packages.is_empty(),
        runtime_ok,
        missing_packages,
        api_configured: key.is_some(),
        api_key_masked: key.as_deref().map(mask_api_key),
        api_key_env: config.api_key_env.clone(),
    }
}

/// Tools from `tools` that are not on `PATH`.
pub fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| which::which(tool).is_err())
        .map(|tool| tool.to_string())
        .collect()
}

/// Fail with an environment error unless every tool in `tools` is on `PATH`.
pub fn ensure_tools(tools: &[&str]) -> Result<()> {
    let missing = missing_tools(tools);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PaperAgentError::Environment(format!(
            "required tools not found on PATH: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_explicit_key_masked() {
        let config = AnalysisConfig::default();
        let report = check(&config, Some("sk-or-v1-0123456789abcdef"));
        assert!(report.runtime_ok);
        assert!(report.ready);
        assert!(report.missing_packages.is_empty());
        assert!(report.api_configured);
        assert_eq!(report.api_key_masked.as_deref(), Some("sk-or-v1...cdef"));
    }

    #[test]
    fn missing_key_is_not_fatal() {
        let config = AnalysisConfig {
            api_key_env: "PAPER_AGENT_TEST_NO_SUCH_KEY".into(),
            ..AnalysisConfig::default()
        };
        let report = check(&config, None);
        assert!(!report.api_configured);
        assert!(report.api_key_masked.is_none());
        assert!(report.ready);
    }

    #[test]
    fn missing_tool_is_an_environment_error() {
        assert!(ensure_tools(&[]).is_ok());
        let err = ensure_tools(&["paper-agent-no-such-tool"]).unwrap_err();
        assert!(matches!(err, PaperAgentError::Environment(ref m) if m.contains("paper-agent-no-such-tool")));
    }

    #[test]
    fn report_json_uses_orchestrator_keys() {
        let json = serde_json::to_value(check(&AnalysisConfig::default(), None)).unwrap();
        for key in ["ready", "python_ok", "missing_packages", "api_configured", "api_key_masked"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("runtime_ok").is_none());
    }
}
