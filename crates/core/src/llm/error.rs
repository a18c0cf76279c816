use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// A provider call that failed in a way worth keeping the raw output for:
/// the engine feeds `raw_output` back as a repair prompt.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// Only malformed model output is worth repairing; transport errors are not.
    pub fn repairable_output(&self) -> Option<&str> {
        match self.stage {
            "parse" | "validate" => self.raw_output.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider, self.stage, self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}
