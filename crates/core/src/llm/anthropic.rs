use crate::config::{env_parse, Settings};
use crate::domain::analysis::AnalysisResult;
use crate::domain::contract::LlmAnalysis;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{json, prompt};
use crate::llm::{AnalysisRequest, LlmClient, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_ANALYSIS: &str = "emit_analysis";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = env_parse::<u32>("ANTHROPIC_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS);
        let timeout_secs = env_parse::<u64>("ANTHROPIC_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .context("failed to parse Anthropic response JSON")?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        let unit = serde_json::json!({"type": "number", "minimum": 0, "maximum": 1});
        let target = serde_json::json!({"type": ["number", "null"], "exclusiveMinimum": 0});
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": [
                "trend_direction", "trend_strength", "risk_score", "recommendation",
                "confidence", "price_target_7d", "price_target_30d", "key_factors", "reasoning"
            ],
            "properties": {
                "trend_direction": {"type": "string", "enum": ["BULLISH", "BEARISH", "SIDEWAYS"]},
                "trend_strength": unit,
                "risk_score": unit,
                "recommendation": {"type": "string", "enum": ["BUY", "HOLD", "SELL"]},
                "confidence": unit,
                "price_target_7d": target,
                "price_target_30d": target,
                "key_factors": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
                "reasoning": {"type": "string", "minLength": 1}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_ANALYSIS,
            description: "Emit the final stock analysis as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_ANALYSIS,
        }
    }

    fn request(&self, req: &AnalysisRequest, max_tokens: u32) -> CreateMessageRequest {
        let content = match &req.previous_output {
            Some(previous) => prompt::repair_prompt(req, previous),
            None => prompt::user_prompt(req),
        };
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            temperature: Some(0.3),
            system: Some(prompt::system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_input(res: &CreateMessageResponse) -> Option<&serde_json::Value> {
        res.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } if name == TOOL_NAME_EMIT_ANALYSIS => {
                Some(input)
            }
            _ => None,
        })
    }

    fn interpret(
        req: &AnalysisRequest,
        res: &CreateMessageResponse,
        raw_json: serde_json::Value,
    ) -> anyhow::Result<AnalysisResult> {
        let provider = Provider::Anthropic;

        // Tool output path.
        if let Some(input) = Self::response_tool_input(res) {
            let parsed = serde_json::from_value::<LlmAnalysis>(input.clone())
                .map_err(anyhow::Error::from)
                .and_then(|a| a.validate_and_into_result(&req.snapshot, provider.as_str()));
            return parsed.map_err(|err| {
                LlmDiagnosticsError {
                    provider,
                    stage: "validate",
                    detail: format!("{err:#}"),
                    raw_output: Some(input.to_string()),
                    raw_response_json: Some(raw_json),
                }
                .into()
            });
        }

        // Fallback to text (should be rare).
        let text = Self::response_text(res);
        json::parse_analysis(&text, &req.snapshot, provider.as_str()).map_err(|err| {
            LlmDiagnosticsError {
                provider,
                stage: "parse",
                detail: format!("{err:#}"),
                raw_output: Some(text),
                raw_response_json: Some(raw_json),
            }
            .into()
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn analyze(&self, req: &AnalysisRequest) -> anyhow::Result<AnalysisResult> {
        let (mut raw_json, mut res) = self.create_message(&self.request(req, self.max_tokens)).await?;

        // If the model hit max_tokens, retry once with a higher ceiling.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(2048);
            tracing::warn!(
                symbol = %req.snapshot.symbol,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (rj, r) = self.create_message(&self.request(req, bumped)).await?;
            raw_json = rj;
            res = r;
        }

        Self::interpret(req, &res, raw_json)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::TrendDirection;
    use crate::domain::market::Category;
    use crate::fixtures::snapshot;
    use serde_json::json;

    fn req() -> AnalysisRequest {
        AnalysisRequest::new(snapshot("NVDA", Category::Risky, 175.0))
    }

    #[test]
    fn parses_tool_use_input() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "...", "signature": "x"},
                {"type": "tool_use", "id": "toolu_1", "name": "emit_analysis", "input": {
                    "trend_direction": "BULLISH",
                    "trend_strength": 0.8,
                    "risk_score": 0.55,
                    "recommendation": "BUY",
                    "confidence": 0.74,
                    "price_target_7d": null,
                    "price_target_30d": 190.0,
                    "key_factors": ["Datacenter demand"],
                    "reasoning": "Momentum intact."
                }}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let r = AnthropicClient::interpret(&req(), &res, json!({})).unwrap();
        assert_eq!(r.symbol, "NVDA");
        assert_eq!(r.category, Category::Risky);
        assert_eq!(r.trend_direction, TrendDirection::Bullish);
        assert_eq!(r.provider, "anthropic");
    }

    #[test]
    fn invalid_tool_input_keeps_raw_output_for_repair() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "emit_analysis", "input": {
                "trend_direction": "UP",
                "trend_strength": 0.8,
                "risk_score": 0.55,
                "recommendation": "BUY",
                "confidence": 0.74,
                "reasoning": "Momentum intact."
            }}]
        }))
        .unwrap();

        let err = AnthropicClient::interpret(&req(), &res, json!({})).unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "validate");
        assert!(diag.repairable_output().unwrap().contains("UP"));
    }

    #[test]
    fn falls_back_to_text_blocks() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "```json\n{\"trend_direction\":\"SIDEWAYS\",\"trend_strength\":0.2,\"risk_score\":0.4,\"recommendation\":\"HOLD\",\"confidence\":0.5,\"key_factors\":[],\"reasoning\":\"Range-bound.\"}\n```"}]
        }))
        .unwrap();
        let r = AnthropicClient::interpret(&req(), &res, json!({})).unwrap();
        assert_eq!(r.confidence, 0.5);
    }

    #[test]
    fn repair_attempt_switches_prompt() {
        let client = AnthropicClient {
            http: reqwest::Client::new(),
            api_key: "k".into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        };
        let mut r = req();
        r.previous_output = Some("{oops".into());
        let body = serde_json::to_value(client.request(&r, 100)).unwrap();
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.contains("{oops"));
        assert_eq!(body["tool_choice"]["name"], "emit_analysis");
    }
}
