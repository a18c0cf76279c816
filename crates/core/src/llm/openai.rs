use crate::config::{env_parse, Settings};
use crate::domain::analysis::AnalysisResult;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{json, prompt};
use crate::llm::{AnalysisRequest, LlmClient, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Chat-completions client. Any OpenAI-compatible endpoint (e.g. llm7.io) works
/// by pointing `OPENAI_BASE_URL` at it.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = env_parse::<u32>("OPENAI_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS);
        let timeout_secs = env_parse::<u64>("OPENAI_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);

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

    fn request(&self, req: &AnalysisRequest) -> ChatRequest {
        let user = match &req.previous_output {
            Some(previous) => prompt::repair_prompt(req, previous),
            None => prompt::user_prompt(req),
        };
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.3,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt::system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        }
    }

    async fn create_completion(
        &self,
        body: &ChatRequest,
    ) -> anyhow::Result<(serde_json::Value, ChatResponse)> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("OpenAI-compatible request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read OpenAI-compatible response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAI,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .context("failed to parse OpenAI-compatible response JSON")?;
        let parsed = serde_json::from_value::<ChatResponse>(raw_json.clone())
            .context("failed to decode chat completion response")?;
        Ok((raw_json, parsed))
    }

    fn interpret(
        req: &AnalysisRequest,
        res: &ChatResponse,
        raw_json: serde_json::Value,
    ) -> anyhow::Result<AnalysisResult> {
        let choice = res.choices.first();
        let text = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let truncated = choice.and_then(|c| c.finish_reason.as_deref()) == Some("length");

        json::parse_analysis(&text, &req.snapshot, Provider::OpenAI.as_str()).map_err(|err| {
            let detail = if truncated {
                format!("finish_reason=length; {err:#}")
            } else {
                format!("{err:#}")
            };
            LlmDiagnosticsError {
                provider: Provider::OpenAI,
                stage: "parse",
                detail,
                raw_output: Some(text),
                raw_response_json: Some(raw_json),
            }
            .into()
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn analyze(&self, req: &AnalysisRequest) -> anyhow::Result<AnalysisResult> {
        let (raw_json, res) = self.create_completion(&self.request(req)).await?;
        Self::interpret(req, &res, raw_json)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
