//! HTTP-backed [`ContentGateway`] speaking the OpenAI-compatible API.
//!
//! One client covers all four operations: premises, installments, and
//! evaluations go through chat completions; covers go through image
//! generation. Error mapping matters more than anything else here: rate
//! limits and server errors come back as transient so the orchestrator
//! retries on a later tick, while auth and validation failures do not.

mod parse;
pub mod prompts;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use fabula_core::gateway::{
    ContentGateway, CoverBrief, EvaluationContext, EvaluationDraft, GatewayError,
    GenerationSettings, InstallmentContext, InstallmentDraft, PremiseSeed,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI-compatible gateway client.
pub struct OpenAiGateway {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    image_model: String,
}

impl OpenAiGateway {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        })
    }

    /// Build from `OPENAI_API_KEY`, honoring `FABULA_OPENAI_BASE_URL` for
    /// compatible providers.
    pub fn from_env() -> Result<Self, GatewayError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| GatewayError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let mut gateway = Self::new(api_key)?;
        if let Ok(base_url) = std::env::var("FABULA_OPENAI_BASE_URL") {
            gateway = gateway.with_base_url(base_url);
        }
        Ok(gateway)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    async fn chat(
        &self,
        system: &str,
        user: String,
        settings: &GenerationSettings,
    ) -> Result<ChatOutput, GatewayError> {
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        let mut body = json!({
            "model": model,
            "max_tokens": settings.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if let Some(temperature) = settings.temperature {
            body["temperature"] = json!(temperature);
        }

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Malformed(format!("bad chat response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Malformed("chat response had no choices".to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(model = %model, latency_ms, "chat completion finished");
        Ok(ChatOutput {
            content,
            model,
            total_tokens: parsed.usage.map(|u| u.total_tokens),
            latency_ms,
        })
    }
}

struct ChatOutput {
    content: String,
    model: String,
    total_tokens: Option<u32>,
    latency_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: String,
}

fn map_transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Transient(err.to_string())
}

fn map_status(status: StatusCode, body: &str) -> GatewayError {
    let message = api_error_message(body)
        .unwrap_or_else(|| body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::Transient(format!("{status}: {message}"))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        GatewayError::Config(format!("{status}: {message}"))
    } else {
        GatewayError::Rejected(format!("{status}: {message}"))
    }
}

fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_string)
}

#[async_trait]
impl ContentGateway for OpenAiGateway {
    async fn generate_premise(
        &self,
        settings: &GenerationSettings,
    ) -> Result<PremiseSeed, GatewayError> {
        let output = self
            .chat(prompts::PREMISE_SYSTEM, prompts::premise_prompt(), settings)
            .await?;
        parse::premise_seed(&output.content)
    }

    async fn generate_installment(
        &self,
        ctx: InstallmentContext<'_>,
    ) -> Result<InstallmentDraft, GatewayError> {
        let prompt = prompts::installment_prompt(&ctx);
        let output = self
            .chat(prompts::INSTALLMENT_SYSTEM, prompt, ctx.settings)
            .await?;
        let mut draft = parse::installment_draft(&output.content)?;
        draft.tokens_used = output.total_tokens;
        draft.latency_ms = Some(output.latency_ms);
        draft.model = Some(output.model);
        Ok(draft)
    }

    async fn generate_evaluation(
        &self,
        ctx: EvaluationContext<'_>,
    ) -> Result<EvaluationDraft, GatewayError> {
        let prompt = prompts::evaluation_prompt(&ctx);
        let output = self
            .chat(prompts::EVALUATION_SYSTEM, prompt, ctx.settings)
            .await?;
        parse::evaluation_draft(&output.content)
    }

    async fn generate_cover_image(&self, brief: &CoverBrief) -> Result<String, GatewayError> {
        let body = json!({
            "model": self.image_model,
            "prompt": prompts::cover_prompt(&brief.title, &brief.premise),
            "n": 1,
            "size": "1024x1024",
        });
        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }
        let parsed: ImageResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Malformed(format!("bad image response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or_else(|| GatewayError::Malformed("image response had no data".to_string()))
    }
}
