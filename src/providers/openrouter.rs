//! OpenRouter text generation.
//!
//! Routes all narrative calls (event text, commentator takes, neutral tips,
//! coaching) through OpenRouter's OpenAI-compatible chat completions API.
//! Responses are requested as JSON and parsed leniently: models often wrap
//! the object in prose, so the first JSON object/array is extracted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    extract_json, CoachingProvider, CommentaryProvider, EventProvider, GeneratedEvent,
    ProviderResult, TipProvider,
};
use crate::behavior::CoachingRequest;
use crate::types::{
    CognitiveBias, Commentary, CommentatorStance, EventType, MarketEvent, PricePattern,
    VolatilityLevel,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Maximum retries on rate limit / server errors per model attempt.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const EVENT_SYSTEM: &str = "You write short, realistic market event scenarios for a trading education game. \
Respond with JSON only: {\"description\": string, \"horizon_days\": integer 1-10}.";

const COMMENTARY_SYSTEM: &str = "You play a persuasive but biased market commentator in a trading education game. \
Push the player toward an emotional decision using one cognitive bias: Fear Appeal, Overconfidence, \
Authority Lure or Recency Bias. Respond with JSON only: \
{\"text\": string (max 2 sentences), \"stance\": \"Bullish\"|\"Bearish\", \"bias\": string}.";

const TIP_SYSTEM: &str = "You are a neutral trading coach. Give one evidence-based sentence of context \
without recommending a specific action.";

const COACHING_SYSTEM: &str = "You are a supportive trading coach. Write 2-4 specific, actionable coaching \
tips (1-2 sentences each) that reference the player's actual decisions. Respond with a JSON array of strings.";

#[derive(Debug, Deserialize)]
struct EventReply {
    description: String,
    #[serde(default)]
    horizon_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CommentaryReply {
    text: String,
    stance: String,
    #[serde(default)]
    bias: Option<String>,
}

fn parse_event(text: &str, event_type: EventType) -> Result<GeneratedEvent> {
    let json = extract_json(text).context("No JSON object in event reply")?;
    let reply: EventReply = serde_json::from_str(json).context("Malformed event reply")?;
    let description = reply.description.trim().to_string();
    anyhow::ensure!(!description.is_empty(), "Empty event description");
    Ok(GeneratedEvent {
        description,
        horizon_days: reply.horizon_days.unwrap_or_else(|| event_type.default_horizon()),
    })
}

fn parse_commentary(text: &str) -> Result<Commentary> {
    let json = extract_json(text).context("No JSON object in commentary reply")?;
    let reply: CommentaryReply = serde_json::from_str(json).context("Malformed commentary reply")?;
    let stance: CommentatorStance = reply.stance.parse()?;
    let bias = reply
        .bias
        .as_deref()
        .and_then(|b| b.parse::<CognitiveBias>().ok())
        .unwrap_or(match stance {
            CommentatorStance::Bearish => CognitiveBias::FearAppeal,
            CommentatorStance::Bullish => CognitiveBias::Overconfidence,
        });
    Ok(Commentary {
        text: reply.text.trim().to_string(),
        stance,
        bias,
    })
}

/// JSON array if present, otherwise one tip per non-empty line.
fn parse_tips(text: &str) -> Vec<String> {
    if let Some(json) = extract_json(text) {
        if let Ok(tips) = serde_json::from_str::<Vec<String>>(json) {
            return tips;
        }
    }
    text.lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: Secret<String>,
    primary_model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    total_calls: AtomicU64,
    total_tokens: AtomicU64,
}

impl OpenRouterClient {
    pub fn new(
        api_key: String,
        primary_model: String,
        fallback_model: Option<String>,
        max_tokens: u32,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key: Secret::new(api_key),
            primary_model,
            fallback_model,
            max_tokens,
            total_calls: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        })
    }

    /// Send a chat completion request for a specific model, with retry +
    /// exponential backoff on 429 and 5xx.
    async fn call_model(&self, model: &str, system: &str, user_message: &str) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model, "Retrying OpenRouter API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(OPENROUTER_API_URL)
                .bearer_auth(self.api_key.expose_secret())
                .header("X-Title", "Market Mayhem")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenRouter response")?;

                        let text = body
                            .choices
                            .first()
                            .and_then(|c| c.message.as_ref())
                            .map(|m| m.content.clone())
                            .unwrap_or_default();

                        let tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0);
                        self.total_calls.fetch_add(1, Ordering::Relaxed);
                        self.total_tokens.fetch_add(tokens as u64, Ordering::Relaxed);

                        return Ok(text);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(
                            status = %status,
                            attempt,
                            model,
                            error = %error_text,
                            "Retryable OpenRouter error"
                        );
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("OpenRouter API error {status} (model={model}): {error_text}");
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "OpenRouter API failed after {} retries (model={}): {}",
            MAX_RETRIES,
            model,
            last_error.unwrap_or_default()
        )
    }

    /// Call the primary model, falling back to the secondary on failure.
    async fn complete(&self, system: &str, user_message: &str) -> Result<String> {
        match self.call_model(&self.primary_model, system, user_message).await {
            Ok(text) => Ok(text),
            Err(primary_err) => match &self.fallback_model {
                Some(fallback) => {
                    warn!(
                        primary = %self.primary_model,
                        fallback = %fallback,
                        error = %primary_err,
                        "Primary model failed, falling back"
                    );
                    self.call_model(fallback, system, user_message)
                        .await
                        .with_context(|| {
                            format!(
                                "Both primary ({}) and fallback ({}) models failed. Primary error: {}",
                                self.primary_model, fallback, primary_err
                            )
                        })
                }
                None => Err(primary_err),
            },
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Capability implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl EventProvider for OpenRouterClient {
    async fn generate(&self, ticker: &str, event_type: EventType) -> ProviderResult<GeneratedEvent> {
        let prompt = format!(
            "Ticker: {ticker}\nEvent type: {}\nTypical horizon: {} trading days\n\
             Write a one-sentence {} scenario for {ticker}.",
            event_type,
            event_type.default_horizon(),
            event_type.phrase()
        );
        let text = self.complete(EVENT_SYSTEM, &prompt).await?;
        Ok(parse_event(&text, event_type)?)
    }
}

#[async_trait]
impl CommentaryProvider for OpenRouterClient {
    async fn take(
        &self,
        event: &MarketEvent,
        rational_baseline: Option<CommentatorStance>,
    ) -> ProviderResult<Commentary> {
        let lean = match rational_baseline {
            Some(b) => format!("A rational reader would lean {b}; argue the {} case.", b.opposite()),
            None => "Pick whichever side sounds most alarming or exciting.".to_string(),
        };
        let prompt = format!(
            "Event for {}: {}\nHorizon: {} trading days\n{lean}",
            event.ticker, event.description, event.horizon_days
        );
        let text = self.complete(COMMENTARY_SYSTEM, &prompt).await?;
        Ok(parse_commentary(&text)?)
    }
}

#[async_trait]
impl TipProvider for OpenRouterClient {
    async fn neutral_tip(
        &self,
        event_type: EventType,
        pattern: PricePattern,
        volatility: VolatilityLevel,
    ) -> ProviderResult<String> {
        let prompt = format!(
            "Event type: {}\nPrice pattern: {}\nVolatility: {volatility}\n\
             Share one neutral historical insight relevant to this setup.",
            event_type.phrase(),
            pattern.description()
        );
        let text = self.complete(TIP_SYSTEM, &prompt).await?;
        let tip = text.trim().to_string();
        if tip.is_empty() {
            return Err(super::ProviderError::Failed("empty tip".to_string()));
        }
        Ok(tip)
    }
}

#[async_trait]
impl CoachingProvider for OpenRouterClient {
    async fn coaching(&self, request: &CoachingRequest) -> ProviderResult<Vec<String>> {
        let summary = serde_json::to_string(request).map_err(anyhow::Error::from)?;
        let prompt = format!(
            "Profile: {}\nSession summary (JSON): {summary}\nGenerate the coaching tips now.",
            request.classification
        );
        let text = self.complete(COACHING_SYSTEM, &prompt).await?;
        debug!(calls = self.total_calls(), tokens = self.total_tokens(), "Coaching generated");
        Ok(parse_tips(&text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
