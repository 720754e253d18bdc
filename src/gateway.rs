//! Model gateway: persona-framed chat against a hosted Gemini model.
//!
//! Every call replays the persona preamble followed by the whole session
//! transcript, since the remote side keeps no state between calls.
//! Failures on the chat path never reach the child: they are logged and
//! replaced by a friendly fallback line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::GeminiConfig;
use crate::error::ModelError;
use crate::transcript::{Exchange, Session, Transcript};

pub const PERSONA_INSTRUCTION: &str = "You are Joyna, a friendly robot companion for children. \
You should respond in a warm, age-appropriate way that a child can understand. \
Keep responses simple, encouraging, and positive. Always maintain a safe, supportive tone. \
Never share inappropriate content or complex topics. \
If you're unsure about a topic, redirect to something fun and appropriate.";

pub const PERSONA_OPENING: &str = "Hi! I'm Joyna, your robot friend! \
I'm here to chat, play, and have fun with you. What would you like to talk about?";

pub const FALLBACK_REPLY: &str =
    "I'm sorry, I had trouble processing that. Could you try saying that again?";

/// Fallback API key variable when the configured one is unset.
const FALLBACK_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// A turn-based chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `message` as the next user turn after `history`, returning the
    /// model's reply text.
    async fn send(&self, history: &[Turn], message: &str) -> Result<String, ModelError>;
}

/// Persona preamble followed by every exchange as a user/model turn pair.
pub fn build_context(transcript: &Transcript) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(2 + transcript.len() * 2);
    turns.push(Turn::user(PERSONA_INSTRUCTION));
    turns.push(Turn::model(PERSONA_OPENING));
    for exchange in transcript.exchanges() {
        turns.push(Turn::user(exchange.user_input.clone()));
        turns.push(Turn::model(exchange.response.clone()));
    }
    turns
}

pub struct ModelGateway {
    model: Arc<dyn ChatModel>,
}

impl ModelGateway {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Chat with the persona. Records the exchange on success; on failure
    /// leaves the session untouched and returns [`FALLBACK_REPLY`].
    pub async fn chat(&self, session: &Session, user_input: &str) -> String {
        let context = build_context(&session.snapshot());
        let t_start = Instant::now();

        match self.model.send(&context, user_input).await {
            Ok(response) => {
                info!(
                    "Chat reply in {:.0}ms ({} chars)",
                    t_start.elapsed().as_secs_f64() * 1000.0,
                    response.len()
                );
                session.record(Exchange::new(user_input, response.clone()));
                response
            }
            Err(e) => {
                error!("Chat error: {e}");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

// --- Gemini REST client ---

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: Role,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiClient {
    /// Build a client, reading the API key from the configured environment
    /// variable (falling back to `GEMINI_API_KEY`).
    pub fn new(config: &GeminiConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .or_else(|_| std::env::var(FALLBACK_API_KEY_ENV))
            .ok()
            .filter(|k| !k.trim().is_empty());

        if api_key.is_none() {
            tracing::warn!(
                "No API key in ${} or ${FALLBACK_API_KEY_ENV}; chat will use the fallback reply",
                config.api_key_env
            );
        }

        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GeminiConfig, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
        }
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn send(&self, history: &[Turn], message: &str) -> Result<String, ModelError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::MissingApiKey(self.api_key_env.clone()))?;

        let contents = history
            .iter()
            .map(|turn| Content {
                role: turn.role,
                parts: [Part { text: &turn.text }],
            })
            .chain(std::iter::once(Content {
                role: Role::User,
                parts: [Part { text: message }],
            }))
            .collect();

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        debug!("Sending {} turns to Gemini model '{}'", history.len() + 1, self.model);

        let resp = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&GenerateContentRequest { contents })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        extract_text(parsed)
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorWrapper>(body) {
        Ok(wrapper) => {
            let message = wrapper.error.message.unwrap_or_else(|| body.to_string());
            match wrapper.error.status {
                Some(status) if !status.is_empty() => format!("{status}: {message}"),
                _ => message,
            }
        }
        Err(_) => body.to_string(),
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String, ModelError> {
    let parts = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .ok_or_else(|| ModelError::Malformed("no candidates in response".into()))?;

    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    if text.trim().is_empty() {
        return Err(ModelError::Malformed("candidate has no text".into()));
    }
    Ok(text)
}
