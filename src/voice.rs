//! Voice client: listen → chat → speak → listen.
//!
//! Talks to the chat server over HTTP. Transport failures are answered
//! locally with the same friendly fallback the server uses.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::gateway::FALLBACK_REPLY;
use crate::speech::input::{RecognitionEngine, SpeechInputLoop};
use crate::speech::output::SpeechOutput;

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Deserialize)]
struct SuccessResponse {
    success: bool,
}

pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn chat(&self, message: &str) -> Result<String, reqwest::Error> {
        let resp: ChatResponse = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&json!({ "message": message }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.response)
    }

    /// Ask the server to summarize the session into its history log.
    pub async fn append_history(&self) -> Result<bool, reqwest::Error> {
        let resp: SuccessResponse = self
            .client
            .post(format!("{}/append-history", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.success)
    }
}

/// Run the interaction loop until listening is stopped. `on_turn` sees each
/// (utterance, reply) pair before the reply is spoken. Returns the number
/// of turns taken.
pub async fn run_conversation<E, F>(
    listener: &mut SpeechInputLoop<E>,
    chat: &ChatClient,
    speaker: &SpeechOutput,
    mut on_turn: F,
) -> usize
where
    E: RecognitionEngine,
    F: FnMut(&str, &str),
{
    let mut turns = 0;

    while let Some(utterance) = listener.next_utterance().await {
        let reply = match chat.chat(&utterance).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Chat request failed: {e}");
                FALLBACK_REPLY.to_string()
            }
        };
        on_turn(&utterance, &reply);

        match speaker.speak(&reply).await {
            Ok(outcome) if outcome.cancelled => info!("Reply interrupted"),
            Ok(_) => {}
            Err(e) => warn!("TTS error: {e}"),
        }
        turns += 1;
    }

    info!("Conversation ended after {turns} turns");
    turns
}
