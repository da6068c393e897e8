//! Chat completion client for troubleshooting suggestions
//!
//! Handlers talk to an [`AiAssistant`]; production uses
//! [`OpenAiAssistant`], tests plug in a canned implementation.
//!
//! Three prompts are used:
//!
//! - a short suggestion stored on every new ticket,
//! - follow-up questions about a ticket, with the ticket as context,
//! - free-form IT questions.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OpenAiConfig;

/// Stored on a ticket when no suggestion could be generated
pub const SUGGESTION_FALLBACK: &str = "Unable to generate AI suggestion at this time.";

/// Returned to the caller when a chat completion fails
pub const CHAT_APOLOGY: &str = "I apologize, but I encountered an error. Please try again later.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("AI assistant is not configured")]
    NotConfigured,

    #[error("Request to AI provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("AI provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("AI provider returned no choices")]
    EmptyResponse,
}

/// A single-turn chat completion request
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: &'static str,
    pub user: String,
    pub max_tokens: u32,
}

impl Prompt {
    /// Suggestion generated when a ticket is created
    pub fn ticket_suggestion(title: &str, description: &str) -> Self {
        Self {
            system: "You are a helpful IT support assistant. Provide a brief, helpful suggestion \
                     for troubleshooting the following computer issue. Be specific and practical.",
            user: format!("Issue Title: {}\nDescription: {}", title, description),
            max_tokens: 200,
        }
    }

    /// Follow-up question asked from a ticket page
    pub fn ticket_chat(title: &str, description: &str, question: &str) -> Self {
        Self {
            system: "You are a helpful IT support assistant. Provide specific and practical \
                     solutions for the following computer issue.",
            user: format!(
                "Ticket Title: {}\nDescription: {}\nUser Question: {}",
                title, description, question
            ),
            max_tokens: 200,
        }
    }

    /// Free-form question from the dashboard assistant
    pub fn general(message: &str) -> Self {
        Self {
            system: "You are a helpful IT support assistant. Provide specific and practical \
                     solutions for technical issues.",
            user: message.to_string(),
            max_tokens: 150,
        }
    }
}

#[async_trait]
pub trait AiAssistant: Send + Sync {
    /// Returns the assistant's reply to `prompt`
    async fn complete(&self, prompt: &Prompt) -> Result<String, AssistantError>;
}

/// Best-effort suggestion for a new ticket
///
/// Never fails; provider errors are logged and replaced by
/// [`SUGGESTION_FALLBACK`].
pub async fn suggest_fix(assistant: &dyn AiAssistant, title: &str, description: &str) -> String {
    match assistant
        .complete(&Prompt::ticket_suggestion(title, description))
        .await
    {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "AI suggestion failed, storing placeholder");
            SUGGESTION_FALLBACK.to_string()
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions over HTTPS
#[derive(Clone)]
pub struct OpenAiAssistant {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiAssistant {
    pub fn new(config: &OpenAiConfig) -> Result<Self, AssistantError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base)
    }
}

#[async_trait]
impl AiAssistant for OpenAiAssistant {
    async fn complete(&self, prompt: &Prompt) -> Result<String, AssistantError> {
        if self.api_key.is_empty() {
            return Err(AssistantError::NotConfigured);
        }

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: prompt.max_tokens,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "AI provider rejected completion request");
            return Err(AssistantError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(AssistantError::EmptyResponse)
    }
}
