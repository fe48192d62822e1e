//! Gemini transport for [`RemoteService`].

mod client;
pub mod types;

pub use client::{API_KEY_ENV, DEFAULT_BASE_URL, GeminiClient};

use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::{Role, Turn};
use crate::remote::{RemoteService, Reply};

use types::{
    CountTokensRequest, GeminiContent, GenerateContentRequest, GenerationConfig,
    SystemInstruction,
};

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    /// Model name without the `models/` prefix.
    pub model: String,
    /// Sampling temperature; the service default when `None`.
    pub temperature: Option<f64>,
    /// Reply length limit; the service default when `None`.
    pub max_output_tokens: Option<u32>,
    /// Sequences that end the reply.  Omitted from requests when empty.
    pub stop_sequences: Vec<String>,
}

impl GeminiSettings {
    /// Settings for `model` with every generation option left to the service.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_output_tokens: None,
            stop_sequences: Vec::new(),
        }
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            stop_sequences: if self.stop_sequences.is_empty() {
                None
            } else {
                Some(self.stop_sequences.clone())
            },
        }
    }
}

/// A [`GeminiClient`] bound to one model and system instruction.
pub struct GeminiService {
    client: GeminiClient,
    settings: GeminiSettings,
    system_instruction: RwLock<String>,
}

impl GeminiService {
    /// Binds `client` to `settings`.  No system instruction is installed yet.
    pub fn new(client: GeminiClient, settings: GeminiSettings) -> Self {
        Self {
            client,
            settings,
            system_instruction: RwLock::new(String::new()),
        }
    }

    /// The generation settings.
    pub fn settings(&self) -> &GeminiSettings {
        &self.settings
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.settings.model)
    }
}

#[async_trait::async_trait]
impl RemoteService for GeminiService {
    async fn set_system_instruction(&self, content: &str) -> Result<()> {
        *self.system_instruction.write().await = content.to_string();
        Ok(())
    }

    async fn count_tokens(&self, role: Role, content: &str) -> Result<u64> {
        let (contents, system) = match role {
            // The instruction's overhead is what it adds to a minimal request.
            Role::System => {
                let Some(system) = SystemInstruction::from_text(content) else {
                    return Ok(0);
                };
                (vec![GeminiContent::new("user", " ")], Some(system))
            }
            Role::User | Role::Model => {
                let wire = if role == Role::User { "user" } else { "model" };
                let system = SystemInstruction::from_text(&self.system_instruction.read().await);
                (vec![GeminiContent::new(wire, content)], system)
            }
        };
        let request = CountTokensRequest {
            generate_content_request: GenerateContentRequest {
                model: Some(self.model_path()),
                contents,
                system_instruction: system,
                generation_config: None,
            },
        };
        let response = self
            .client
            .count_tokens(&self.settings.model, &request)
            .await?;
        debug!(%role, tokens = response.total_tokens, "counted tokens");
        Ok(response.total_tokens)
    }

    async fn send_turn(&self, history: Vec<Turn>, timeout: Duration) -> Result<Reply> {
        let request = GenerateContentRequest {
            model: None,
            contents: history.iter().map(GeminiContent::from).collect(),
            system_instruction: SystemInstruction::from_text(
                &self.system_instruction.read().await,
            ),
            generation_config: Some(self.settings.generation_config()),
        };
        let response = self
            .client
            .generate_content(&self.settings.model, &request, Some(timeout))
            .await?;
        match response.text() {
            Some(text) => Ok(Reply::new(text, response.output_tokens())),
            None => {
                let reason = response
                    .blocked_reason()
                    .unwrap_or_else(|| "no candidates".to_string());
                Err(Error::empty_reply(format!(
                    "the model returned no text ({reason})"
                )))
            }
        }
    }
}
