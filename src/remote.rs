//! The boundary between the ledger core and the remote model service.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::ledger::{Role, Turn};

/// A reply from the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The model's text.
    pub text: String,
    /// Tokens the service billed for generating `text`.
    pub output_tokens: u64,
}

impl Reply {
    /// Creates a new reply.
    pub fn new(text: impl Into<String>, output_tokens: u64) -> Self {
        Self {
            text: text.into(),
            output_tokens,
        }
    }
}

/// Transport to a language-model service.
///
/// Implementations are stateless with respect to the conversation: every
/// [`RemoteService::send_turn`] call carries the full turn history, which the
/// controller projects from its ledger.  The system instruction is part of the
/// service's session configuration and never appears in `history`.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync + 'static {
    /// Counts the tokens of `content` spoken as `role`.
    ///
    /// The count includes whatever fixed overhead the service adds to every
    /// request for the configured system instruction.  For [`Role::System`]
    /// the result is that overhead alone.
    async fn count_tokens(&self, role: Role, content: &str) -> Result<u64>;

    /// Sends the history, whose last turn is the new user turn, and waits at
    /// most `timeout` for the reply.
    ///
    /// A deadline miss is reported as [`crate::Error::Timeout`]; anything else
    /// that goes wrong is a service error.
    async fn send_turn(&self, history: Vec<Turn>, timeout: Duration) -> Result<Reply>;

    /// Installs the system instruction used by later requests.
    async fn set_system_instruction(&self, _content: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<T: RemoteService> RemoteService for Arc<T> {
    async fn set_system_instruction(&self, content: &str) -> Result<()> {
        self.as_ref().set_system_instruction(content).await
    }

    async fn count_tokens(&self, role: Role, content: &str) -> Result<u64> {
        self.as_ref().count_tokens(role, content).await
    }

    async fn send_turn(&self, history: Vec<Turn>, timeout: Duration) -> Result<Reply> {
        self.as_ref().send_turn(history, timeout).await
    }
}
