//! Core chat session management.
//!
//! `ChatSession` connects parsed commands and typed messages to the
//! [`RequestLifecycleController`].  It holds no conversation state of its
//! own beyond files waiting to be attached to the next message.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::chat::attach::{Attachment, compose_with_files, read_attachments};
use crate::chat::commands::{ChatCommand, help_text, parse_command};
use crate::chat::config::ChatConfig;
use crate::chat::render::Renderer;
use crate::controller::{RequestLifecycleController, TurnReceipt};
use crate::error::Result;
use crate::persistence::{ExportFormat, SessionFile, StoredTurn};
use crate::remote::RemoteService;

/// Whether the REPL should keep reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Read the next line.
    Continue,
    /// Exit.
    Quit,
}

/// A chat session over a remote service.
pub struct ChatSession<R: RemoteService> {
    controller: RequestLifecycleController<R>,
    config: ChatConfig,
    attachments: Vec<Attachment>,
}

impl<R: RemoteService> ChatSession<R> {
    /// Creates a new chat session with the given remote and configuration.
    pub fn new(remote: R, config: ChatConfig) -> Self {
        Self::from_shared(Arc::new(remote), config)
    }

    /// Like [`Self::new`] for a remote that is shared with other owners.
    pub fn from_shared(remote: Arc<R>, config: ChatConfig) -> Self {
        let controller = RequestLifecycleController::from_shared(
            remote,
            config.system_instruction.clone(),
            config.resolved_pricing(),
        )
        .with_timeout(config.timeout);
        Self {
            controller,
            config,
            attachments: Vec::new(),
        }
    }

    /// Installs and measures the system instruction.
    ///
    /// A failure is reported and the session continues with a zero count.
    pub async fn start(&mut self, renderer: &mut dyn Renderer) {
        match self.controller.initialize().await {
            Ok(tokens) => debug!(tokens, "session started"),
            Err(err) => renderer.print_error(&format!(
                "Could not measure the system instruction ({err}); counting it as 0 tokens."
            )),
        }
    }

    /// The lifecycle controller.
    pub fn controller(&self) -> &RequestLifecycleController<R> {
        &self.controller
    }

    /// The lifecycle controller, for mutation.
    pub fn controller_mut(&mut self) -> &mut RequestLifecycleController<R> {
        &mut self.controller
    }

    /// The configuration the session started with.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Returns true if files are waiting to be attached.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Handles one line of input: a command, or a message to send.
    pub async fn handle_line(&mut self, line: &str, renderer: &mut dyn Renderer) -> SessionControl {
        let line = line.trim();
        if line.is_empty() && !self.has_attachments() {
            return SessionControl::Continue;
        }
        match parse_command(line) {
            Some(command) => self.handle_command(command, renderer).await,
            None => {
                // The renderer has already shown the error.
                if let Err(err) = self.send_message(line, renderer).await {
                    debug!(error = %err, "turn not answered");
                }
                SessionControl::Continue
            }
        }
    }

    /// Sends `message`, carrying any pending attachments, and renders the
    /// outcome.
    pub async fn send_message(
        &mut self,
        message: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<TurnReceipt> {
        let text = if self.attachments.is_empty() {
            message.to_string()
        } else {
            compose_with_files(&std::mem::take(&mut self.attachments), message)
        };
        let before = self.controller.ledger().len();
        match self.controller.send(text).await {
            Ok(receipt) => {
                renderer.print_reply(&receipt.reply.text);
                renderer.print_receipt(&receipt);
                Ok(receipt)
            }
            Err(err) => {
                renderer.print_error(&err.to_string());
                if self.controller.ledger().len() > before {
                    renderer.print_info(&format!(
                        "Entry {before} was recorded without a reply; /delete {before} removes it."
                    ));
                }
                Err(err)
            }
        }
    }

    /// Executes a parsed command.
    pub async fn handle_command(
        &mut self,
        command: ChatCommand,
        renderer: &mut dyn Renderer,
    ) -> SessionControl {
        debug!(?command, "command");
        match command {
            ChatCommand::Quit => return SessionControl::Quit,
            ChatCommand::Help => renderer.print_info(&help_text()),
            ChatCommand::Invalid(message) => renderer.print_error(&message),
            ChatCommand::Delete(indices) => self.delete(indices, renderer),
            ChatCommand::View(index) => match self.controller.view(index) {
                Ok(message) => {
                    let cost = self.controller.retained_cost(index).unwrap_or(0.0);
                    renderer.print_entry(index, message, cost);
                }
                Err(err) => renderer.print_error(&err.to_string()),
            },
            ChatCommand::History => renderer.print_history(&self.controller.ledger_view()),
            ChatCommand::Clear => match self.controller.clear() {
                Ok(()) => renderer.print_info("Conversation cleared."),
                Err(err) => renderer.print_error(&err.to_string()),
            },
            ChatCommand::Save { path, format } => {
                let format = format.unwrap_or_else(|| ExportFormat::from_path(&path));
                match self.controller.snapshot().export_to(&path, format) {
                    Ok(()) if format.is_loadable() => {
                        renderer.print_info(&format!("Session saved to {path}"))
                    }
                    Ok(()) => renderer.print_info(&format!(
                        "Session exported to {path} (this format cannot be loaded back)"
                    )),
                    Err(err) => renderer.print_error(&format!("Failed to save session: {err}")),
                }
            }
            ChatCommand::SaveMessage {
                index,
                path,
                format,
            } => {
                let format = format.unwrap_or_else(|| ExportFormat::from_path(&path));
                match self.save_message(index, &path, format) {
                    Ok(()) if format.is_loadable() => {
                        renderer.print_info(&format!("Entry {index} saved to {path}"))
                    }
                    Ok(()) => renderer.print_info(&format!(
                        "Entry {index} exported to {path} (this format cannot be imported back)"
                    )),
                    Err(err) => renderer.print_error(&format!("Failed to save message: {err}")),
                }
            }
            ChatCommand::Load(path) => match self.load(&path) {
                Ok(count) => renderer.print_info(&format!("Loaded {count} turns from {path}")),
                Err(err) => renderer.print_error(&format!("Failed to load session: {err}")),
            },
            ChatCommand::Import(path) => match self.import(&path) {
                Ok(index) => renderer.print_info(&format!("Imported message as entry {index}")),
                Err(err) => renderer.print_error(&format!("Failed to import message: {err}")),
            },
            ChatCommand::Attach(paths) => {
                let (attached, errors) = read_attachments(&paths);
                for err in errors {
                    renderer.print_error(&err.to_string());
                }
                for attachment in &attached {
                    renderer.print_info(&format!("Attached {}", attachment.path.display()));
                }
                self.attachments.extend(attached);
            }
            ChatCommand::Timeout(secs) => {
                self.controller.set_timeout(Duration::from_secs(secs));
                renderer.print_info(&format!("Timeout set to {secs} seconds"));
            }
            ChatCommand::System(None) => {
                let system = self.controller.ledger().system();
                renderer.print_entry(
                    0,
                    system,
                    self.controller.retained_cost(0).unwrap_or(0.0),
                );
            }
            ChatCommand::System(Some(instruction)) => {
                match self.controller.set_system_instruction(instruction).await {
                    Ok(tokens) => {
                        renderer.print_info(&format!("System instruction set ({tokens} tokens)"))
                    }
                    Err(err) => renderer.print_error(&format!(
                        "System instruction set, but could not be measured: {err}"
                    )),
                }
            }
            ChatCommand::Stats => renderer.print_summary(&self.controller.session_summary()),
            ChatCommand::ShowConfig => self.print_config(renderer),
        }
        SessionControl::Continue
    }

    fn delete(&mut self, indices: Vec<usize>, renderer: &mut dyn Renderer) {
        let report = match self.controller.remove_batch(indices) {
            Ok(report) => report,
            Err(err) => {
                renderer.print_error(&err.to_string());
                return;
            }
        };
        for (_, err) in report.failed() {
            renderer.print_error(&err.to_string());
        }
        let mut removed = report.removed();
        if !removed.is_empty() {
            removed.sort_unstable();
            let list: Vec<String> = removed.iter().map(usize::to_string).collect();
            renderer.print_info(&format!("Deleted entries {}", list.join(", ")));
        }
    }

    fn save_message(&self, index: usize, path: &str, format: ExportFormat) -> Result<()> {
        self.controller.stored_turn(index)?.export_to(path, format)
    }

    fn load(&mut self, path: &str) -> Result<usize> {
        let file = SessionFile::load(path)?;
        self.controller.import_turns(file.turns)
    }

    fn import(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let turn = StoredTurn::load(path)?;
        self.controller.import_turns([turn])?;
        Ok(self.controller.ledger().len() - 1)
    }

    fn print_config(&self, renderer: &mut dyn Renderer) {
        let pricing = self.controller.pricing();
        let mut lines = vec![
            "    Current Configuration:".to_string(),
            format!("      Model: {}", self.config.model),
            format!(
                "      Timeout: {} seconds",
                self.controller.timeout().as_secs_f64()
            ),
            format!(
                "      Temperature: {}",
                self.config
                    .temperature
                    .map(|t| format!("{t:.2}"))
                    .unwrap_or_else(|| "default".to_string())
            ),
            format!(
                "      Max output tokens: {}",
                self.config
                    .max_output_tokens
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "default".to_string())
            ),
            format!(
                "      Pricing ({}): input ${}/${} out ${}/${} per 1M tokens, tier above {} tokens",
                pricing.date.as_deref().unwrap_or("custom"),
                pricing.input.low_rate,
                pricing.input.high_rate,
                pricing.output.low_rate,
                pricing.output.high_rate,
                pricing.input.threshold_tokens
            ),
        ];
        if self.config.stop_sequences.is_empty() {
            lines.push("      Stop sequences: (none)".to_string());
        } else {
            lines.push(format!(
                "      Stop sequences: {}",
                self.config.stop_sequences.join(", ")
            ));
        }
        renderer.print_info(&lines.join("\n"));
    }
}
