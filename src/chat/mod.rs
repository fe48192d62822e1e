//! Interactive chat front end over the ledger core.
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: slash command parsing
//! - [`session`]: command dispatch over the lifecycle controller
//! - [`render`]: console output
//! - [`attach`]: composing turns from attached files

mod attach;
mod commands;
mod config;
mod render;
mod session;

pub use attach::{Attachment, EMPTY_MESSAGE, compose_with_files, read_attachments};
pub use commands::{ChatCommand, MAX_BATCH_INDICES, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, DEFAULT_MODEL, FileConfig};
pub use render::{
    PlainTextRenderer, Renderer, format_cost, format_history_footer, format_history_row,
    format_receipt,
};
pub use session::{ChatSession, SessionControl};
