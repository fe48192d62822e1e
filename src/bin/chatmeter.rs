//! Interactive metered chat with a Gemini model.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings (key from GEMINI_API_KEY)
//! chatmeter
//!
//! # Pick a model and a config file
//! chatmeter --model gemini-1.5-flash-latest --config chatmeter.yaml
//!
//! # Disable colors
//! chatmeter --no-color
//! ```
//!
//! Set `CHATMETER_LOG=debug` for lifecycle logging on stderr.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use chatmeter::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, SessionControl,
    parse_command,
};
use chatmeter::{GeminiClient, GeminiService, GeminiSettings};

const LOG_ENV: &str = "CHATMETER_LOG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("chatmeter [OPTIONS]");
    let (config, config_warning) = ChatConfig::resolve(&args);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    if let Some(err) = config_warning {
        tracing::warn!(error = %err, "using default configuration");
        renderer.print_error(&format!("{err}; continuing with defaults"));
    }

    let client = GeminiClient::with_options(
        config.api_key.clone(),
        config.base_url.clone(),
        Some(config.timeout),
    )?;
    let settings = GeminiSettings {
        model: config.model.clone(),
        temperature: config.temperature,
        max_output_tokens: config.max_output_tokens,
        stop_sequences: config.stop_sequences.clone(),
    };
    let mut session = ChatSession::new(GeminiService::new(client, settings), config);
    let mut rl = DefaultEditor::new()?;

    // No request can be cancelled; an interrupt while one is in flight waits
    // for its reply or its timeout.
    let sending = Arc::new(AtomicBool::new(false));
    let sending_clone = sending.clone();
    ctrlc::set_handler(move || {
        if sending_clone.load(Ordering::Relaxed) {
            eprintln!("\n[request in flight; waiting for the reply or the timeout]");
        } else {
            std::process::exit(130);
        }
    })?;

    println!("chatmeter (model: {})", session.config().model);
    println!("Type /help for commands, /quit to exit\n");
    session.start(&mut renderer).await;

    loop {
        let line = match rl.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        let is_attach = matches!(parse_command(&line), Some(ChatCommand::Attach(_)));
        sending.store(true, Ordering::Relaxed);
        let control = session.handle_line(&line, &mut renderer).await;
        sending.store(false, Ordering::Relaxed);
        if control == SessionControl::Quit {
            println!("Goodbye!");
            break;
        }

        if is_attach && session.has_attachments() {
            let message = match rl.readline("Message for the attached files (blank for none): ") {
                Ok(message) => message,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => String::new(),
                Err(err) => {
                    renderer.print_error(&format!("Input error: {}", err));
                    break;
                }
            };
            sending.store(true, Ordering::Relaxed);
            // The renderer has already shown the error.
            if let Err(err) = session.send_message(&message, &mut renderer).await {
                tracing::debug!(error = %err, "turn not answered");
            }
            sending.store(false, Ordering::Relaxed);
        }
    }

    Ok(())
}
