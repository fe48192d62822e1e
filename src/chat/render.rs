//! Console output for the chat application.

use std::io::{self, Stdout, Write};

use crate::account::SessionAccount;
use crate::controller::{LedgerEntryView, TurnReceipt};
use crate::ledger::{Message, Role};

/// ANSI escape code for dim text (used for token and cost figures).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for user entries).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for model entries).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for yellow text (used for the system instruction).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering session output.
///
/// The chat session only talks to a `Renderer`, so front ends (and tests)
/// decide how replies, ledger listings, and cost figures are shown.
pub trait Renderer: Send {
    /// Prints the model's reply to a turn.
    fn print_reply(&mut self, text: &str);

    /// Prints the per-turn token and cost line after a reply.
    fn print_receipt(&mut self, receipt: &TurnReceipt);

    /// Prints the ledger listing.
    fn print_history(&mut self, entries: &[LedgerEntryView]);

    /// Prints one entry in full.
    fn print_entry(&mut self, index: usize, message: &Message, cost_to_retain: f64);

    /// Prints the session totals.
    fn print_summary(&mut self, account: &SessionAccount);

    /// Prints an error message.
    fn print_error(&mut self, error: &str);

    /// Prints an informational message.
    fn print_info(&mut self, info: &str);
}

/// Formats a token count and its cost, e.g. `12 tokens ($0.000042)`.
pub fn format_cost(tokens: u64, cost: f64) -> String {
    format!("{tokens} tokens (${cost:.6})")
}

/// Formats one row of the ledger listing.
pub fn format_history_row(entry: &LedgerEntryView) -> String {
    format!(
        "{:>3}. {:<6} {} - {}",
        entry.index,
        entry.role,
        format_cost(entry.token_count, entry.cost_to_retain),
        entry.content_preview
    )
}

/// Formats the line under the ledger listing: what keeping every entry
/// adds to each later request.
pub fn format_history_footer(entries: &[LedgerEntryView]) -> String {
    let total: f64 = entries.iter().map(|entry| entry.cost_to_retain).sum();
    format!("Total cost to keep: ${total:.6}")
}

/// Formats the status line shown after each reply.
pub fn format_receipt(receipt: &TurnReceipt) -> String {
    let account = &receipt.account;
    format!(
        "in: {} | out: {} | context: {} tokens | session: ${:.6}",
        format_cost(receipt.input_tokens, account.last_input_cost),
        format_cost(receipt.output_tokens, account.last_output_cost),
        account.context_total_tokens,
        account.session_cost
    )
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
        }
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn role_color(role: Role) -> &'static str {
        match role {
            Role::System => ANSI_YELLOW,
            Role::User => ANSI_CYAN,
            Role::Model => ANSI_GREEN,
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.use_color {
            format!("{ANSI_DIM}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_reply(&mut self, text: &str) {
        if self.use_color {
            println!("{ANSI_GREEN}Model:{ANSI_RESET} {text}");
        } else {
            println!("Model: {text}");
        }
        self.flush();
    }

    fn print_receipt(&mut self, receipt: &TurnReceipt) {
        println!("{}", self.dim(&format_receipt(receipt)));
        self.flush();
    }

    fn print_history(&mut self, entries: &[LedgerEntryView]) {
        for entry in entries {
            let row = format_history_row(entry);
            if self.use_color {
                println!("{}{row}{ANSI_RESET}", Self::role_color(entry.role));
            } else {
                println!("{row}");
            }
        }
        println!("{}", self.dim(&format_history_footer(entries)));
        self.flush();
    }

    fn print_entry(&mut self, index: usize, message: &Message, cost_to_retain: f64) {
        let header = format!(
            "{index}. {}, {}",
            message.role(),
            format_cost(message.token_count(), cost_to_retain)
        );
        if self.use_color {
            println!("{}{header}{ANSI_RESET}", Self::role_color(message.role()));
        } else {
            println!("{header}");
        }
        println!("{}", message.content());
        self.flush();
    }

    fn print_summary(&mut self, account: &SessionAccount) {
        println!("    Session Statistics:");
        println!(
            "      Input tokens: {} (last turn {})",
            account.total_input_tokens, account.last_input_tokens
        );
        println!(
            "      Output tokens: {} (last turn {})",
            account.total_output_tokens, account.last_output_tokens
        );
        println!("      Context: {} tokens", account.context_total_tokens);
        println!(
            "      Last turn cost: ${:.6} in / ${:.6} out",
            account.last_input_cost, account.last_output_cost
        );
        println!("      Session cost: ${:.6}", account.session_cost);
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        println!("{info}");
        self.flush();
    }
}
