//! Slash command parsing for the chat application.
//!
//! Commands are looked up in a static table.  Each entry names the command,
//! its aliases, a usage line for `/help`, and the parser for its argument.
//! Nothing here touches the ledger; the session dispatches parsed commands.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::persistence::ExportFormat;

/// Most indices one `/delete` may name.
pub const MAX_BATCH_INDICES: usize = 10_000;

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the API.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Delete ledger entries by index (`/delete 2,4` or `/delete 3-5`).
    Delete(Vec<usize>),

    /// Show one entry in full.
    View(usize),

    /// List every entry with its preview and cost to retain.
    History,

    /// Drop every turn, keeping the system instruction.
    Clear,

    /// Save the session.  The format follows the extension unless given.
    Save {
        path: String,
        format: Option<ExportFormat>,
    },

    /// Save one turn.  The format follows the extension unless given.
    SaveMessage {
        index: usize,
        path: String,
        format: Option<ExportFormat>,
    },

    /// Append the turns from a saved session.
    Load(String),

    /// Append a single exported message.
    Import(String),

    /// Attach files to the next message.
    Attach(Vec<String>),

    /// Set the per-request timeout in seconds.
    Timeout(u64),

    /// Show (`None`) or replace the system instruction.
    System(Option<String>),

    /// Display token and cost totals.
    Stats,

    /// Show the current configuration.
    ShowConfig,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

struct CommandSpec {
    names: &'static [&'static str],
    usage: &'static str,
    summary: &'static str,
    parse: fn(Option<&str>) -> ChatCommand,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        names: &["delete", "del", "rm"],
        usage: "/delete <n>[,<n>|<a>-<b>...]",
        summary: "Delete entries by index (index 0 is protected)",
        parse: parse_delete,
    },
    CommandSpec {
        names: &["view", "show"],
        usage: "/view <n>",
        summary: "Show one entry in full",
        parse: parse_view,
    },
    CommandSpec {
        names: &["history", "list", "ls"],
        usage: "/history",
        summary: "List entries with tokens and cost to retain",
        parse: |_| ChatCommand::History,
    },
    CommandSpec {
        names: &["clear"],
        usage: "/clear",
        summary: "Clear the conversation, keeping the system instruction",
        parse: |_| ChatCommand::Clear,
    },
    CommandSpec {
        names: &["save"],
        usage: "/save <file> [json|txt|md|csv]",
        summary: "Save the session (only json can be loaded back)",
        parse: parse_save,
    },
    CommandSpec {
        names: &["savemsg"],
        usage: "/savemsg <n> <file> [json|txt|md|csv]",
        summary: "Save one entry (only json can be imported back)",
        parse: parse_save_message,
    },
    CommandSpec {
        names: &["load"],
        usage: "/load <file>",
        summary: "Append the turns of a saved session",
        parse: parse_load,
    },
    CommandSpec {
        names: &["import"],
        usage: "/import <file>",
        summary: "Append a single exported message",
        parse: parse_import,
    },
    CommandSpec {
        names: &["attach"],
        usage: "/attach <file>...",
        summary: "Attach files to the next message",
        parse: parse_attach,
    },
    CommandSpec {
        names: &["timeout"],
        usage: "/timeout <seconds>",
        summary: "Set the per-request timeout",
        parse: parse_timeout,
    },
    CommandSpec {
        names: &["system"],
        usage: "/system [instruction]",
        summary: "Show or replace the system instruction",
        parse: |arg| ChatCommand::System(arg.map(str::to_string)),
    },
    CommandSpec {
        names: &["stats", "status", "cost"],
        usage: "/stats",
        summary: "Show token and cost totals",
        parse: |_| ChatCommand::Stats,
    },
    CommandSpec {
        names: &["config"],
        usage: "/config",
        summary: "Show current configuration",
        parse: |_| ChatCommand::ShowConfig,
    },
    CommandSpec {
        names: &["help", "?"],
        usage: "/help",
        summary: "Show this help message",
        parse: |_| ChatCommand::Help,
    },
    CommandSpec {
        names: &["quit", "exit", "q"],
        usage: "/quit",
        summary: "Exit the chat",
        parse: |_| ChatCommand::Quit,
    },
];

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use chatmeter::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert_eq!(parse_command("/delete 2,4"), Some(ChatCommand::Delete(vec![2, 4])));
/// assert!(parse_command("Hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match COMMANDS
        .iter()
        .find(|spec| spec.names.contains(&command.as_str()))
    {
        Some(spec) => (spec.parse)(argument),
        None => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };
    Some(result)
}

fn parse_delete(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/delete requires one or more indices".to_string());
    };
    match parse_indices(arg) {
        Ok(indices) => ChatCommand::Delete(indices),
        Err(err) => ChatCommand::Invalid(format!("/delete {err}")),
    }
}

/// Parses `2,4`, `2 4`, and `3-5` style index lists, sorted and deduplicated.
fn parse_indices(arg: &str) -> Result<Vec<usize>, String> {
    let mut indices = BTreeSet::new();
    for token in arg
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if let Some((start, end)) = token.split_once('-') {
            let start = parse_index(start)?;
            let end = parse_index(end)?;
            if start > end {
                return Err(format!("has a backwards range: {token}"));
            }
            if end - start >= MAX_BATCH_INDICES - indices.len() {
                return Err(format!("names more than {MAX_BATCH_INDICES} indices"));
            }
            indices.extend(start..=end);
        } else {
            indices.insert(parse_index(token)?);
        }
        if indices.len() > MAX_BATCH_INDICES {
            return Err(format!("names more than {MAX_BATCH_INDICES} indices"));
        }
    }
    if indices.is_empty() {
        return Err("requires one or more indices".to_string());
    }
    Ok(indices.into_iter().collect())
}

fn parse_index(token: &str) -> Result<usize, String> {
    token
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("expects non-negative integers, got '{token}'"))
}

fn parse_view(argument: Option<&str>) -> ChatCommand {
    match argument.map(parse_index) {
        Some(Ok(index)) => ChatCommand::View(index),
        Some(Err(err)) => ChatCommand::Invalid(format!("/view {err}")),
        None => ChatCommand::Invalid("/view requires an index".to_string()),
    }
}

fn parse_save(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/save requires a file path".to_string());
    };
    let (path, format) = split_format(arg);
    ChatCommand::Save { path, format }
}

fn parse_save_message(argument: Option<&str>) -> ChatCommand {
    let usage = "/savemsg requires an index and a file path";
    let Some((index, rest)) = argument.and_then(|arg| arg.split_once(char::is_whitespace)) else {
        return ChatCommand::Invalid(usage.to_string());
    };
    let index = match parse_index(index) {
        Ok(index) => index,
        Err(err) => return ChatCommand::Invalid(format!("/savemsg {err}")),
    };
    let rest = rest.trim();
    if rest.is_empty() {
        return ChatCommand::Invalid(usage.to_string());
    }
    let (path, format) = split_format(rest);
    ChatCommand::SaveMessage {
        index,
        path,
        format,
    }
}

// The last word is a format only when it names one.
fn split_format(arg: &str) -> (String, Option<ExportFormat>) {
    if let Some((path, word)) = arg.rsplit_once(char::is_whitespace) {
        if let Ok(format) = word.parse::<ExportFormat>() {
            return (path.trim().to_string(), Some(format));
        }
    }
    (arg.to_string(), None)
}

fn parse_load(argument: Option<&str>) -> ChatCommand {
    match argument {
        Some(path) => ChatCommand::Load(path.to_string()),
        None => ChatCommand::Invalid("/load requires a file path".to_string()),
    }
}

fn parse_import(argument: Option<&str>) -> ChatCommand {
    match argument {
        Some(path) => ChatCommand::Import(path.to_string()),
        None => ChatCommand::Invalid("/import requires a file path".to_string()),
    }
}

fn parse_attach(argument: Option<&str>) -> ChatCommand {
    match argument {
        Some(arg) => ChatCommand::Attach(arg.split_whitespace().map(str::to_string).collect()),
        None => ChatCommand::Invalid("/attach requires one or more file paths".to_string()),
    }
}

fn parse_timeout(argument: Option<&str>) -> ChatCommand {
    match argument.map(str::parse::<u64>) {
        Some(Ok(secs)) if secs > 0 => ChatCommand::Timeout(secs),
        Some(_) => ChatCommand::Invalid("/timeout expects a positive number of seconds".to_string()),
        None => ChatCommand::Invalid("/timeout requires a value".to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> String {
    let width = COMMANDS
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    let mut help = String::from("Available commands:");
    for spec in COMMANDS {
        let _ = write!(help, "\n  {:width$}  {}", spec.usage, spec.summary);
    }
    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_delete_lists_and_ranges() {
        assert_eq!(
            parse_command("/delete 2,4"),
            Some(ChatCommand::Delete(vec![2, 4]))
        );
        assert_eq!(
            parse_command("/delete 4 2 2"),
            Some(ChatCommand::Delete(vec![2, 4]))
        );
        assert_eq!(
            parse_command("/rm 3-5, 1"),
            Some(ChatCommand::Delete(vec![1, 3, 4, 5]))
        );
        assert_eq!(
            parse_command("/delete 0"),
            Some(ChatCommand::Delete(vec![0]))
        );
    }

    #[test]
    fn parse_delete_rejects_garbage() {
        assert!(matches!(
            parse_command("/delete"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("/delete two"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("'two'")
        ));
        assert!(matches!(
            parse_command("/delete 5-3"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("backwards")
        ));
        assert!(matches!(
            parse_command("/delete -1"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_delete_caps_range_size() {
        assert!(matches!(
            parse_command("/delete 1-18446744073709551615"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("more than")
        ));
        assert!(matches!(
            parse_command("/delete 1-30000000"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("more than")
        ));
        assert!(matches!(
            parse_command("/delete 1-6000 7000-13000"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("more than")
        ));
        match parse_command(&format!("/delete 1-{MAX_BATCH_INDICES}")) {
            Some(ChatCommand::Delete(indices)) => assert_eq!(indices.len(), MAX_BATCH_INDICES),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parse_view_and_history() {
        assert_eq!(parse_command("/view 3"), Some(ChatCommand::View(3)));
        assert!(matches!(
            parse_command("/view"),
            Some(ChatCommand::Invalid(_))
        ));
        assert_eq!(parse_command("/history"), Some(ChatCommand::History));
        assert_eq!(parse_command("/LS"), Some(ChatCommand::History));
    }

    #[test]
    fn parse_save_with_and_without_format() {
        assert_eq!(
            parse_command("/save session.json"),
            Some(ChatCommand::Save {
                path: "session.json".to_string(),
                format: None,
            })
        );
        assert_eq!(
            parse_command("/save notes csv"),
            Some(ChatCommand::Save {
                path: "notes".to_string(),
                format: Some(ExportFormat::Csv),
            })
        );
        assert_eq!(
            parse_command("/save my file.txt"),
            Some(ChatCommand::Save {
                path: "my file.txt".to_string(),
                format: None,
            })
        );
    }

    #[test]
    fn parse_save_message() {
        assert_eq!(
            parse_command("/savemsg 3 answer.md"),
            Some(ChatCommand::SaveMessage {
                index: 3,
                path: "answer.md".to_string(),
                format: None,
            })
        );
        assert_eq!(
            parse_command("/savemsg 2 out txt"),
            Some(ChatCommand::SaveMessage {
                index: 2,
                path: "out".to_string(),
                format: Some(ExportFormat::Text),
            })
        );
        assert!(matches!(
            parse_command("/savemsg 3"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("/savemsg x out.json"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("'x'")
        ));
    }

    #[test]
    fn parse_file_commands() {
        assert_eq!(
            parse_command("/load s.json"),
            Some(ChatCommand::Load("s.json".to_string()))
        );
        assert_eq!(
            parse_command("/import m.json"),
            Some(ChatCommand::Import("m.json".to_string()))
        );
        assert_eq!(
            parse_command("/attach a.rs b.rs"),
            Some(ChatCommand::Attach(vec![
                "a.rs".to_string(),
                "b.rs".to_string()
            ]))
        );
    }

    #[test]
    fn parse_timeout() {
        assert_eq!(parse_command("/timeout 30"), Some(ChatCommand::Timeout(30)));
        assert!(matches!(
            parse_command("/timeout 0"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_system() {
        assert_eq!(
            parse_command("/system Be terse"),
            Some(ChatCommand::System(Some("Be terse".to_string())))
        );
        assert_eq!(parse_command("/system"), Some(ChatCommand::System(None)));
    }

    #[test]
    fn unknown_and_non_commands() {
        assert_eq!(
            parse_command("/frobnicate"),
            Some(ChatCommand::Invalid("Unknown command: /frobnicate".to_string()))
        );
        assert_eq!(parse_command("Hello!"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for spec in COMMANDS {
            assert!(help.contains(spec.usage));
        }
    }
}
