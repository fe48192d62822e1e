//! Session files and human-readable exports.
//!
//! [`SessionFile`] is the only format that can be loaded back.  The text,
//! markdown, and CSV exports are for reading outside the program.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};
use crate::ledger::Speaker;

/// The system instruction as recorded in a session file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSystemInstruction {
    /// The instruction text.
    #[serde(default)]
    pub content: String,
    /// Tokens the instruction adds to every request.
    #[serde(default, alias = "tokens")]
    pub token_count: u64,
    /// Cost of retaining the instruction at save time.
    #[serde(default)]
    pub cost: f64,
}

/// One turn as recorded in a session file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTurn {
    /// Who spoke.  `System` is rejected when parsing.
    pub role: Speaker,
    /// What was said.
    pub content: String,
    /// Net tokens of the turn; missing counts load as zero.
    #[serde(default, alias = "tokens")]
    pub token_count: u64,
}

impl StoredTurn {
    /// Creates a new stored turn.
    pub fn new(role: Speaker, content: impl Into<String>, token_count: u64) -> Self {
        Self {
            role,
            content: content.into(),
            token_count,
        }
    }

    /// Reads a single exported message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref(), "message")
    }

    /// Writes this turn as a single-message file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path.as_ref(), self, "message")
    }

    /// Writes this turn in `format`.  Only JSON can be imported back.
    pub fn export_to<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<()> {
        let path = path.as_ref();
        if format == ExportFormat::Json {
            return self.save(path);
        }
        write_file(path, "message", |writer| self.write_export(writer, format))
    }

    /// Renders this turn in `format` to `writer`.
    pub fn write_export<W: Write>(&self, writer: &mut W, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                to_writer_pretty(&mut *writer, self)?;
                writeln!(writer)?;
            }
            ExportFormat::Text => {
                writeln!(
                    writer,
                    "{}, {} tokens - {}",
                    self.role, self.token_count, self.content
                )?;
            }
            ExportFormat::Markdown => {
                writeln!(writer, "### {}, {} tokens", self.role, self.token_count)?;
                writeln!(writer, "{}", self.content)?;
            }
            ExportFormat::Csv => {
                writeln!(writer, "Role,Tokens,Content")?;
                writeln!(
                    writer,
                    "{},{},{}",
                    self.role,
                    self.token_count,
                    csv_field(&self.content)
                )?;
            }
        }
        Ok(())
    }
}

/// A saved session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    /// Session cost at save time.
    #[serde(default, alias = "total_session_cost")]
    pub session_cost: f64,
    /// The system instruction in effect at save time.
    #[serde(default)]
    pub system_instruction: StoredSystemInstruction,
    /// Every turn, in order.
    #[serde(default, alias = "chat_history")]
    pub turns: Vec<StoredTurn>,
}

impl SessionFile {
    /// Writes the session as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path.as_ref(), self, "session")
    }

    /// Reads a session written by [`SessionFile::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref(), "session")
    }

    /// Writes the session in `format`.
    pub fn export_to<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<()> {
        let path = path.as_ref();
        if format == ExportFormat::Json {
            return self.save(path);
        }
        write_file(path, "session", |writer| {
            self.write_export(writer, format, OffsetDateTime::now_utc())
        })
    }

    /// Renders the session in `format` to `writer`.
    pub fn write_export<W: Write>(
        &self,
        writer: &mut W,
        format: ExportFormat,
        exported_at: OffsetDateTime,
    ) -> Result<()> {
        let stamp = exported_at
            .format(&Rfc3339)
            .map_err(|err| Error::persistence("failed to format timestamp", Some(Box::new(err))))?;
        let system = &self.system_instruction;
        match format {
            ExportFormat::Json => {
                to_writer_pretty(&mut *writer, self)?;
                writeln!(writer)?;
            }
            ExportFormat::Text => {
                writeln!(writer, "Exported: {stamp}")?;
                writeln!(writer, "Total session cost: ${:.5}", self.session_cost)?;
                writeln!(writer)?;
                writeln!(
                    writer,
                    "0. System Instructions, {} tokens - {}",
                    system.token_count, system.content
                )?;
                for (i, turn) in self.turns.iter().enumerate() {
                    writeln!(
                        writer,
                        "{}. {}, {} tokens - {}",
                        i + 1,
                        turn.role,
                        turn.token_count,
                        turn.content
                    )?;
                }
            }
            ExportFormat::Markdown => {
                writeln!(writer, "# Total session cost: ${:.5}", self.session_cost)?;
                writeln!(writer)?;
                writeln!(writer, "_Exported: {stamp}_")?;
                writeln!(writer)?;
                writeln!(writer, "---")?;
                writeln!(
                    writer,
                    "### 0. System Instructions, {} tokens",
                    system.token_count
                )?;
                writeln!(writer, "{}", system.content)?;
                writeln!(writer)?;
                writeln!(writer, "---")?;
                writeln!(writer, "# Chat History")?;
                for (i, turn) in self.turns.iter().enumerate() {
                    writeln!(
                        writer,
                        "### {}. {}, {} tokens",
                        i + 1,
                        turn.role,
                        turn.token_count
                    )?;
                    writeln!(writer, "{}", turn.content)?;
                    writeln!(writer)?;
                    writeln!(writer, "---")?;
                }
            }
            ExportFormat::Csv => {
                writeln!(writer, "Exported:,{stamp}")?;
                writeln!(writer, "Session Cost:,{:.5}", self.session_cost)?;
                writeln!(writer, "Role,Tokens,Content")?;
                writeln!(
                    writer,
                    "System Instructions,{},{}",
                    system.token_count,
                    csv_field(&system.content)
                )?;
                for turn in &self.turns {
                    writeln!(
                        writer,
                        "{},{},{}",
                        turn.role,
                        turn.token_count,
                        csv_field(&turn.content)
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Output formats for [`SessionFile::export_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// The loadable session format.
    Json,
    /// Numbered plain text.
    Text,
    /// Markdown with one heading per entry.
    Markdown,
    /// Comma-separated values.
    Csv,
}

impl ExportFormat {
    /// Picks a format from a file extension, defaulting to JSON.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .unwrap_or(ExportFormat::Json)
    }

    /// Returns true if files in this format can be loaded back.
    pub fn is_loadable(&self) -> bool {
        matches!(self, ExportFormat::Json)
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Text),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(Error::persistence(
                format!("unknown export format: {s} (use json, txt, md, or csv)"),
                None,
            )),
        }
    }
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn write_file<F>(path: &Path, what: &str, render: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file = File::create(path).map_err(|err| {
        Error::persistence(
            format!("failed to create {what} file {}", path.display()),
            Some(Box::new(err)),
        )
    })?;
    let mut writer = BufWriter::new(file);
    render(&mut writer)?;
    writer.flush().map_err(|err| {
        Error::persistence(
            format!("failed to write {what} file {}", path.display()),
            Some(Box::new(err)),
        )
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    let file = File::create(path).map_err(|err| {
        Error::persistence(
            format!("failed to create {what} file {}", path.display()),
            Some(Box::new(err)),
        )
    })?;
    let mut writer = BufWriter::new(file);
    to_writer_pretty(&mut writer, value).map_err(|err| {
        Error::persistence(format!("failed to serialize {what}"), Some(Box::new(err)))
    })?;
    writer.flush().map_err(|err| {
        Error::persistence(
            format!("failed to write {what} file {}", path.display()),
            Some(Box::new(err)),
        )
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T> {
    let file = File::open(path).map_err(|err| {
        Error::persistence(
            format!("failed to open {what} file {}", path.display()),
            Some(Box::new(err)),
        )
    })?;
    let reader = BufReader::new(file);
    from_reader(reader).map_err(|err| {
        Error::persistence(
            format!("failed to parse {what} file {}", path.display()),
            Some(Box::new(err)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> SessionFile {
        SessionFile {
            session_cost: 0.000126,
            system_instruction: StoredSystemInstruction {
                content: "be brief".to_string(),
                token_count: 50,
                cost: 0.000175,
            },
            turns: vec![
                StoredTurn::new(Speaker::User, "Hi", 12),
                StoredTurn::new(Speaker::Model, "Say \"hello\"", 8),
            ],
        }
    }

    fn render(format: ExportFormat) -> String {
        let mut out = Vec::new();
        sample()
            .write_export(&mut out, format, datetime!(2024-07-15 12:00 UTC))
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn session_file_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["session_cost"], 0.000126);
        assert_eq!(json["system_instruction"]["token_count"], 50);
        assert_eq!(json["turns"][0]["role"], "User");
        assert_eq!(json["turns"][1]["role"], "Model");
        assert_eq!(json["turns"][0]["token_count"], 12);
    }

    #[test]
    fn loads_original_field_names() {
        let json = r#"{
            "total_session_cost": 0.5,
            "system_instruction": { "content": "s", "tokens": 3, "cost": 0.0 },
            "chat_history": [
                { "role": "User", "content": "a", "tokens": 4 },
                { "role": "model", "content": "b" }
            ]
        }"#;
        let file: SessionFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.session_cost, 0.5);
        assert_eq!(file.system_instruction.token_count, 3);
        assert_eq!(file.turns.len(), 2);
        assert_eq!(file.turns[0], StoredTurn::new(Speaker::User, "a", 4));
        assert_eq!(file.turns[1], StoredTurn::new(Speaker::Model, "b", 0));
    }

    #[test]
    fn system_turn_rejects_file() {
        let json = r#"{ "turns": [ { "role": "System", "content": "x", "token_count": 1 } ] }"#;
        assert!(serde_json::from_str::<SessionFile>(json).is_err());
        let json = r#"{ "turns": [ { "role": "assistant", "content": "x" } ] }"#;
        assert!(serde_json::from_str::<SessionFile>(json).is_err());
    }

    #[test]
    fn save_and_load_preserve_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        sample().save(&path).unwrap();
        let loaded = SessionFile::load(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn load_missing_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionFile::load(dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_persistence());
    }

    #[test]
    fn load_malformed_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(SessionFile::load(&path).unwrap_err().is_persistence());
    }

    #[test]
    fn text_export() {
        let text = render(ExportFormat::Text);
        assert!(text.starts_with("Exported: 2024-07-15T12:00:00Z\n"));
        assert!(text.contains("Total session cost: $0.00013\n"));
        assert!(text.contains("0. System Instructions, 50 tokens - be brief\n"));
        assert!(text.contains("1. User, 12 tokens - Hi\n"));
        assert!(text.contains("2. Model, 8 tokens - Say \"hello\"\n"));
    }

    #[test]
    fn markdown_export() {
        let md = render(ExportFormat::Markdown);
        assert!(md.starts_with("# Total session cost: $0.00013\n"));
        assert!(md.contains("### 0. System Instructions, 50 tokens\nbe brief\n"));
        assert!(md.contains("# Chat History\n### 1. User, 12 tokens\nHi\n"));
    }

    #[test]
    fn csv_export_escapes_quotes() {
        let csv = render(ExportFormat::Csv);
        assert!(csv.contains("Session Cost:,0.00013\n"));
        assert!(csv.contains("Role,Tokens,Content\n"));
        assert!(csv.contains("System Instructions,50,\"be brief\"\n"));
        assert!(csv.contains("Model,8,\"Say \"\"hello\"\"\"\n"));
    }

    #[test]
    fn format_from_path() {
        assert_eq!(ExportFormat::from_path("a.txt"), ExportFormat::Text);
        assert_eq!(ExportFormat::from_path("a.MD"), ExportFormat::Markdown);
        assert_eq!(ExportFormat::from_path("a.csv"), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path("a.json"), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path("a"), ExportFormat::Json);
        assert!(ExportFormat::Json.is_loadable());
        assert!(!ExportFormat::Csv.is_loadable());
        assert!("yaml".parse::<ExportFormat>().is_err());
    }

    fn render_turn(turn: &StoredTurn, format: ExportFormat) -> String {
        let mut out = Vec::new();
        turn.write_export(&mut out, format).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn single_message_exports() {
        let turn = StoredTurn::new(Speaker::Model, "Say \"hi\"", 8);
        assert_eq!(
            render_turn(&turn, ExportFormat::Text),
            "Model, 8 tokens - Say \"hi\"\n"
        );
        assert_eq!(
            render_turn(&turn, ExportFormat::Markdown),
            "### Model, 8 tokens\nSay \"hi\"\n"
        );
        assert_eq!(
            render_turn(&turn, ExportFormat::Csv),
            "Role,Tokens,Content\nModel,8,\"Say \"\"hi\"\"\"\n"
        );
        let json: StoredTurn =
            serde_json::from_str(&render_turn(&turn, ExportFormat::Json)).unwrap();
        assert_eq!(json, turn);
    }

    #[test]
    fn single_message_export_to_json_can_be_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let turn = StoredTurn::new(Speaker::User, "kept", 4);
        let json = dir.path().join("turn.json");
        let text = dir.path().join("turn.txt");
        turn.export_to(&json, ExportFormat::Json).unwrap();
        turn.export_to(&text, ExportFormat::Text).unwrap();
        assert_eq!(StoredTurn::load(&json).unwrap(), turn);
        assert_eq!(
            std::fs::read_to_string(&text).unwrap(),
            "User, 4 tokens - kept\n"
        );
        assert!(StoredTurn::load(&text).unwrap_err().is_persistence());
    }

    #[test]
    fn single_message_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message.json");
        let turn = StoredTurn::new(Speaker::Model, "kept", 42);
        turn.save(&path).unwrap();
        assert_eq!(StoredTurn::load(&path).unwrap(), turn);
    }
}
