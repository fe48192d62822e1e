//! Composing a user turn from attached files.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Placeholder used when the user attaches files without a message.
pub const EMPTY_MESSAGE: &str = "<None>";

/// One file read for attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// File content; invalid UTF-8 is replaced.
    pub content: String,
}

impl Attachment {
    /// Reads `path`.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Reads every path, returning the files that could be read and the errors
/// for those that could not.
pub fn read_attachments<I, P>(paths: I) -> (Vec<Attachment>, Vec<Error>)
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut attached = Vec::new();
    let mut errors = Vec::new();
    for path in paths {
        match Attachment::read(path) {
            Ok(attachment) => attached.push(attachment),
            Err(err) => errors.push(err),
        }
    }
    (attached, errors)
}

/// Builds the text of a user turn carrying `attachments` and `message`.
pub fn compose_with_files(attachments: &[Attachment], message: &str) -> String {
    let mut text = String::from("Files from the user: ");
    for attachment in attachments {
        text.push_str("File: ");
        text.push_str(&attachment.path.to_string_lossy());
        text.push('\n');
        text.push_str("```");
        text.push_str(&attachment.content);
        text.push_str("```\n");
    }
    text.push_str("\nUser message: ");
    let message = message.trim();
    text.push_str(if message.is_empty() {
        EMPTY_MESSAGE
    } else {
        message
    });
    text
}
