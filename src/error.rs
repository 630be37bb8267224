use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, ArzError>;

#[derive(Error, Debug)]
pub enum ArzError {
    #[error("Archive not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Archive is empty: {}", .0.display())]
    EmptyArchive(PathBuf),
    /// Header, string, index or variable bytes disagree with their declared sizes.
    #[error("Malformed archive: {0}")]
    Format(String),
    #[error("{what} id {id} is out of range (count {count})")]
    OutOfRange { what: &'static str, id: u32, count: usize },
    #[error("Cannot encode field '{field}' value '{value}': {reason}")]
    FieldEncode { field: String, value: String, reason: String },
    #[error("No record named '{0}' in the archive")]
    UnknownRecord(String),
    #[error("Record '{0}' has no templateName variable")]
    MissingSchemaReference(String),
    #[error("Failed to parse record {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("{} is not inside the base directory", .0.display())]
    OutsideBaseDir(PathBuf),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArzError {
    /// Map a read failure inside a fixed-size structure: running out of bytes
    /// means the declared sizes lied, anything else is a real I/O failure.
    pub(crate) fn truncated(e: io::Error, what: &str) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArzError::Format(format!("truncated {what}"))
        } else {
            ArzError::Io(e)
        }
    }
}
