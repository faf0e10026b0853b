use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    WriteError(&'static str, io::Error),
    CorruptedRow(String),
    SourceUnreadable(String),
    InvalidState(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::WriteError(context, err) => write!(f, "Failed to write {}: {}", context, err),
            Error::CorruptedRow(msg) => write!(f, "Corrupted row: {}", msg),
            Error::SourceUnreadable(msg) => write!(f, "Source unreadable: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
