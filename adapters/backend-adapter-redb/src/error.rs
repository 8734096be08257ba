//! Adapter-local error type, mapped into [`replicate_types::error::Error`] at
//! the trait boundary so callers only ever see the engine's taxonomy.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Db(String),
    Io(String),
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Db(msg) => write!(f, "database error: {msg}"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
            Error::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// vim: ts=4
