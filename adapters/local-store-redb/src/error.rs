//! Adapter-local error type, mapped into [`replicate_types::error::Error`] at
//! the trait boundary so callers only ever see the engine's taxonomy.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Db(String),
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Db(msg) => write!(f, "database error: {msg}"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// vim: ts=4
