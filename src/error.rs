//! Crate-wide error type.

use std::{fmt, io};

pub type GonzoResult<T> = Result<T, GonzoError>;

#[derive(Debug)]
pub enum GonzoError {
    /// A caller-supplied value was rejected (bad seed, non-positive
    /// complexity, malformed option).
    InvalidArgument(String),
    /// Config file existed but could not be used.
    Config(String),
    /// The persistence adapter reported a failure while applying a corpus
    /// add/remove callback.
    World(String),
    Io(io::Error),
}

impl std::error::Error for GonzoError {}

impl fmt::Display for GonzoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::World(msg) => write!(f, "world error: {msg}"),
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl From<io::Error> for GonzoError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
