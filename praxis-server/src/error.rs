//! Session-level error taxonomy.
//!
//! Transport and decode failures never reach this level as errors: the
//! connection workers terminate and synthesize a `disconnect` event instead.

use praxis_types::ParamsError;

/// Errors surfaced by the coordinator and controllers.
#[derive(Debug)]
pub enum SessionError {
    /// A connection arrived with no free seat.
    Capacity,
    /// A message arrived in a state where its type is not legal.
    Protocol(String),
    /// The session cannot start or proceed (unwritable output directory,
    /// missing survey file, bad controller parameters).
    State(String),
    Params(ParamsError),
    Persist(PersistError),
    Io(std::io::Error),
}

impl From<ParamsError> for SessionError {
    fn from(e: ParamsError) -> Self {
        Self::Params(e)
    }
}

impl From<PersistError> for SessionError {
    fn from(e: PersistError) -> Self {
        Self::Persist(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capacity => write!(f, "no free seat"),
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Self::State(msg) => write!(f, "session state error: {}", msg),
            Self::Params(e) => write!(f, "parameter error: {}", e),
            Self::Persist(e) => write!(f, "persistence error: {}", e),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors writing the durable session artifacts.
#[derive(Debug)]
pub enum PersistError {
    Io(std::io::Error),
    Csv(csv::Error),
}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for PersistError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Csv(e) => write!(f, "CSV error: {}", e),
        }
    }
}

impl std::error::Error for PersistError {}
