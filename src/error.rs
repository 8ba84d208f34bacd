use std::path::PathBuf;
use thiserror::Error;

/// Malformed or out-of-order inbound events. Always logged and dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("No EVENTTYPE specified")]
    MissingEventType,

    #[error("EVENTTYPE {0} does not exist, check the acquisition controller routing")]
    UnknownEventType(String),

    #[error("Malformed event payload: {0}")]
    Malformed(String),

    #[error("Invalid SETUP payload: {0}")]
    InvalidSetup(String),

    #[error("{event} is not valid while the session is {state}")]
    WrongState { event: &'static str, state: &'static str },

    #[error("{0} arrived after SESSIONDONE, nothing was enqueued")]
    AfterSessionDone(&'static str),
}

/// Failures reading acquisition or seed files
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Acquisition file {path:?} is not readable: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Acquisition file {path:?} is truncated (still being written?)")]
    Truncated { path: PathBuf },

    #[error("Trial has {frames} frames, below the {min} frame minimum")]
    TooShort { frames: usize, min: usize },

    #[error("No usable acquisition files in {0:?}")]
    NoCandidates(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session configuration problems, fatal when hit during setup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown normalization method: {0}")]
    UnknownNormalizer(String),

    #[error("Required session field '{0}' was never set")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
