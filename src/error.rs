//! Error types for the test harness

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::Verb;
use crate::identity::ObjectIdentity;

/// Error variants are named with the `Error` suffix where they wrap another
/// failure domain (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("{verb} {identity}: not found")]
    NotFound { verb: Verb, identity: ObjectIdentity },

    #[error("{verb} {identity}: already exists")]
    AlreadyExists { verb: Verb, identity: ObjectIdentity },

    #[error("{verb} {identity}: conflict: {message}")]
    Conflict {
        verb: Verb,
        identity: ObjectIdentity,
        message: String,
    },

    #[error("{operation} {identity}: timed out after {elapsed:?}{}", last_observed_suffix(.last_observed))]
    Timeout {
        operation: &'static str,
        identity: ObjectIdentity,
        elapsed: Duration,
        /// Pretty JSON of the last object state seen before the deadline
        last_observed: Option<String>,
    },

    #[error("{operation} {identity}: cancelled")]
    Cancelled {
        operation: &'static str,
        identity: ObjectIdentity,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing object metadata: {0}")]
    MissingMetadata(&'static str),

    #[error("Kubernetes API error during {verb} {identity}: {source}")]
    KubeError {
        verb: Verb,
        identity: ObjectIdentity,
        #[source]
        source: kube::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cleanup failed for {} object(s):{}", .0.len(), CleanupFailures(.0))]
    CleanupFailed(Vec<CleanupFailure>),
}

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Timeout,
    Cancelled,
    Validation,
    Unexpected,
}

/// A single object the cleanup driver failed to remove
#[derive(Debug)]
pub struct CleanupFailure {
    pub identity: ObjectIdentity,
    pub error: Error,
}

struct CleanupFailures<'a>(&'a [CleanupFailure]);

impl fmt::Display for CleanupFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in self.0 {
            write!(f, "\n  cleanup {}: {}", failure.identity, failure.error)?;
        }
        Ok(())
    }
}

fn last_observed_suffix(last_observed: &Option<String>) -> String {
    match last_observed {
        Some(obj) => format!("\nlast observed:\n{obj}"),
        None => String::new(),
    }
}

impl Error {
    /// Classify a Kubernetes client error by its API status
    pub fn from_kube(verb: Verb, identity: ObjectIdentity, source: kube::Error) -> Self {
        match &source {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound { verb, identity },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Error::AlreadyExists { verb, identity }
            }
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
                verb,
                identity,
                message: resp.message.clone(),
            },
            _ => Error::KubeError {
                verb,
                identity,
                source,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::ValidationError(_) => ErrorKind::Validation,
            Error::MissingMetadata(_)
            | Error::KubeError { .. }
            | Error::SerializationError(_)
            | Error::InvalidConfig(_)
            | Error::CleanupFailed(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::ValidationError(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
