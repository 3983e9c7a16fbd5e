//! Crate-wide error type
//!
//! Every fallible operation in the reconciliation engine returns a `Result<T>`
//! built on this single `Error` enum. `Error::kind()` classifies each variant
//! into one of the four error kinds from the design (`Transient`,
//! `Precondition`, `Invariant`, `Fatal`); `Error::is_retriable()` drives how
//! quickly the reconciler requeues after a failure.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API call failed
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// (De)serialization failure
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML (de)serialization failure, used for node-OS machine configs
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Malformed or incomplete Cluster spec
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Missing or unresolvable prerequisite (credentials, infra IDs)
    #[error("Precondition not met: {0}")]
    ConfigError(String),

    /// Cloud provider API call failed
    #[error("Cloud provider error: {0}")]
    CloudError(String),

    /// Node-OS API call failed
    #[error("Node-OS error: {0}")]
    NodeOsError(String),

    /// A bounded wait exceeded its timeout
    #[error("Timed out waiting for: {0}")]
    Timeout(String),

    /// Control-plane replacement was refused because quorum would be lost
    #[error("Quorum would be lost: {0}")]
    QuorumLost(String),

    /// `Spec.CredentialsRef` does not resolve to a usable secret
    #[error("Missing or invalid credentials: {0}")]
    MissingCredentials(String),

    /// Persisted status could not be reconstructed into a sane state
    #[error("Unrecoverable state: {0}")]
    Fatal(String),
}

/// The four error kinds the design groups all failures into.
///
/// `Transient` and `Precondition` both requeue at the default interval, but
/// are kept distinct because they are reported under different event
/// reasons and because only `Transient` errors are expected to clear
/// without operator/user intervention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Precondition,
    Invariant,
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KubeError(_)
            | Error::CloudError(_)
            | Error::NodeOsError(_)
            | Error::Timeout(_) => ErrorKind::Transient,
            Error::ConfigError(_) | Error::MissingCredentials(_) => ErrorKind::Precondition,
            Error::QuorumLost(_) => ErrorKind::Invariant,
            Error::ValidationError(_) => ErrorKind::Precondition,
            Error::SerializationError(_) | Error::YamlError(_) | Error::Fatal(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Whether the reconciler should use the fast retry interval rather
    /// than the default one.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// The stable Kubernetes event reason associated with this error.
    pub fn event_reason(&self) -> &'static str {
        match self {
            Error::QuorumLost(_) => "QuorumLost",
            Error::MissingCredentials(_) => "CredentialsError",
            Error::CloudError(_) => "ServerCreationError",
            Error::NodeOsError(_) => "ConfigApplyError",
            Error::Timeout(_) => "NodeReadyTimeout",
            _ => "ReconcileFailed",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
