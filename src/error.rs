//! Error types for the maintenance orchestrator
//!
//! The taxonomy distinguishes failures by how the control loop reacts to them:
//! transient errors are retried, precondition failures halt the node, health
//! timeouts halt the node and leave it cordoned, and monitoring outages are
//! logged without failing the run.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Network blip, SSH drop, or similar recoverable failure. Retried up to
    /// the configured budget before being treated as fatal for the step.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A step's precondition could not be satisfied (e.g. pods refuse to
    /// evict during drain). Halts the node without automatic retry.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The node never reported Ready within the poll budget. The node is
    /// halted and left cordoned.
    #[error("node {node} never became ready after {attempts} poll attempts")]
    HealthTimeout { node: String, attempts: u32 },

    /// The monitoring vendor (or another non-critical collaborator) is
    /// unreachable. Logged; never escalated to run failure.
    #[error("external system unavailable: {0}")]
    ExternalSystemUnavailable(String),

    /// Inconsistent configuration or inventory. Fails the run before any
    /// node is touched.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Operator requested an abort; honored at transition boundaries only.
    #[error("run aborted by operator")]
    Aborted,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether a retry within the step's budget is worthwhile.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) | Error::HttpError(_) => true,
            Error::KubeError(kube::Error::Api(err)) => {
                // 429 and 5xx from the API server are worth retrying
                err.code == 429 || err.code >= 500
            }
            Error::KubeError(kube::Error::Service(_) | kube::Error::HyperError(_)) => true,
            _ => false,
        }
    }

    /// Stable machine-readable kind for reports. Automated callers match on
    /// this instead of parsing the display message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transient(_) => "transient",
            Error::PreconditionFailed(_) => "precondition_failed",
            Error::HealthTimeout { .. } => "health_timeout",
            Error::ExternalSystemUnavailable(_) => "external_system_unavailable",
            Error::ConfigError(_) => "config",
            Error::Aborted => "aborted",
            Error::KubeError(_) => "kube",
            Error::HttpError(_) => "http",
            Error::IoError(_) => "io",
            Error::SerializationError(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("socket reset".into()).is_transient());
        assert!(!Error::PreconditionFailed("pods won't evict".into()).is_transient());
        assert!(!Error::ConfigError("empty inventory".into()).is_transient());
        assert!(!Error::Aborted.is_transient());
        assert!(!Error::HealthTimeout {
            node: "n1".into(),
            attempts: 30
        }
        .is_transient());
    }

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(Error::Aborted.kind(), "aborted");
        assert_eq!(
            Error::HealthTimeout {
                node: "n1".into(),
                attempts: 30
            }
            .kind(),
            "health_timeout"
        );
        assert_eq!(
            Error::ExternalSystemUnavailable("monitor".into()).kind(),
            "external_system_unavailable"
        );
    }
}
