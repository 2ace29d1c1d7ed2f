use std::time::Duration;

use crate::api::Problem;

/// Boxed error produced by a challenge provider.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while talking to an ACME provider.
///
/// A failed [`Certifier::obtain`] call returns exactly one of these, which is enough to tell apart
/// a domain that failed validation ([`Error::ValidationFailed`]), a request the CA refused
/// ([`Error::Protocol`]) and a proof that never propagated ([`Error::PropagationTimeout`]).
///
/// [`Certifier::obtain`]: crate::Certifier::obtain
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or HTTP-layer failure. Not retried.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The CA rejected the nonce of a request and of its single retry.
    #[error("nonce rejected after retry: {0}")]
    NonceRejected(Problem),

    /// The CA answered with an RFC 7807 problem document.
    #[error("ACME error: {0}")]
    Protocol(Problem),

    /// None of the challenges offered for a domain has a registered provider.
    #[error("no provider for the challenges offered for {domain} (offered: {offered:?})")]
    UnsupportedChallenge { domain: String, offered: Vec<String> },

    /// The provider could not present the proof, or the CA marked the authorization invalid.
    #[error("validation failed for {domain}: {reason}")]
    ValidationFailed {
        domain: String,
        #[source]
        reason: ValidationError,
    },

    /// Polling did not reach a terminal state before the deadline.
    #[error("{resource} did not reach a final state within {timeout:?}")]
    PropagationTimeout { resource: String, timeout: Duration },

    /// A provider failed to clean up. Only ever logged.
    #[error("cleanup failed for {domain}: {source}")]
    CleanupFailed {
        domain: String,
        #[source]
        source: BoxError,
    },

    /// The order went to `invalid`.
    #[error("order is invalid: {0}")]
    OrderInvalid(Problem),

    /// The account key is neither RSA nor ECDSA P-256/P-384.
    #[error("unsupported account key type: {0}")]
    UnsupportedKeyType(String),

    /// The CA requires external account binding but no credentials were given.
    #[error("the ACME provider requires an external account binding")]
    ExternalAccountRequired,

    /// The request was refused locally and never sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid key: {0}")]
    Key(String),

    #[error("CSR error: {0}")]
    Csr(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cause of an [`Error::ValidationFailed`].
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The provider's `present` call failed.
    #[error("provider could not present the challenge: {0}")]
    Present(#[source] BoxError),

    /// The CA checked the proof and rejected it.
    #[error("CA rejected the authorization: {0}")]
    Rejected(Problem),
}

impl Error {
    /// Returns the problem document sent by the CA, if any.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::NonceRejected(problem)
            | Error::Protocol(problem)
            | Error::OrderInvalid(problem)
            | Error::ValidationFailed {
                reason: ValidationError::Rejected(problem),
                ..
            } => Some(problem),
            _ => None,
        }
    }

    /// Domain the error relates to, when it was raised for a single authorization.
    pub fn domain(&self) -> Option<&str> {
        match self {
            Error::UnsupportedChallenge { domain, .. }
            | Error::ValidationFailed { domain, .. }
            | Error::CleanupFailed { domain, .. } => Some(domain),
            _ => None,
        }
    }
}

impl From<Problem> for Error {
    fn from(problem: Problem) -> Self {
        Error::Protocol(problem)
    }
}

impl From<pkcs8::Error> for Error {
    fn from(err: pkcs8::Error) -> Self {
        Error::Key(err.to_string())
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Csr(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_is_exposed_for_ca_errors() {
        let problem = Problem {
            _type: "urn:ietf:params:acme:error:rejectedIdentifier".to_owned(),
            detail: Some("forbidden".to_owned()),
            subproblems: None,
        };

        let err = Error::from(problem.clone());
        assert_eq!(err.problem(), Some(&problem));
        assert!(err.domain().is_none());

        let err = Error::ValidationFailed {
            domain: "example.test".to_owned(),
            reason: ValidationError::Rejected(problem.clone()),
        };
        assert_eq!(err.problem(), Some(&problem));
        assert_eq!(err.domain(), Some("example.test"));
    }
}
