//! JSON API payloads.
//!
//! Not intended to be used directly. Provided to aid debugging.

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

mod account;
mod authorization;
mod challenge;
mod directory;
mod finalize;
mod identifier;
mod order;

pub use self::{
    account::Account,
    authorization::{Authorization, AuthorizationStatus},
    challenge::{Challenge, ChallengeStatus},
    directory::{Directory, DirectoryMeta},
    finalize::Finalize,
    identifier::Identifier,
    order::{Order, OrderStatus},
};

/// Serializes to `""`.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

impl Problem {
    pub(crate) fn new(_type: &str, detail: impl Into<String>) -> Self {
        Problem {
            _type: _type.to_owned(),
            detail: Some(detail.into()),
            subproblems: None,
        }
    }

    /// Returns true if problem type is "badNonce".
    pub fn is_bad_nonce(&self) -> bool {
        self._type == "badNonce" || self._type.ends_with(":badNonce")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type)?,
            _ => write!(f, "{}", self._type)?,
        }

        for sub in self.subproblems.iter().flatten() {
            match (&sub.identifier, &sub.detail) {
                (Some(id), Some(detail)) => write!(f, "; {} ({}): {detail}", sub._type, id.value)?,
                (None, Some(detail)) => write!(f, "; {}: {detail}", sub._type)?,
                _ => write!(f, "; {}", sub._type)?,
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<identifier::Identifier>,
}

/// Server-driven lifecycle of an order, authorization or challenge.
///
/// Only responses from the ACME server move a [`State`] forward.
pub trait Status: Copy + Eq + fmt::Debug {
    /// No further polling can change this status.
    fn is_terminal(self) -> bool;

    /// Whether the server may legally report `next` after `self`.
    fn can_advance_to(self, next: Self) -> bool;
}

/// Current status of a server resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State<S> {
    status: S,
}

impl<S: Status> State<S> {
    pub fn new(status: S) -> Self {
        State { status }
    }

    pub fn get(&self) -> S {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies the status found in a server response.
    ///
    /// Fails if the server reported a transition off the lifecycle, e.g. `valid -> pending`.
    pub fn advance(&mut self, next: S) -> Result<S, Problem> {
        if !self.status.can_advance_to(next) {
            return Err(Problem::new(
                "unexpectedStatus",
                format!("server moved from {:?} to {next:?}", self.status),
            ));
        }

        if self.status != next {
            log::trace!("Status {:?} -> {next:?}", self.status);
        }

        self.status = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_empty_string() {
        let x = serde_json::to_string(&EmptyString).unwrap();
        assert_eq!("\"\"", x);
    }

    #[test]
    fn test_api_empty_object() {
        let x = serde_json::to_string(&EmptyObject).unwrap();
        assert_eq!("{}", x);
    }

    #[test]
    fn bad_nonce_detection() {
        let urn = Problem::new("urn:ietf:params:acme:error:badNonce", "stale");
        assert!(urn.is_bad_nonce());
        assert!(!Problem::new("urn:ietf:params:acme:error:malformed", "x").is_bad_nonce());
    }

    #[test]
    fn problem_display_includes_subproblems() {
        let problem: Problem = serde_json::from_str(
            r#"{
                "type": "urn:ietf:params:acme:error:malformed",
                "detail": "Some of the identifiers requested were rejected",
                "subproblems": [{
                    "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                    "detail": "This CA will not issue for \"example.net\"",
                    "identifier": { "type": "dns", "value": "example.net" }
                }]
            }"#,
        )
        .unwrap();

        let text = problem.to_string();
        assert!(text.starts_with("urn:ietf:params:acme:error:malformed: Some"));
        assert!(text.contains("rejectedIdentifier (example.net)"));
    }

    #[test]
    fn state_follows_server_lifecycle() {
        let mut state = State::new(AuthorizationStatus::Pending);
        state.advance(AuthorizationStatus::Pending).unwrap();
        state.advance(AuthorizationStatus::Processing).unwrap();
        assert!(!state.is_terminal());
        state.advance(AuthorizationStatus::Valid).unwrap();
        assert!(state.is_terminal());

        let err = state.advance(AuthorizationStatus::Pending).unwrap_err();
        assert_eq!(err._type, "unexpectedStatus");
        assert_eq!(state.get(), AuthorizationStatus::Valid);
    }

    #[test]
    fn order_may_skip_observed_states() {
        let mut state = State::new(OrderStatus::Pending);
        state.advance(OrderStatus::Processing).unwrap();
        state.advance(OrderStatus::Valid).unwrap();

        let mut state = State::new(OrderStatus::Ready);
        assert!(state.advance(OrderStatus::Pending).is_err());
        state.advance(OrderStatus::Invalid).unwrap();
        assert!(state.advance(OrderStatus::Valid).is_err());
    }
}
