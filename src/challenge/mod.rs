//! Domain validation backends.
//!
//! A [`Provider`] puts the proof for one challenge in place and removes it again afterwards. The
//! [`Resolver`](crate::Resolver) decides which provider handles which authorization, so a provider
//! only ever sees a domain name, the challenge token and the key authorization.
//!
//! Built in providers:
//!
//! - [`http01::MemoryProvider`] keeps `http-01` proofs in memory for a web server to serve.
//! - [`exec::ExecProvider`] runs an external program to publish `dns-01` records.

use std::{fmt, time::Duration};

use async_trait::async_trait;

pub mod dns01;
pub mod exec;
pub mod http01;

/// Challenge types defined by [RFC 8555 §8] and [RFC 8737].
///
/// [RFC 8555 §8]: https://datatracker.ietf.org/doc/html/rfc8555#section-8
/// [RFC 8737]: https://datatracker.ietf.org/doc/html/rfc8737
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// The `type` field of the challenge object.
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Puts challenge proofs in place.
///
/// `present` and `clean_up` receive the domain being validated, the challenge token and the key
/// authorization (`<token>.<account key thumbprint>`). How the proof is derived from these depends
/// on the challenge type; see [`dns01::challenge_info`] for `dns-01`.
///
/// `clean_up` is called once for every `present`, whether validation succeeded or not. Its errors
/// are logged and otherwise ignored.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Makes the proof for `domain` observable to the CA.
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()>;

    /// Removes whatever `present` created.
    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()>;

    /// Propagation timeout and poll interval to use instead of the resolver's defaults.
    fn timeout(&self) -> Option<(Duration, Duration)> {
        None
    }

    /// When set, this provider handles one domain at a time, waiting the returned interval between
    /// domains.
    fn sequential(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_match_challenge_objects() {
        let names = [
            ChallengeType::Http01,
            ChallengeType::Dns01,
            ChallengeType::TlsAlpn01,
        ]
        .map(|ty| ty.to_string());

        assert_eq!(names, ["http-01", "dns-01", "tls-alpn-01"]);
    }
}
