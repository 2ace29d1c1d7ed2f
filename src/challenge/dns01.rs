//! `dns-01` record helpers.
//!
//! See [RFC 8555 §8.4].
//!
//! [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4

use std::time::Duration;

use base64::prelude::*;
use sha2::{Digest as _, Sha256};

/// Default time to wait for a record to become visible to the CA.
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time between two authorization polls.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Default TTL for published records, in seconds.
pub const DEFAULT_TTL: u32 = 120;

const CHALLENGE_LABEL: &str = "_acme-challenge";

/// The TXT record to publish for a `dns-01` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeInfo {
    /// Absolute record name, `_acme-challenge.<domain>.`.
    pub fqdn: String,

    /// Name the record is actually published under.
    ///
    /// Same as `fqdn`; CNAME delegation of the challenge label is not followed.
    pub effective_fqdn: String,

    /// Record value, `base64url(SHA-256(key_auth))`.
    pub value: String,
}

/// Derives the record name and value for `domain` from the key authorization.
pub fn challenge_info(domain: &str, key_auth: &str) -> ChallengeInfo {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    let fqdn = format!("{CHALLENGE_LABEL}.{}", to_fqdn(domain));

    ChallengeInfo {
        effective_fqdn: fqdn.clone(),
        fqdn,
        value: BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth)),
    }
}

fn to_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_name_and_value() {
        let info = challenge_info("example.test", "token.thumbprint");

        assert_eq!(info.fqdn, "_acme-challenge.example.test.");
        assert_eq!(info.effective_fqdn, info.fqdn);
        assert_eq!(
            info.value,
            BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest("token.thumbprint"))
        );
        assert_eq!(info.value.len(), 43);
    }

    #[test]
    fn wildcard_and_absolute_names() {
        assert_eq!(
            challenge_info("*.example.test", "k").fqdn,
            "_acme-challenge.example.test."
        );
        assert_eq!(
            challenge_info("example.test.", "k").fqdn,
            "_acme-challenge.example.test."
        );
    }
}
