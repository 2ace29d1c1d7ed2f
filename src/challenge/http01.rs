//! `http-01` proofs.
//!
//! See [RFC 8555 §8.3].
//!
//! [RFC 8555 §8.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.3

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::Provider;

/// Path the CA requests the proof for `token` from.
pub fn challenge_path(token: &str) -> String {
    format!("/.well-known/acme-challenge/{token}")
}

/// Keeps presented `http-01` proofs in memory.
///
/// Hook [`key_authorization`](Self::key_authorization) into the web server answering port 80 for
/// the domains being validated:
///
/// ```
/// use acme::challenge::http01::MemoryProvider;
///
/// fn respond(proofs: &MemoryProvider, path: &str) -> Option<String> {
///     let token = path.strip_prefix("/.well-known/acme-challenge/")?;
///     proofs.key_authorization(token)
/// }
/// ```
#[derive(Debug, Default)]
pub struct MemoryProvider {
    proofs: RwLock<HashMap<String, String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response body for a challenge request, if the token is currently presented.
    pub fn key_authorization(&self, token: &str) -> Option<String> {
        self.proofs.read().get(token).cloned()
    }

    /// Number of proofs currently presented.
    pub fn len(&self) -> usize {
        self.proofs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.read().is_empty()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()> {
        log::debug!("Serving {} for {domain}", challenge_path(token));

        self.proofs
            .write()
            .insert(token.to_owned(), key_auth.to_owned());

        Ok(())
    }

    async fn clean_up(&self, _domain: &str, token: &str, _key_auth: &str) -> eyre::Result<()> {
        self.proofs.write().remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn proofs_are_served_until_cleaned_up() {
        let provider = MemoryProvider::new();
        assert!(provider.is_empty());

        provider
            .present("example.test", "tok", "tok.thumb")
            .await
            .unwrap();
        assert_eq!(provider.key_authorization("tok").as_deref(), Some("tok.thumb"));
        assert_eq!(provider.key_authorization("other"), None);

        provider
            .clean_up("example.test", "tok", "tok.thumb")
            .await
            .unwrap();
        assert!(provider.is_empty());
        assert_eq!(challenge_path("tok"), "/.well-known/acme-challenge/tok");
    }
}
