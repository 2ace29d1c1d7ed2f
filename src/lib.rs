//! Unattended certificate issuance from ACME (Automatic Certificate Management Environment)
//! providers such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! It follows [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555), using ACME v2 to
//! issue/renew certificates.
//!
//! # Usage
//!
//! 1. Fetch the [`Directory`] of the CA and register (or load) an [`Account`].
//! 2. Register a [`challenge::Provider`] per challenge type with a [`Resolver`].
//! 3. Ask a [`Certifier`] to [`obtain`](Certifier::obtain) a certificate.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use acme::{
//!     challenge::{exec::ExecProvider, ChallengeType},
//!     Certifier, Directory, DirectoryUrl, ObtainRequest, Resolver,
//! };
//!
//! # async fn run() -> eyre::Result<()> {
//! let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;
//! let account = dir.register_account(Some(vec!["mailto:admin@example.org".to_owned()])).await?;
//!
//! // EXEC_PATH=/usr/local/bin/update-dns
//! let dns = Arc::new(ExecProvider::from_env()?);
//! let resolver = Resolver::new().with_provider(ChallengeType::Dns01, dns);
//!
//! let cert = Certifier::new(account, resolver)
//!     .obtain(ObtainRequest::new(["example.org", "*.example.org"]))
//!     .await?;
//!
//! std::fs::write("example.org.crt", cert.certificate())?;
//! # Ok(())
//! # }
//! ```
//!
//! The [`order`] module exposes each step of the flow for callers that want to drive it by hand.
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. For ACME, this means proving you control either:
//!
//! - a server answering TLS or HTTP requests for that domain;
//! - the DNS server answering name lookups against the domain.
//!
//! A [`challenge::Provider`] puts the proof in place before the CA is asked to check it, and
//! removes it afterwards.
//!
//! See [`tls_alpn_challenge`], [`http_challenge`], and [`dns_challenge`].
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. See
//! [`authorizations`].
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the poll interval really low, but balance this against the real risk
//! of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`http_challenge`]: crate::order::Auth::http_challenge()
//! [`tls_alpn_challenge`]: crate::order::Auth::tls_alpn_challenge()
//! [`dns_challenge`]: crate::order::Auth::dns_challenge()
//! [`authorizations`]: crate::order::NewOrder::authorizations()
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cert;
mod certifier;
mod dir;
mod error;
mod jws;
mod nonce;
mod req;
mod resolver;
mod trans;

pub mod api;
pub mod challenge;
pub mod order;


pub use crate::{
    acc::{Account, ExternalAccountKey},
    cert::{create_p256_key, CertificateKey, Resource},
    certifier::{
        Certifier, ObtainForCsrRequest, ObtainRequest, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
    },
    dir::{Directory, DirectoryUrl},
    error::{BoxError, Error, Result, ValidationError},
    resolver::Resolver,
};
