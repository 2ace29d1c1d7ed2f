use std::time::Duration;

use der::Encode as _;
use time::OffsetDateTime;

use crate::{
    api::{OrderStatus, Problem},
    cert::{csr_domains, parse_csr, CertificateKey, Resource},
    create_p256_key,
    order::{CsrOrder, NewOrder, OrderOptions, Polling},
    resolver::Resolver,
    Account, Error, Result,
};

/// Default time to wait for order finalization and certificate download.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time between order polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What to obtain a certificate for.
#[derive(Debug, Clone, Default)]
pub struct ObtainRequest {
    /// Domains of the certificate. The first one becomes the Common Name.
    pub domains: Vec<String>,

    /// Key of the certificate. A P-256 key is generated when absent.
    pub private_key: Option<CertificateKey>,

    /// Keep the issuer chain in [`Resource::certificate`].
    pub bundle: bool,

    /// Email addresses added to the CSR.
    pub emails: Vec<String>,

    pub not_before: Option<OffsetDateTime>,
    pub not_after: Option<OffsetDateTime>,

    /// Issuance profile offered by the CA.
    pub profile: Option<String>,

    /// Issue for the domains that passed validation instead of failing the whole request.
    pub allow_partial: bool,
}

impl ObtainRequest {
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ObtainRequest {
            domains: domains.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Obtain a certificate for a CSR built elsewhere.
#[derive(Debug, Clone, Default)]
pub struct ObtainForCsrRequest {
    /// The CSR, in DER or PEM.
    pub csr: Vec<u8>,

    /// Keep the issuer chain in [`Resource::certificate`].
    pub bundle: bool,

    pub not_before: Option<OffsetDateTime>,
    pub not_after: Option<OffsetDateTime>,
    pub profile: Option<String>,
}

impl ObtainForCsrRequest {
    pub fn new(csr: impl Into<Vec<u8>>) -> Self {
        ObtainForCsrRequest {
            csr: csr.into(),
            ..Default::default()
        }
    }
}

/// Runs the whole issuance flow for an account.
///
/// 1. Place an order for the requested domains.
/// 2. Solve its authorizations with the [`Resolver`].
/// 3. Submit a CSR once the order is ready.
/// 4. Download the certificate once the order is valid.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use acme::{
///     challenge::{http01::MemoryProvider, ChallengeType},
///     Certifier, Directory, DirectoryUrl, ObtainRequest, Resolver,
/// };
///
/// # async fn run() -> eyre::Result<()> {
/// let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;
/// let account = dir.register_account(Some(vec!["mailto:admin@example.org".to_owned()])).await?;
///
/// // serve these from /.well-known/acme-challenge/
/// let proofs = Arc::new(MemoryProvider::new());
/// let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs.clone());
///
/// let certifier = Certifier::new(account, resolver);
/// let cert = certifier
///     .obtain(ObtainRequest::new(["example.org", "www.example.org"]))
///     .await?;
///
/// println!("{}", cert.certificate());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Certifier {
    account: Account,
    resolver: Resolver,
    polling: Polling,
}

impl Certifier {
    pub fn new(account: Account, resolver: Resolver) -> Self {
        Certifier {
            account,
            resolver,
            polling: Polling::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL),
        }
    }

    /// Time to wait for the order to become ready and valid, and for the certificate to appear.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.polling.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling.interval = interval;
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Obtains a certificate for `request.domains`.
    ///
    /// Authorizations are solved concurrently. When one fails, the first failure in
    /// authorization order is returned; with `allow_partial` a new order is placed for the
    /// domains that passed instead.
    pub async fn obtain(&self, request: ObtainRequest) -> Result<Resource> {
        log::info!(
            "[{}] acme: Obtaining bundled SAN certificate",
            request.domains.join(", ")
        );

        let options = OrderOptions {
            domains: request.domains,
            not_before: request.not_before,
            not_after: request.not_after,
            profile: request.profile,
        };

        let order = self.authorized_order(options, request.allow_partial).await?;

        let key = request
            .private_key
            .unwrap_or_else(|| CertificateKey::from(create_p256_key()));

        let cert_order = order
            .finalize_key(key, &request.emails, self.polling)
            .await?;

        cert_order.download_cert(request.bundle, self.polling).await
    }

    /// Obtains a certificate for the domains named by a CSR, submitting the CSR unchanged.
    ///
    /// The returned resource carries the CSR as given and no private key.
    pub async fn obtain_for_csr(&self, request: ObtainForCsrRequest) -> Result<Resource> {
        let csr = parse_csr(&request.csr)?;
        let domains = csr_domains(&csr)?;
        let csr_der = csr.to_der()?;

        log::info!(
            "[{}] acme: Obtaining SAN certificate given a CSR",
            domains.join(", ")
        );

        let options = OrderOptions {
            domains,
            not_before: request.not_before,
            not_after: request.not_after,
            profile: request.profile,
        };

        let order = self.authorized_order(options, false).await?;
        let cert_order = order.finalize_csr(&csr_der, self.polling).await?;
        let resource = cert_order.download_cert(request.bundle, self.polling).await?;

        Ok(resource.with_csr(request.csr))
    }

    async fn authorized_order(&self, mut options: OrderOptions, allow_partial: bool) -> Result<CsrOrder> {
        let order = self.account.new_order_with(&options).await?;
        let outcomes = self.resolver.solve(order.authorizations().await?).await;

        let mut solved = Vec::new();
        let mut first_error = None;

        for outcome in outcomes {
            match outcome.result {
                Ok(()) => solved.push(outcome.domain),
                Err(err) => {
                    log::warn!("{err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        let Some(err) = first_error else {
            return self.wait_ready(order).await;
        };

        if !allow_partial || solved.is_empty() {
            return Err(err);
        }

        options
            .domains
            .retain(|domain| solved.iter().any(|ok| ok == domain.trim_start_matches("*.")));

        log::info!(
            "[{}] acme: Ordering again for the validated domains only",
            options.domains.join(", ")
        );

        // authorizations of the validated domains are reused by the CA
        let order = self.account.new_order_with(&options).await?;
        let outcomes = self.resolver.solve(order.authorizations().await?).await;

        if let Some(err) = outcomes.into_iter().find_map(|outcome| outcome.result.err()) {
            return Err(err);
        }

        self.wait_ready(order).await
    }

    /// Polls the order until the CA has taken note of every authorization.
    async fn wait_ready(&self, mut order: NewOrder) -> Result<CsrOrder> {
        let deadline = self.polling.deadline();

        loop {
            order.refresh().await?;

            if let Some(csr_order) = order.confirm_validations() {
                return Ok(csr_order);
            }

            if order.api_order().is_status(OrderStatus::Invalid) {
                let problem = order.api_order().error.clone().unwrap_or_else(|| {
                    Problem::new("orderInvalid", format!("order {} is invalid", order.url()))
                });
                return Err(Error::OrderInvalid(problem));
            }

            deadline.wait(|| format!("order {}", order.url())).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        cert::create_csr,
        challenge::{http01::MemoryProvider, ChallengeType, Provider},
        error::ValidationError,
        test::{StubCa, StubOptions},
        Directory, DirectoryUrl,
    };

    async fn account(server: &StubCa) -> Account {
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url)).await.unwrap();
        dir.register_account(Some(vec!["mailto:foo@bar.com".to_owned()]))
            .await
            .unwrap()
    }

    fn certifier(acc: Account, resolver: Resolver) -> Certifier {
        let resolver = resolver
            .propagation_timeout(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(20));

        Certifier::new(acc, resolver)
            .timeout(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn obtain_with_http01() {
        let server = StubCa::start();
        let proofs = Arc::new(MemoryProvider::new());
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs.clone());
        let certifier = certifier(account(&server).await, resolver);

        let mut request = ObtainRequest::new(["example.test", "www.example.test"]);
        request.bundle = true;
        let cert = certifier.obtain(request).await.unwrap();

        assert_eq!(cert.domain(), "example.test");
        assert!(!cert.certificate().is_empty());
        assert!(!cert.issuer_certificate().is_empty());
        assert!(cert.private_key().is_some_and(|pem| pem.contains("PRIVATE KEY")));
        assert!(cert.csr().is_empty());
        assert_eq!(cert.certificate_chain().unwrap().len(), 2);

        // every proof was cleaned up
        assert!(proofs.is_empty());

        let csr = parse_csr(&server.finalized_csrs()[0]).unwrap();
        assert_eq!(csr_domains(&csr).unwrap(), ["example.test", "www.example.test"]);
    }

    #[tokio::test]
    async fn obtain_keeps_supplied_key() {
        let server = StubCa::start();
        let proofs = Arc::new(MemoryProvider::new());
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs);
        let certifier = certifier(account(&server).await, resolver);

        let key = CertificateKey::from_pkcs8_pem(include_str!("testdata/p384.pem")).unwrap();
        let mut request = ObtainRequest::new(["example.test"]);
        request.private_key = Some(key.clone());

        let cert = certifier.obtain(request).await.unwrap();
        assert_eq!(cert.private_key(), Some(key.to_pkcs8_pem().unwrap().as_str()));
        assert_eq!(cert.certificate_chain().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn obtain_for_csr_returns_given_csr() {
        let server = StubCa::start();
        let proofs = Arc::new(MemoryProvider::new());
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs);
        let certifier = certifier(account(&server).await, resolver);

        let key = CertificateKey::from(create_p256_key());
        let csr = create_csr(&key, &["csr.example.test", "alt.example.test"], &[]).unwrap();

        let cert = certifier
            .obtain_for_csr(ObtainForCsrRequest::new(csr.clone()))
            .await
            .unwrap();

        assert_eq!(cert.csr(), csr);
        assert!(cert.private_key().is_none());
        assert!(!cert.certificate().is_empty());
        assert_eq!(server.finalized_csrs(), [csr]);

        let domains = server
            .order_payloads()
            .iter()
            .flat_map(|order| order["identifiers"].as_array().cloned().unwrap_or_default())
            .map(|id| id["value"].as_str().unwrap().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(domains, ["csr.example.test", "alt.example.test"]);
    }

    #[derive(Default)]
    struct Failing {
        clean_ups: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for Failing {
        async fn present(&self, _domain: &str, _token: &str, _key_auth: &str) -> eyre::Result<()> {
            eyre::bail!("zone is read-only")
        }

        async fn clean_up(&self, _domain: &str, _token: &str, _key_auth: &str) -> eyre::Result<()> {
            *self.clean_ups.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_present_fails_obtain() {
        let server = StubCa::start();
        let provider = Arc::new(Failing::default());
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, provider.clone());
        let certifier = certifier(account(&server).await, resolver);

        let err = certifier
            .obtain(ObtainRequest::new(["example.test"]))
            .await
            .unwrap_err();

        let Error::ValidationFailed { domain, reason } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(domain, "example.test");
        assert!(matches!(reason, ValidationError::Present(_)));
        assert_eq!(*provider.clean_ups.lock(), 1);
        assert!(server.finalized_csrs().is_empty());
    }

    #[tokio::test]
    async fn first_failure_in_authorization_order_wins() {
        let server = StubCa::start_with(StubOptions {
            invalid_domains: vec!["bad-1.test".to_owned(), "bad-2.test".to_owned()],
            ..Default::default()
        });
        let proofs = Arc::new(MemoryProvider::new());
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs.clone());
        let certifier = certifier(account(&server).await, resolver);

        let err = certifier
            .obtain(ObtainRequest::new(["ok.test", "bad-1.test", "bad-2.test"]))
            .await
            .unwrap_err();

        assert_eq!(err.domain(), Some("bad-1.test"));
        assert!(proofs.is_empty());
    }

    #[tokio::test]
    async fn partial_issuance_drops_failed_domains() {
        let server = StubCa::start_with(StubOptions {
            invalid_domains: vec!["bad.test".to_owned()],
            ..Default::default()
        });
        let proofs = Arc::new(MemoryProvider::new());
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs);
        let certifier = certifier(account(&server).await, resolver);

        let mut request = ObtainRequest::new(["ok.test", "bad.test", "also-ok.test"]);
        request.allow_partial = true;
        let cert = certifier.obtain(request).await.unwrap();

        assert_eq!(cert.domain(), "ok.test");
        let csr = parse_csr(&server.finalized_csrs()[0]).unwrap();
        assert_eq!(csr_domains(&csr).unwrap(), ["ok.test", "also-ok.test"]);
    }

    #[tokio::test]
    async fn rejected_identifier_is_a_protocol_error() {
        let server = StubCa::start();
        let resolver = Resolver::new().with_provider(ChallengeType::Http01, Arc::new(MemoryProvider::new()));
        let certifier = certifier(account(&server).await, resolver);

        let err = certifier
            .obtain(ObtainRequest::new(["forbidden.test"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
        assert!(err.problem().unwrap()._type.ends_with(":rejectedIdentifier"));
    }

    /// Records when each domain is presented and cleaned up.
    #[derive(Default)]
    struct Timed {
        sequential: Option<Duration>,
        calls: Mutex<Vec<(&'static str, String, Instant)>>,
    }

    impl Timed {
        fn at(&self, action: &str, domain: &str) -> Instant {
            self.calls
                .lock()
                .iter()
                .find(|(a, d, _)| *a == action && d == domain)
                .map(|(.., at)| *at)
                .unwrap()
        }
    }

    #[async_trait]
    impl Provider for Timed {
        async fn present(&self, domain: &str, _token: &str, _key_auth: &str) -> eyre::Result<()> {
            self.calls
                .lock()
                .push(("present", domain.to_owned(), Instant::now()));
            Ok(())
        }

        async fn clean_up(&self, domain: &str, _token: &str, _key_auth: &str) -> eyre::Result<()> {
            self.calls
                .lock()
                .push(("clean_up", domain.to_owned(), Instant::now()));
            Ok(())
        }

        fn sequential(&self) -> Option<Duration> {
            self.sequential
        }
    }

    #[tokio::test]
    async fn sequential_provider_is_spaced_out() {
        let server = StubCa::start_with(StubOptions {
            challenge_types: vec![("concurrent.test".to_owned(), vec!["http-01"])],
            ..Default::default()
        });

        let sequential = Arc::new(Timed {
            sequential: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let concurrent = Arc::new(Timed::default());
        let resolver = Resolver::new()
            .with_provider(ChallengeType::Dns01, sequential.clone())
            .with_provider(ChallengeType::Http01, concurrent.clone());
        let certifier = certifier(account(&server).await, resolver);

        let started = Instant::now();
        let cert = certifier
            .obtain(ObtainRequest::new(["a.test", "concurrent.test", "b.test"]))
            .await
            .unwrap();
        assert_eq!(cert.domain(), "a.test");

        let presents = sequential
            .calls
            .lock()
            .iter()
            .filter(|(action, ..)| *action == "present")
            .map(|(_, domain, _)| domain.clone())
            .collect::<Vec<_>>();
        assert_eq!(presents, ["a.test", "b.test"]);

        let first = sequential.at("present", "a.test");
        let second = sequential.at("present", "b.test");
        assert!(second - first >= Duration::from_secs(2));
        assert!(started.elapsed() >= Duration::from_secs(2));

        // the http-01 domain does not queue behind the sequential provider
        let concurrent_done = concurrent.at("clean_up", "concurrent.test");
        assert!(concurrent_done < second);
        assert!(concurrent_done - started < Duration::from_secs(1));
    }
}
