//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user. To ensure the user only use appropriate actions, this library have simple façade
//! structs that wraps the actual [`api::Order`].
//!
//! 1. First prove ownership:
//!    * [`NewOrder`] -> [`Auth`]* -> [`Challenge`]
//! 2. Then submit CSR and download the cert.
//!    * [`NewOrder`] -> [`CsrOrder`] -> [`CertOrder`]
//!
//! \* Possibly multiple auths.
//!
//! [`Certifier`](crate::Certifier) drives all of this for a set of domains.

use std::{sync::Arc, time::Duration};

use base64::prelude::*;
use time::OffsetDateTime;
use tokio::time::{sleep, Instant};

use crate::{
    acc::AccountInner,
    api::{self, OrderStatus, State},
    cert::{create_csr, CertificateKey, Resource},
    req::req_safe_read_body,
    Error, Result,
};

mod auth;

pub use self::auth::{Auth, Challenge, Dns, Http, TlsAlpn};
pub(crate) use self::auth::validate_challenge;

/// How long to wait for a resource to reach a final state, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polling {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Polling {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Polling { timeout, interval }
    }

    pub(crate) fn deadline(&self) -> Deadline {
        Deadline {
            at: Instant::now() + self.timeout,
            polling: *self,
        }
    }
}

/// Running poll budget.
pub(crate) struct Deadline {
    at: Instant,
    polling: Polling,
}

impl Deadline {
    /// Sleeps one interval, cut short at the deadline. Fails once the deadline has passed.
    ///
    /// Callers poll after every successful wait, so the last poll happens at or past the deadline.
    pub(crate) async fn wait(&self, resource: impl FnOnce() -> String) -> Result<()> {
        let now = Instant::now();

        if now >= self.at {
            return Err(Error::PropagationTimeout {
                resource: resource(),
                timeout: self.polling.timeout,
            });
        }

        sleep(self.polling.interval.min(self.at - now)).await;
        Ok(())
    }
}

/// What to put in a newOrder request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderOptions {
    /// Domains of the certificate. The first one becomes the Common Name.
    pub domains: Vec<String>,

    /// Requested start of validity.
    pub not_before: Option<OffsetDateTime>,

    /// Requested end of validity.
    pub not_after: Option<OffsetDateTime>,

    /// Issuance profile offered by the CA.
    pub profile: Option<String>,
}

impl OrderOptions {
    pub fn new(domains: Vec<String>) -> Self {
        OrderOptions {
            domains,
            ..Default::default()
        }
    }

    pub fn not_before(mut self, not_before: OffsetDateTime) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn not_after(mut self, not_after: OffsetDateTime) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

/// The order wrapped with an outer façade.
pub(crate) struct Order {
    pub(crate) inner: Arc<AccountInner>,
    pub(crate) api_order: api::Order,
    pub(crate) url: String,
}

impl Order {
    pub(crate) fn new(inner: &Arc<AccountInner>, api_order: api::Order, url: String) -> Self {
        Order {
            inner: inner.clone(),
            api_order,
            url,
        }
    }

    /// Re-reads the order (POST-as-GET), keeping the requested domain order.
    async fn refresh(&mut self) -> Result<()> {
        let res = self.inner.transport.call(&self.url, &api::EmptyString).await?;
        let api_order = res.json::<api::Order>().await?;
        self.api_order.overwrite(api_order)?;
        Ok(())
    }

    /// Polls until the order is `valid` or `invalid`.
    async fn wait_done(&mut self, polling: Polling) -> Result<()> {
        let deadline = polling.deadline();
        let mut state = State::new(self.api_order.status.unwrap_or(OrderStatus::Pending));

        loop {
            match self.api_order.status.map(|status| state.advance(status)).transpose()? {
                Some(OrderStatus::Valid) => return Ok(()),
                Some(OrderStatus::Invalid) => {
                    let problem = self.api_order.error.clone().unwrap_or_else(|| {
                        api::Problem::new("orderInvalid", format!("order {} is invalid", self.url))
                    });
                    return Err(Error::OrderInvalid(problem));
                }
                _ => {}
            }

            deadline.wait(|| format!("order {}", self.url)).await?;
            self.refresh().await?;
        }
    }
}

/// A new order created by [`Account::new_order`].
///
/// An order is created using one or many domains (a primary `CN` and possible multiple
/// alt names). All domains in the order must have authorizations ([confirmed ownership])
/// before the order can progress to submitting a [CSR].
///
/// This order façade provides calls to provide such authorizations and to progress the order
/// when ready.
///
/// The ACME API provider might "remember" for a time that you already own a domain, which
/// means you might not need to prove the ownership every time. Use appropriate methods to
/// first check whether you really need to handle authorizations.
///
/// [`Account::new_order`]: crate::Account::new_order
/// [confirmed ownership]: crate#domain-ownership
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
pub struct NewOrder {
    pub(crate) order: Order,
}

impl NewOrder {
    /// Tell if the domains in this order have been authorized.
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// In ACME API terms, the order can either be `ready` or `valid`, which both would
    /// mean we have passed the authorization stage.
    ///
    /// [`refresh`]: NewOrder::refresh
    pub fn is_validated(&self) -> bool {
        self.order.api_order.is_status(OrderStatus::Ready)
            || self.order.api_order.is_status(OrderStatus::Valid)
    }

    /// If the order [`is_validated`] progress it to a [`CsrOrder`].
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// [`is_validated`]: NewOrder::is_validated
    /// [`refresh`]: NewOrder::refresh
    pub fn confirm_validations(&self) -> Option<CsrOrder> {
        if self.is_validated() {
            Some(CsrOrder {
                order: Order::new(
                    &self.order.inner,
                    self.order.api_order.clone(),
                    self.order.url.clone(),
                ),
            })
        } else {
            None
        }
    }

    /// Refresh the order state against the ACME API.
    ///
    /// RFC 8555 calls this a "POST-as-GET" against the order URL.
    pub async fn refresh(&mut self) -> Result<()> {
        self.order.refresh().await
    }

    /// Provide the authorizations. The number of authorizations will be the same as
    /// the number of domains requests, i.e. at least one (the primary CN), but possibly
    /// more (for alt names).
    ///
    /// If the order includes new domain names that have not been authorized before, this
    /// list might contain a mix of already valid and not yet valid auths.
    pub async fn authorizations(&self) -> Result<Vec<Auth>> {
        let mut result = vec![];

        for auth_url in self.order.api_order.authorizations.iter().flatten() {
            let res = self
                .order
                .inner
                .transport
                .call(auth_url, &api::EmptyString)
                .await?;
            let api_auth = res.json::<api::Authorization>().await?;
            result.push(Auth::new(&self.order.inner, api_auth, auth_url));
        }

        Ok(result)
    }

    /// URL of the order.
    pub fn url(&self) -> &str {
        &self.order.url
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// An order that is ready for a [CSR] submission.
///
/// To submit the CSR is called "finalizing" the order.
///
/// To finalize, the user supplies a private key (from which a public key is derived), or a
/// complete CSR. This library provides [`create_p256_key`] to create private keys, but the user
/// can opt for creating them in some other way.
///
/// Right now Let's Encrypt [supports]:
///
/// * RSA keys from 2048 to 4096 bits in length
/// * P-256 and P-384 ECDSA keys
///
/// Keys handled by this library are P-256 or P-384. Bring a CSR to use RSA.
///
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
/// [`create_p256_key`]: crate::create_p256_key
/// [supports]: https://letsencrypt.org/docs/integration-guide/#supported-key-algorithms
pub struct CsrOrder {
    pub(crate) order: Order,
}

impl CsrOrder {
    /// Finalize the order by providing a private key as PEM.
    ///
    /// Once the CSR has been submitted, the order goes into a `processing` status,
    /// where we must poll until the status changes.
    ///
    /// This is a convenience wrapper that in turn calls the lower level [`finalize_key`].
    ///
    /// [`finalize_key`]: CsrOrder::finalize_key
    pub async fn finalize(self, private_key_pem: &str, polling: Polling) -> Result<CertOrder> {
        let key = CertificateKey::from_pkcs8_pem(private_key_pem)?;
        self.finalize_key(key, &[], polling).await
    }

    /// Creates the CSR for the domains in the order and submits it to the ACME API.
    ///
    /// `emails` are added to the CSR as RFC 822 names.
    pub async fn finalize_key(
        self,
        key: CertificateKey,
        emails: &[String],
        polling: Polling,
    ) -> Result<CertOrder> {
        // the domains that we have authorized
        let domains = self.order.api_order.domains();

        let csr_der = create_csr(&key, &domains, emails)?;
        let private_key = key.to_pkcs8_pem()?;

        let order = self.submit_csr(&csr_der, polling).await?;

        Ok(CertOrder {
            private_key: Some(private_key),
            order,
        })
    }

    /// Submits a CSR built elsewhere, in DER.
    ///
    /// The resulting certificate has no private key attached.
    pub async fn finalize_csr(self, csr_der: &[u8], polling: Polling) -> Result<CertOrder> {
        let order = self.submit_csr(csr_der, polling).await?;

        Ok(CertOrder {
            private_key: None,
            order,
        })
    }

    async fn submit_csr(self, csr_der: &[u8], polling: Polling) -> Result<Order> {
        // this is not the same as PEM.
        let finalize = api::Finalize::new(BASE64_URL_SAFE_NO_PAD.encode(csr_der));

        let mut order = self.order;

        // if the CSR is invalid, we will get a 4xx code back
        let res = order
            .inner
            .transport
            .call(&order.api_order.finalize, &finalize)
            .await?;
        order.api_order.overwrite(res.json::<api::Order>().await?)?;

        // valid -> cert is issued
        // invalid -> the whole thing is off
        order.wait_done(polling).await?;

        Ok(order)
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// Order for an issued certificate that is ready to download.
pub struct CertOrder {
    private_key: Option<zeroize::Zeroizing<String>>,
    order: Order,
}

impl CertOrder {
    /// Request download of the issued certificate.
    ///
    /// With `bundle` the issuer chain is kept in [`Resource::certificate`]. A CA may answer with an
    /// empty body while the certificate is still being published; that is retried within
    /// `polling`.
    pub async fn download_cert(self, bundle: bool, polling: Polling) -> Result<Resource> {
        let url = self
            .order
            .api_order
            .certificate
            .clone()
            .ok_or_else(|| {
                Error::Protocol(api::Problem::new(
                    "malformed",
                    "valid order without certificate URL",
                ))
            })?;

        let inner = &self.order.inner;
        let deadline = polling.deadline();

        let chain = loop {
            let res = inner.transport.call(&url, &api::EmptyString).await?;
            let chain = req_safe_read_body(res).await;

            if !chain.trim().is_empty() {
                break chain;
            }

            log::debug!("Certificate at {url} not available yet");
            deadline.wait(|| format!("certificate {url}")).await?;
        };

        let domain = self
            .order
            .api_order
            .domains()
            .first()
            .map(|domain| domain.to_string())
            .unwrap_or_default();

        Resource::from_chain(domain, url, self.private_key, &chain, bundle)
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}
