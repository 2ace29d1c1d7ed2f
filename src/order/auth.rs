use std::{marker::PhantomData, sync::Arc};

use sha2::{Digest as _, Sha256};

use super::Polling;
use crate::{
    acc::AccountInner,
    api::{self, AuthorizationStatus, ChallengeStatus, State},
    challenge::{dns01, ChallengeType},
    error::ValidationError,
    jws, Error, Result,
};

/// An authorization ([ownership proof]) for a domain name.
///
/// Each authorization for an order must be progressed to a valid state before the ACME API
/// will issue a certificate.
///
/// Authorizations may or may not be required depending on previous orders against the same
/// ACME account. The ACME API decides if the authorization is needed.
///
/// Currently there are three ways of providing the authorization.
///
/// * In a text file served using [HTTP] from a web server of the domain being authorized.
/// * A `TXT` [DNS] record under the domain being authorized.
/// * A special certificate presented during a [TLS-ALPN] handshake.
///
/// [ownership proof]: crate#domain-ownership
/// [HTTP]: Auth::http_challenge
/// [DNS]: Auth::dns_challenge
/// [TLS-ALPN]: Auth::tls_alpn_challenge
#[derive(Debug, Clone)]
pub struct Auth {
    pub(crate) inner: Arc<AccountInner>,
    pub(crate) api_auth: api::Authorization,
    pub(crate) auth_url: String,
}

impl Auth {
    pub(crate) fn new(
        inner: &Arc<AccountInner>,
        api_auth: api::Authorization,
        auth_url: &str,
    ) -> Self {
        Auth {
            inner: inner.clone(),
            api_auth,
            auth_url: auth_url.to_owned(),
        }
    }

    /// Domain name for this authorization.
    pub fn domain_name(&self) -> &str {
        &self.api_auth.identifier.value
    }

    /// Whether we actually need to do the authorization. This might not be needed if we have
    /// proven ownership of the domain recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        !matches!(self.api_auth.status, AuthorizationStatus::Valid)
    }

    /// Get the http challenge.
    ///
    /// The http challenge must be placed so it is accessible under:
    ///
    /// ```text
    /// http://<domain-to-be-proven>/.well-known/acme-challenge/<token>
    /// ```
    ///
    /// The challenge will be accessed over HTTP (not HTTPS), for obvious reasons.
    ///
    /// ```no_run
    /// use std::{fs::File, io::Write as _, time::Duration};
    ///
    /// use acme::order::{Auth, Polling};
    ///
    /// async fn web_authorize(auth: &Auth) -> eyre::Result<()> {
    ///   let challenge = auth.http_challenge().unwrap();
    ///
    ///   // Assuming our web server's root is under /var/www
    ///   let path = {
    ///     let token = challenge.http_token();
    ///     format!("/var/www/.well-known/acme-challenge/{}", token)
    ///   };
    ///
    ///   let mut file = File::create(&path)?;
    ///   file.write_all(challenge.http_proof()?.as_bytes())?;
    ///
    ///   let polling = Polling::new(Duration::from_secs(60), Duration::from_secs(2));
    ///   challenge.validate(polling).await?;
    ///
    ///   Ok(())
    /// }
    /// ```
    pub fn http_challenge(&self) -> Option<Challenge<Http>> {
        self.challenge(ChallengeType::Http01)
    }

    /// Get the dns challenge.
    ///
    /// The dns challenge is a `TXT` record that must put created under:
    ///
    /// ```text
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    ///
    /// The `<proof>` contains the signed token proving this account update it.
    ///
    /// ```no_run
    /// use std::time::Duration;
    ///
    /// use acme::order::{Auth, Polling};
    ///
    /// async fn dns_authorize(auth: &Auth) -> eyre::Result<()> {
    ///   let challenge = auth.dns_challenge().unwrap();
    ///   let record = format!("_acme-challenge.{}.", auth.domain_name());
    ///   // route_53_set_record(&record, "TXT", challenge.dns_proof()?);
    ///   let polling = Polling::new(Duration::from_secs(120), Duration::from_secs(5));
    ///   challenge.validate(polling).await?;
    ///   Ok(())
    /// }
    /// ```
    ///
    /// The dns proof is not the same as the http proof.
    pub fn dns_challenge(&self) -> Option<Challenge<Dns>> {
        self.challenge(ChallengeType::Dns01)
    }

    /// Returns the TLS ALPN challenge.
    ///
    /// The TLS ALPN challenge is a certificate that must be served when a TLS connection is made
    /// with the ALPN protocol "acme-tls/1". The certificate must contain a single dNSName SAN
    /// containing the domain being validated, as well as an ACME extension containing the SHA256 of
    /// the key authorization.
    pub fn tls_alpn_challenge(&self) -> Option<Challenge<TlsAlpn>> {
        self.challenge(ChallengeType::TlsAlpn01)
    }

    fn challenge<A>(&self, challenge_type: ChallengeType) -> Option<Challenge<A>> {
        self.api_auth
            .challenge(challenge_type.as_str())
            .map(|c| Challenge::new(self, c.clone()))
    }

    /// Challenge types the CA offers for this authorization.
    pub fn offered_types(&self) -> Vec<String> {
        self.api_auth
            .challenges
            .iter()
            .map(|c| c._type.clone())
            .collect()
    }

    /// Returns a reference to the authorization's API object.
    ///
    /// Useful for debugging.
    ///
    /// We don't refresh the authorization when the corresponding challenge is validated, so there
    /// will be no changes to see here.
    pub fn api_auth(&self) -> &api::Authorization {
        &self.api_auth
    }
}

/// Marker type for HTTP challenges.
#[doc(hidden)]
pub struct Http;

/// Marker type for DNS challenges.
#[doc(hidden)]
pub struct Dns;

/// Marker type for TLS ALPN challenges.
#[doc(hidden)]
pub struct TlsAlpn;

/// A DNS, HTTP, or TLS-ALPN challenge as obtained from the [`Auth`].
pub struct Challenge<A> {
    inner: Arc<AccountInner>,
    api_challenge: api::Challenge,
    domain: String,
    auth_url: String,
    _ph: PhantomData<A>,
}

/// See [RFC 8555 §8.3].
///
/// [RFC 8555 §8.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.3
impl Challenge<Http> {
    /// Returns the token, a unique identifier of the challenge.
    ///
    /// This is used as the file name in the HTTP challenge like so:
    ///
    /// ```text
    /// http://<domain-to-be-proven>/.well-known/acme-challenge/<token>
    /// ```
    pub fn http_token(&self) -> &str {
        &self.api_challenge.token
    }

    /// Returns the proof content for HTTP validation.
    ///
    /// Proof is typically placed in a text file that is served as the file named by `token`.
    pub fn http_proof(&self) -> Result<String> {
        self.key_authorization()
    }
}

/// See [RFC 8555 §8.4].
///
/// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
impl Challenge<Dns> {
    /// Returns the proof content for DNS validation.
    ///
    /// Proof is to be placed in a DNS TXT record like so:
    ///
    /// ```plain
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    pub fn dns_proof(&self) -> Result<String> {
        let key_auth = self.key_authorization()?;
        Ok(dns01::challenge_info(&self.domain, &key_auth).value)
    }
}

/// See [RFC 8737 §3].
///
/// [RFC 8737 §3]: https://datatracker.ietf.org/doc/html/rfc8737#section-3
impl Challenge<TlsAlpn> {
    /// Returns the proof content for TLS-ALPN validation.
    ///
    /// Proof is to be placed in the certificate used for validation.
    pub fn tls_alpn_proof(&self) -> Result<[u8; 32]> {
        let key_auth = self.key_authorization()?;
        Ok(Sha256::digest(key_auth).into())
    }
}

impl<A> Challenge<A> {
    fn new(auth: &Auth, api_challenge: api::Challenge) -> Self {
        Challenge {
            inner: auth.inner.clone(),
            api_challenge,
            domain: auth.domain_name().to_owned(),
            auth_url: auth.auth_url.clone(),
            _ph: PhantomData,
        }
    }

    fn key_authorization(&self) -> Result<String> {
        jws::key_authorization(&self.api_challenge.token, self.inner.transport.acme_key())
    }

    /// Returns true if this challenge needs validation.
    ///
    /// It might already been done in a previous order for the same account.
    pub fn need_validate(&self) -> bool {
        matches!(self.api_challenge.status, ChallengeStatus::Pending)
    }

    /// Tells the ACME API to attempt to validate the proof of this challenge.
    ///
    /// The challenge proof must be put in place before this call. Either by: placing it in a DNS
    /// record, updating a web server, or passing it to TLS connection for ALPN exchange.
    pub async fn validate(&self, polling: Polling) -> Result<()> {
        validate_challenge(
            &self.inner,
            &self.api_challenge.url,
            &self.auth_url,
            &self.domain,
            polling,
        )
        .await
    }

    /// Returns a reference to the challenge's API object.
    ///
    /// Useful for debugging.
    pub fn api_challenge(&self) -> &api::Challenge {
        &self.api_challenge
    }
}

/// Tells the CA the proof is in place, then polls the authorization to a final state.
///
/// The authorization is polled right away and then once per interval. Stops with
/// [`Error::PropagationTimeout`] when it is still pending after a poll made at the deadline.
pub(crate) async fn validate_challenge(
    inner: &AccountInner,
    challenge_url: &str,
    auth_url: &str,
    domain: &str,
    polling: Polling,
) -> Result<()> {
    let rejected = |problem: Option<&api::Problem>, status: &dyn std::fmt::Debug| {
        let problem = problem.cloned().unwrap_or_else(|| {
            api::Problem::new("unauthorized", format!("{domain} is {status:?}"))
        });

        Error::ValidationFailed {
            domain: domain.to_owned(),
            reason: ValidationError::Rejected(problem),
        }
    };

    let res = inner.transport.call(challenge_url, &api::EmptyObject).await?;
    let challenge = res.json::<api::Challenge>().await?;

    match challenge.status {
        ChallengeStatus::Valid => return Ok(()),
        ChallengeStatus::Invalid => return Err(rejected(challenge.error.as_ref(), &challenge.status)),
        ChallengeStatus::Pending | ChallengeStatus::Processing => {}
    }

    let deadline = polling.deadline();
    let mut state = State::new(AuthorizationStatus::Pending);

    loop {
        let auth = inner
            .transport
            .call(auth_url, &api::EmptyString)
            .await?
            .json::<api::Authorization>()
            .await?;

        match state.advance(auth.status)? {
            AuthorizationStatus::Valid => return Ok(()),
            AuthorizationStatus::Pending | AuthorizationStatus::Processing => {
                log::trace!("Authorization for {domain} is {:?}", auth.status);
            }
            status => return Err(rejected(auth.challenge_error(), &status)),
        }

        deadline
            .wait(|| format!("authorization for {domain}"))
            .await?;
    }
}
