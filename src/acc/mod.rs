use std::{collections::HashSet, iter, sync::Arc};

use base64::prelude::*;
use time::format_description::well_known::Rfc3339;
use zeroize::Zeroizing;

use crate::{
    api, jws,
    order::{NewOrder, Order, OrderOptions},
    req::req_expect_header,
    trans::Transport,
    Error, Result,
};

mod acme_key;

pub(crate) use self::acme_key::{AcmeKey, KeyPair};

#[derive(Debug, Clone)]
pub(crate) struct AccountInner {
    pub transport: Transport,
    pub api_account: api::Account,
    pub api_directory: api::Directory,
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::register_account()`] and consists of a contact email
/// address and a private key for signing requests to the ACME API.
///
/// New accounts use elliptic curve P-256. Existing RSA and P-384 keys can be loaded with
/// [`Directory::load_account()`].
///
/// Cloning is cheap; all clones share the same key and nonce pool.
///
/// [`Directory::register_account()`]: crate::Directory::register_account()
/// [`Directory::load_account()`]: crate::Directory::load_account()
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        api_account: api::Account,
        api_directory: api::Directory,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                transport,
                api_account,
                api_directory,
            }),
        }
    }

    /// Private key for this account in PKCS#8 PEM.
    pub fn acme_private_key_pem(&self) -> Result<Zeroizing<String>> {
        self.inner.transport.acme_key().to_pem()
    }

    /// Key authorization for a challenge token.
    ///
    /// The same for every challenge type; see [`Provider::present`].
    ///
    /// [`Provider::present`]: crate::challenge::Provider::present
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        jws::key_authorization(token, self.inner.transport.acme_key())
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// Each order has a required `primary_name` (which will be set as the certificates `CN`) and a
    /// variable number of `alt_names`.
    ///
    /// This library doesn't constrain the number of `alt_names`, but it is limited by the ACME API
    /// provider. Let's Encrypt [sets a max of 100 names] per certificate.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    ///
    /// [sets a max of 100 names]: https://letsencrypt.org/docs/rate-limits/
    pub async fn new_order(&self, primary_name: &str, alt_names: &[&str]) -> Result<NewOrder> {
        let domains = iter::once(primary_name)
            .chain(alt_names.iter().copied())
            .map(ToOwned::to_owned)
            .collect();

        self.new_order_with(&OrderOptions::new(domains)).await
    }

    /// Create a new order with a validity window and/or issuance profile.
    pub async fn new_order_with(&self, options: &OrderOptions) -> Result<NewOrder> {
        let mut identifiers = Vec::new();
        let mut dedup = HashSet::new();
        for domain in &options.domains {
            if dedup.insert(domain.as_str()) {
                identifiers.push(api::Identifier::dns(domain));
            }
        }

        if identifiers.is_empty() {
            return Err(Error::InvalidRequest(
                "an order needs at least one domain".to_owned(),
            ));
        }

        let format_time = |time: Option<time::OffsetDateTime>| {
            time.map(|t| t.format(&Rfc3339))
                .transpose()
                .map_err(|err| Error::InvalidRequest(format!("order validity: {err}")))
        };

        let mut order = api::Order::from_identifiers(identifiers);
        order.not_before = format_time(options.not_before)?;
        order.not_after = format_time(options.not_after)?;
        order.profile = options.profile.clone();

        let new_order_url = self.inner.api_directory.new_order.as_str();

        let res = self.inner.transport.call(new_order_url, &order).await?;
        let order_url = req_expect_header(&res, "location")?;
        let api_order = res.json::<api::Order>().await?;

        let mut order = Order::new(&self.inner, order, order_url);
        order.api_order.overwrite(api_order)?;
        Ok(NewOrder { order })
    }

    /// Returns a reference to the account's API object.
    ///
    /// Useful for debugging.
    pub fn api_account(&self) -> &api::Account {
        &self.inner.api_account
    }
}

/// Credentials for [external account binding], issued by the CA out of band.
///
/// [external account binding]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4
#[derive(Clone)]
pub struct ExternalAccountKey {
    kid: String,
    hmac_key: Zeroizing<Vec<u8>>,
}

impl ExternalAccountKey {
    pub fn new(kid: impl Into<String>, hmac_key: &[u8]) -> Self {
        ExternalAccountKey {
            kid: kid.into(),
            hmac_key: Zeroizing::new(hmac_key.to_vec()),
        }
    }

    /// Reads the MAC key in the base64url form CAs hand it out in.
    pub fn from_base64url(kid: impl Into<String>, hmac_key: &str) -> Result<Self> {
        let hmac_key = BASE64_URL_SAFE_NO_PAD
            .decode(hmac_key.trim_end_matches('='))
            .map(Zeroizing::new)
            .map_err(|err| Error::Key(format!("EAB MAC key: {err}")))?;

        Ok(Self::new(kid, &hmac_key))
    }

    pub(crate) fn kid(&self) -> &str {
        &self.kid
    }

    pub(crate) fn hmac_key(&self) -> &[u8] {
        &self.hmac_key
    }
}

impl std::fmt::Debug for ExternalAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAccountKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use crate::{order::OrderOptions, test::StubCa, Directory, DirectoryUrl};

    #[tokio::test]
    async fn test_create_order() {
        let server = StubCa::start();

        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::fetch(url).await.unwrap();

        let acc = dir
            .register_account(Some(vec!["mailto:foo@bar.com".to_owned()]))
            .await
            .unwrap();

        let order = acc
            .new_order("acme-test.example.com", &["www.example.com", "acme-test.example.com"])
            .await
            .unwrap();
        assert_eq!(
            order.api_order().domains(),
            ["acme-test.example.com", "www.example.com"]
        );
    }

    #[tokio::test]
    async fn order_carries_validity_window_and_profile() {
        let server = StubCa::start();
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url)).await.unwrap();
        let acc = dir.register_account(None).await.unwrap();

        let not_before = OffsetDateTime::UNIX_EPOCH + Duration::days(20_000);
        let options = OrderOptions::new(vec!["example.test".to_owned()])
            .not_before(not_before)
            .not_after(not_before + Duration::days(7))
            .profile("shortlived");

        let _order = acc.new_order_with(&options).await.unwrap();

        let payload = server.order_payloads().pop().unwrap();
        assert_eq!(payload["notBefore"], "2024-10-04T00:00:00Z");
        assert_eq!(payload["notAfter"], "2024-10-11T00:00:00Z");
        assert_eq!(payload["profile"], "shortlived");
    }

    #[tokio::test]
    async fn empty_order_is_refused_locally() {
        let server = StubCa::start();
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url)).await.unwrap();
        let acc = dir.register_account(None).await.unwrap();

        let err = acc
            .new_order_with(&OrderOptions::new(Vec::new()))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, crate::Error::InvalidRequest(_)), "{err:?}");
        assert!(err.problem().is_none());
        assert!(server.order_payloads().is_empty());
    }

    #[test]
    fn eab_key_decodes_base64url() {
        let eab = super::ExternalAccountKey::from_base64url("kid", "c2VjcmV0").unwrap();
        assert_eq!(eab.hmac_key(), b"secret");
        assert!(!format!("{eab:?}").contains("secret"));
        assert!(super::ExternalAccountKey::from_base64url("kid", "not*base64").is_err());
    }
}
