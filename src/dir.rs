use std::sync::Arc;

use crate::{
    acc::{AcmeKey, ExternalAccountKey},
    api, jws,
    nonce::NoncePool,
    req::{default_client, req_expect_header, req_get, req_handle_error},
    trans::Transport,
    Account, Error, Result,
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// Holds the nonce pool shared by every account created from it; the pool lives as long as the
/// directory and its accounts.
#[derive(Clone)]
pub struct Directory {
    client: reqwest::Client,
    nonce_pool: Arc<NoncePool>,
    api_directory: api::Directory,
}

impl Directory {
    /// Fetches the directory object using a default HTTP client.
    pub async fn fetch(url: DirectoryUrl<'_>) -> Result<Directory> {
        Self::fetch_with_client(url, default_client()?).await
    }

    /// Fetches the directory object using the given HTTP client.
    ///
    /// Use this to configure proxies, timeouts or trusted roots.
    pub async fn fetch_with_client(
        url: DirectoryUrl<'_>,
        client: reqwest::Client,
    ) -> Result<Directory> {
        let res = req_handle_error(req_get(&client, url.to_url()).await?).await?;
        let api_directory = res.json::<api::Directory>().await?;
        let nonce_pool = Arc::new(NoncePool::new(&api_directory.new_nonce));

        Ok(Directory {
            client,
            nonce_pool,
            api_directory,
        })
    }

    /// Registers a new account with a freshly generated P-256 key.
    pub async fn register_account(&self, contact: Option<Vec<String>>) -> Result<Account> {
        self.upsert_account(AcmeKey::new(), contact, None).await
    }

    /// Registers a new account bound to an account the CA manages out of band.
    pub async fn register_account_with_eab(
        &self,
        contact: Option<Vec<String>>,
        eab: &ExternalAccountKey,
    ) -> Result<Account> {
        self.upsert_account(AcmeKey::new(), contact, Some(eab)).await
    }

    /// Registers, or looks up, the account for an existing PKCS#8 PEM key.
    ///
    /// RSA, P-256 and P-384 keys are supported.
    pub async fn load_account(
        &self,
        private_key_pem: &str,
        contact: Option<Vec<String>>,
    ) -> Result<Account> {
        let acme_key = AcmeKey::from_pem(private_key_pem)?;
        self.upsert_account(acme_key, contact, None).await
    }

    /// Looks up the account for an existing key, failing if the CA does not know it.
    pub async fn load_existing_account(&self, private_key_pem: &str) -> Result<Account> {
        let acme_key = AcmeKey::from_pem(private_key_pem)?;

        let acc = api::Account {
            only_return_existing: Some(true),
            ..Default::default()
        };

        self.new_account(acme_key, &acc).await
    }

    async fn upsert_account(
        &self,
        acme_key: AcmeKey,
        contact: Option<Vec<String>>,
        eab: Option<&ExternalAccountKey>,
    ) -> Result<Account> {
        let new_account_url = &self.api_directory.new_account;

        let external_account_binding = match eab {
            Some(eab) => {
                let binding = jws::sign_external_account_binding(
                    new_account_url,
                    eab.kid(),
                    eab.hmac_key(),
                    &acme_key,
                )?;
                Some(serde_json::to_value(binding)?)
            }
            None if self.api_directory.external_account_required() => {
                return Err(Error::ExternalAccountRequired);
            }
            None => None,
        };

        // Prepare making a call to newAccount. This is fine to do both for new
        // keys and existing. For existing the spec says to return a 200 with
        // the Location header set to the key ID (kid).
        let acc = api::Account {
            contact,
            terms_of_service_agreed: Some(true),
            external_account_binding,
            ..Default::default()
        };

        self.new_account(acme_key, &acc).await
    }

    async fn new_account(&self, acme_key: AcmeKey, acc: &api::Account) -> Result<Account> {
        let mut transport =
            Transport::new(self.client.clone(), Arc::clone(&self.nonce_pool), acme_key);

        let res = transport.call(&self.api_directory.new_account, acc).await?;

        let kid = req_expect_header(&res, "location")?;
        log::debug!("Key ID is: {kid}");
        let api_account = res.json::<api::Account>().await?;

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(Account::new(
            transport,
            api_account,
            self.api_directory.clone(),
        ))
    }

    /// Returns a reference to the directory's API object.
    ///
    /// Useful for debugging.
    pub fn api_directory(&self) -> &api::Directory {
        &self.api_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{StubCa, StubOptions};

    #[tokio::test]
    async fn test_create_directory() {
        let server = StubCa::start();

        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::fetch(url).await.unwrap();
        assert!(!dir.api_directory().external_account_required());
    }

    #[tokio::test]
    async fn test_create_account() {
        let server = StubCa::start();

        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::fetch(url).await.unwrap();

        let acc = dir
            .register_account(Some(vec!["mailto:foo@bar.com".to_owned()]))
            .await
            .unwrap();
        assert!(acc.api_account().is_status_valid());

        // only the newAccount request embeds the key
        let headers = server.protected_headers();
        assert!(headers[0].get("jwk").is_some());
        assert!(headers[0].get("kid").is_none());
    }

    #[tokio::test]
    async fn load_existing_rsa_account() {
        let server = StubCa::start();
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url)).await.unwrap();

        let pem = include_str!("testdata/rsa2048.pem");
        let acc = dir.load_existing_account(pem).await.unwrap();
        let _ = acc.new_order("example.test", &[]).await.unwrap();

        let headers = server.protected_headers();
        assert_eq!(headers[0]["alg"], "RS256");
        assert_eq!(headers[1]["alg"], "RS256");
        assert_eq!(headers[1]["kid"], format!("{}/acme/acct/1", server.url));
        assert!(headers[1].get("jwk").is_none());
    }

    #[tokio::test]
    async fn external_account_binding_is_enforced() {
        let server = StubCa::start_with(StubOptions {
            external_account_required: true,
            ..Default::default()
        });
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url)).await.unwrap();

        let err = dir.register_account(None).await.err().unwrap();
        assert!(matches!(err, Error::ExternalAccountRequired), "{err:?}");

        let eab = ExternalAccountKey::from_base64url("kid-1", "c2VjcmV0LW1hYy1rZXk").unwrap();
        let _acc = dir.register_account_with_eab(None, &eab).await.unwrap();

        let payloads = server.account_payloads();
        let binding = &payloads.last().unwrap()["externalAccountBinding"];
        assert!(binding["protected"].is_string());
        assert!(binding["signature"].is_string());
    }
}
