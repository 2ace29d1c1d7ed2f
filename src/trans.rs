use std::sync::Arc;

use serde::Serialize;

use crate::{
    acc::AcmeKey,
    jws,
    nonce::NoncePool,
    req::{req_handle_error, req_post},
    Error, Result,
};

/// A request whose nonce was rejected is sent again this many times, each with a fresh nonce.
const MAX_BAD_NONCE_RETRIES: usize = 1;

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call()` against newAccount url, which embeds the JWK.
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call()` for all calls after that, which only send the key ID.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    client: reqwest::Client,
    acme_key: AcmeKey,
    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub(crate) fn new(
        client: reqwest::Client,
        nonce_pool: Arc<NoncePool>,
        acme_key: AcmeKey,
    ) -> Self {
        Transport {
            client,
            acme_key,
            nonce_pool,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.acme_key.set_key_id(kid);
    }

    /// The key used in the transport
    pub(crate) fn acme_key(&self) -> &AcmeKey {
        &self.acme_key
    }

    /// Signs `body` and POSTs it to `url`.
    ///
    /// A `badNonce` rejection is retried once with a new nonce; a second one is returned as
    /// [`Error::NonceRejected`]. Any other problem document is [`Error::Protocol`].
    pub(crate) async fn call<T>(&self, url: &str, body: &T) -> Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        let mut retries = 0;

        loop {
            // Either get a new nonce, or reuse one from a previous response.
            let nonce = self.nonce_pool.get_nonce(&self.client).await?;

            let jws = jws::sign(url, nonce, &self.acme_key, body)?;
            let jws = serde_json::to_string(&jws)?;

            log::debug!("Call endpoint: {url}");
            let response = req_post(&self.client, url, jws).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract_nonce(&response);

            match req_handle_error(response).await {
                Ok(response) => return Ok(response),

                Err(problem) if problem.is_bad_nonce() => {
                    if retries >= MAX_BAD_NONCE_RETRIES {
                        return Err(Error::NonceRejected(problem));
                    }

                    retries += 1;
                    log::debug!("Retrying on bad nonce");
                }

                Err(problem) => return Err(Error::Protocol(problem)),
            }
        }
    }
}
