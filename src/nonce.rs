use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::req::{req_expect_header, req_get, req_handle_error, req_header};

const REPLAY_NONCE: &str = "replay-nonce";

/// Most nonces kept around; the oldest is dropped first.
const MAX_POOLED: usize = 10;

/// Shared pool of anti-replay nonces.
///
/// Every response from the ACME API carries a fresh nonce which is [`put`](Self::put) here and
/// later [`take`](Self::take)n by exactly one signing operation. The newest nonce is handed out
/// first, so a request retried after `badNonce` uses the one from the rejection.
#[derive(Default, Debug)]
pub(crate) struct NoncePool {
    nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub(crate) fn new(nonce_url: &str) -> Self {
        NoncePool {
            nonce_url: nonce_url.to_owned(),
            ..Default::default()
        }
    }

    /// Pops the most recent nonce. `None` means a fresh one must be fetched from the server.
    pub(crate) fn take(&self) -> Option<String> {
        let nonce = self.pool.lock().pop_back();

        if nonce.is_some() {
            log::trace!("Use previous nonce");
        }

        nonce
    }

    /// Caches a nonce received from the server.
    pub(crate) fn put(&self, nonce: String) {
        // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        if !is_valid_nonce(&nonce) {
            log::debug!("Ignoring malformed replay-nonce: {nonce:?}");
            return;
        }

        let mut pool = self.pool.lock();
        pool.push_back(nonce);

        if pool.len() > MAX_POOLED {
            pool.pop_front();
        }
    }

    /// Feeds the `Replay-Nonce` header of any response, successful or not, into the pool.
    pub(crate) fn extract_nonce(&self, res: &reqwest::Response) {
        if let Some(nonce) = req_header(res, REPLAY_NONCE) {
            log::trace!("Extracting new nonce");
            self.put(nonce);
        }
    }

    /// Returns a cached nonce or fetches a new one with an unsigned `GET` to `newNonce`.
    pub(crate) async fn get_nonce(&self, client: &reqwest::Client) -> crate::Result<String> {
        if let Some(nonce) = self.take() {
            return Ok(nonce);
        }

        log::debug!("Request new nonce");
        let res = req_handle_error(req_get(client, &self.nonce_url).await?).await?;

        req_expect_header(&res, "replay-nonce")
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pool.lock().len()
    }
}

fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
