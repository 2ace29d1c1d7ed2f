use std::{fmt, panic, sync::Arc, time::Duration};

use tokio::{task::JoinSet, time::sleep};

use crate::{
    api,
    challenge::{dns01, ChallengeType, Provider},
    error::ValidationError,
    jws,
    order::{validate_challenge, Auth, Polling},
    Error, Result,
};

/// Solves the authorizations of an order with registered [`Provider`]s.
///
/// Providers are tried in registration order; the first one whose challenge type the CA offers for
/// a domain handles that domain. Domains are solved concurrently, except that all domains handled
/// by a [sequential](Provider::sequential) provider go through it one after another.
///
/// ```
/// use std::sync::Arc;
///
/// use acme::{challenge::{http01::MemoryProvider, ChallengeType}, Resolver};
///
/// let proofs = Arc::new(MemoryProvider::new());
/// let resolver = Resolver::new().with_provider(ChallengeType::Http01, proofs.clone());
/// ```
#[derive(Clone)]
pub struct Resolver {
    providers: Vec<(ChallengeType, Arc<dyn Provider>)>,
    polling: Polling,
}

/// Result of solving one authorization.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) domain: String,
    pub(crate) result: Result<()>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Resolver without providers, using a 60 second propagation timeout and polling every 2
    /// seconds.
    pub fn new() -> Self {
        Resolver {
            providers: Vec::new(),
            polling: Polling::new(
                dns01::DEFAULT_PROPAGATION_TIMEOUT,
                dns01::DEFAULT_POLLING_INTERVAL,
            ),
        }
    }

    /// Registers `provider` for challenges of `challenge_type`.
    pub fn with_provider(mut self, challenge_type: ChallengeType, provider: Arc<dyn Provider>) -> Self {
        self.providers.push((challenge_type, provider));
        self
    }

    /// Time to wait for an authorization to become valid, unless the provider says otherwise.
    pub fn propagation_timeout(mut self, timeout: Duration) -> Self {
        self.polling.timeout = timeout;
        self
    }

    /// Time between authorization polls, unless the provider says otherwise.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling.interval = interval;
        self
    }

    fn select(&self, auth: &Auth) -> Option<(api::Challenge, &Arc<dyn Provider>)> {
        self.providers.iter().find_map(|(challenge_type, provider)| {
            auth.api_auth
                .challenge(challenge_type.as_str())
                .map(|challenge| (challenge.clone(), provider))
        })
    }

    /// Solves every authorization, returning one outcome per authorization in the same order.
    ///
    /// All started work runs to completion, so every presented proof is cleaned up even when
    /// another domain already failed.
    pub(crate) async fn solve(&self, auths: Vec<Auth>) -> Vec<Outcome> {
        let mut outcomes = auths.iter().map(|_| None).collect::<Vec<Option<Outcome>>>();

        let mut concurrent = Vec::new();
        let mut sequential = Vec::<SequentialGroup>::new();

        for (index, auth) in auths.into_iter().enumerate() {
            let domain = auth.domain_name().to_owned();

            if !auth.need_challenge() {
                log::info!("[{domain}] acme: authorization already valid; skipping challenge");
                outcomes[index] = Some(Outcome {
                    domain,
                    result: Ok(()),
                });
                continue;
            }

            let Some((challenge, provider)) = self.select(&auth) else {
                let offered = auth.offered_types();
                outcomes[index] = Some(Outcome {
                    result: Err(Error::UnsupportedChallenge {
                        domain: domain.clone(),
                        offered,
                    }),
                    domain,
                });
                continue;
            };

            let polling = provider
                .timeout()
                .map(|(timeout, interval)| Polling::new(timeout, interval))
                .unwrap_or(self.polling);

            let task = Task {
                index,
                domain,
                auth,
                challenge,
                provider: Arc::clone(provider),
                polling,
            };

            match task.provider.sequential() {
                None => concurrent.push(task),
                Some(interval) => {
                    match sequential
                        .iter_mut()
                        .find(|group| same_provider(&group.provider, &task.provider))
                    {
                        Some(group) => group.tasks.push(task),
                        None => sequential.push(SequentialGroup {
                            provider: Arc::clone(&task.provider),
                            interval,
                            tasks: vec![task],
                        }),
                    }
                }
            }
        }

        let mut running = JoinSet::new();

        for task in concurrent {
            running.spawn(async move { vec![task.run().await] });
        }

        for group in sequential {
            running.spawn(group.run());
        }

        while let Some(done) = running.join_next().await {
            let done = done.unwrap_or_else(|err| panic::resume_unwind(err.into_panic()));

            for (index, outcome) in done {
                outcomes[index] = Some(outcome);
            }
        }

        outcomes.into_iter().flatten().collect()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field(
                "providers",
                &self.providers.iter().map(|(ty, _)| ty).collect::<Vec<_>>(),
            )
            .field("polling", &self.polling)
            .finish()
    }
}

fn same_provider(a: &Arc<dyn Provider>, b: &Arc<dyn Provider>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Domains routed to one sequential provider.
struct SequentialGroup {
    provider: Arc<dyn Provider>,
    interval: Duration,
    tasks: Vec<Task>,
}

impl SequentialGroup {
    async fn run(self) -> Vec<(usize, Outcome)> {
        let mut done = Vec::with_capacity(self.tasks.len());
        let mut wait = false;

        // only a domain that went through spaces out the next one
        for task in self.tasks {
            if wait {
                log::info!(
                    "sequence: wait for {:?} before the next challenge",
                    self.interval
                );
                sleep(self.interval).await;
            }

            let (index, outcome) = task.run().await;
            wait = outcome.result.is_ok();
            done.push((index, outcome));
        }

        done
    }
}

/// One authorization and the provider chosen for it.
struct Task {
    index: usize,
    domain: String,
    auth: Auth,
    challenge: api::Challenge,
    provider: Arc<dyn Provider>,
    polling: Polling,
}

impl Task {
    async fn run(self) -> (usize, Outcome) {
        let result = self.attempt().await;

        let outcome = Outcome {
            domain: self.domain,
            result,
        };

        (self.index, outcome)
    }

    async fn attempt(&self) -> Result<()> {
        let domain = self.domain.as_str();
        let token = self.challenge.token.as_str();
        let key_auth = jws::key_authorization(token, self.auth.inner.transport.acme_key())?;

        log::info!("[{domain}] acme: Trying to solve {}", self.challenge._type);

        let result = match self.provider.present(domain, token, &key_auth).await {
            Ok(()) => {
                validate_challenge(
                    &self.auth.inner,
                    &self.challenge.url,
                    &self.auth.auth_url,
                    domain,
                    self.polling,
                )
                .await
            }

            Err(err) => Err(Error::ValidationFailed {
                domain: domain.to_owned(),
                reason: ValidationError::Present(err.into()),
            }),
        };

        match &result {
            Ok(()) => log::info!("[{domain}] The server validated our request"),
            Err(err) => log::debug!("[{domain}] {err}"),
        }

        if let Err(err) = self.provider.clean_up(domain, token, &key_auth).await {
            let err = Error::CleanupFailed {
                domain: domain.to_owned(),
                source: err.into(),
            };
            log::warn!("{err}");
        }

        result
    }
}
