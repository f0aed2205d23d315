// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! DRKey client.
//!
//! The [DrkeyClient] is the entry point of the crate. It keeps one [SecretCache] per key service
//! address and composes epoch bucketing, caching, transport and derivation.
//!
//! # Example
//!
//! ```no_run
//! use scion_drkey::{address::IsdAsn, client::DrkeyClientBuilder};
//!
//! async fn fetch() {
//!     let client = DrkeyClientBuilder::new().build().unwrap();
//!
//!     let now = std::time::SystemTime::now()
//!         .duration_since(std::time::UNIX_EPOCH)
//!         .unwrap()
//!         .as_secs() as i64;
//!     let ds = client
//!         .delegation_secret(
//!             "127.0.0.1:30255",
//!             IsdAsn(0x0011_ffaa_0001_0d69),
//!             IsdAsn(0x0011_ffaa_0001_0e97),
//!             now,
//!         )
//!         .await
//!         .unwrap();
//!     println!("delegation secret valid in {}", ds.epoch);
//! }
//! ```

use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    time::{Duration, SystemTime},
};

use scc::HashIndex;
use tokio::{select, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    address::IsdAsn,
    cache::{HitPolicy, SecretCache},
    derive::{Lvl2Key, Lvl2Meta, derive_lvl2_from_ds},
    epoch::{DEFAULT_EPOCH_DURATION, Epoch, EpochCalculator},
    error::DrkeyError,
    key::DelegationSecret,
    transport::{
        SecretFetcher,
        crpc::CrpcSecretFetcher,
        retry::{RetryPolicy, RetryingFetcher},
    },
};

/// DRKey protocol used when none is configured.
pub const DEFAULT_PROTOCOL: &str = "piskes";

/// DRKey client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DrkeyClientConfig {
    /// DRKey protocol identifier sent to the key service.
    pub protocol: String,
    /// Epoch duration of the key service, used to group concurrent requests.
    pub epoch_duration: Duration,
    /// When cached secrets may be served.
    pub hit_policy: HitPolicy,
    /// Transport retry policy.
    pub retry: RetryPolicy,
    /// Interval of the background sweep removing expired secrets. `None` disables the sweep,
    /// expired secrets are then only removed on lookup.
    pub sweep_interval: Option<Duration>,
}

impl Default for DrkeyClientConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            epoch_duration: DEFAULT_EPOCH_DURATION,
            hit_policy: HitPolicy::default(),
            retry: RetryPolicy::default(),
            sweep_interval: None,
        }
    }
}

impl DrkeyClientConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.protocol.is_empty() {
            return Err("protocol must not be empty");
        }
        EpochCalculator::new(self.epoch_duration)?;
        self.retry.validate()?;
        if self.sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err("sweep_interval must be greater than zero");
        }
        Ok(())
    }
}

/// Error building a [DrkeyClient].
#[derive(Debug, thiserror::Error)]
pub enum BuildDrkeyClientError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Builder for creating a [DrkeyClient].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use scion_drkey::{cache::HitPolicy, client::DrkeyClientBuilder};
///
/// let client = DrkeyClientBuilder::new()
///     .with_protocol("piskes")
///     .with_hit_policy(HitPolicy::MinRemaining(Duration::from_secs(30)))
///     .with_sweep_interval(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct DrkeyClientBuilder {
    config: DrkeyClientConfig,
    http_client: Option<reqwest::Client>,
    request_timeout: Option<Duration>,
}

impl DrkeyClientBuilder {
    /// Creates a new builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: DrkeyClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the DRKey protocol identifier.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocol = protocol.into();
        self
    }

    /// Sets the epoch duration of the key service.
    pub fn with_epoch_duration(mut self, duration: Duration) -> Self {
        self.config.epoch_duration = duration;
        self
    }

    /// Sets the cache hit policy.
    pub fn with_hit_policy(mut self, policy: HitPolicy) -> Self {
        self.config.hit_policy = policy;
        self
    }

    /// Sets the transport retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Enables the background sweep of expired secrets.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = Some(interval);
        self
    }

    /// Uses the provided `reqwest::Client` for the Connect-RPC transport.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the timeout of a single HTTP request of the Connect-RPC transport.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds a client using the Connect-RPC transport.
    ///
    /// The background sweep, if enabled, is only started when called within a tokio runtime.
    pub fn build(self) -> Result<DrkeyClient, BuildDrkeyClientError> {
        let DrkeyClientBuilder {
            config,
            http_client,
            request_timeout,
        } = self;

        let mut fetcher = match http_client {
            Some(client) => CrpcSecretFetcher::new_with_client(client),
            None => CrpcSecretFetcher::new(),
        };
        if let Some(timeout) = request_timeout {
            fetcher = fetcher.with_request_timeout(timeout);
        }
        DrkeyClient::with_fetcher(config, fetcher)
    }

    /// Builds a client using a custom transport.
    pub fn build_with_fetcher<F: SecretFetcher>(
        self,
        fetcher: F,
    ) -> Result<DrkeyClient<F>, BuildDrkeyClientError> {
        DrkeyClient::with_fetcher(self.config, fetcher)
    }
}

/// The delegation secrets of the epoch containing a timestamp and its neighbours.
///
/// A server holding all three can accept keys of clients whose clock is slightly off at epoch
/// boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationSecretSet {
    /// Secret of the preceding epoch.
    pub previous: DelegationSecret,
    /// Secret of the epoch containing the requested timestamp.
    pub current: DelegationSecret,
    /// Secret of the following epoch.
    pub next: DelegationSecret,
}

/// Client fetching and caching DRKey delegation secrets.
///
/// The client is cheap to clone; clones share caches and configuration.
pub struct DrkeyClient<F: SecretFetcher = CrpcSecretFetcher>(Arc<DrkeyClientInner<F>>);

impl<F: SecretFetcher> Clone for DrkeyClient<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

type ServerCache<F> = SecretCache<Arc<RetryingFetcher<F>>>;

struct DrkeyClientInner<F: SecretFetcher> {
    config: DrkeyClientConfig,
    epochs: EpochCalculator,
    fetcher: Arc<RetryingFetcher<F>>,
    caches: HashIndex<String, ServerCache<F>>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<F: SecretFetcher> Drop for DrkeyClientInner<F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl DrkeyClient {
    /// Creates a client using the Connect-RPC transport.
    pub fn new(config: DrkeyClientConfig) -> Result<Self, BuildDrkeyClientError> {
        Self::with_fetcher(config, CrpcSecretFetcher::new())
    }
}

impl<F: SecretFetcher> DrkeyClient<F> {
    /// Creates a client using a custom transport.
    ///
    /// The transport is wrapped with the configured retry policy.
    pub fn with_fetcher(config: DrkeyClientConfig, fetcher: F) -> Result<Self, BuildDrkeyClientError> {
        config
            .validate()
            .map_err(BuildDrkeyClientError::InvalidConfig)?;
        let epochs = EpochCalculator::new(config.epoch_duration)
            .map_err(BuildDrkeyClientError::InvalidConfig)?;

        let client = Self(Arc::new(DrkeyClientInner {
            fetcher: Arc::new(RetryingFetcher::new(fetcher, config.retry.clone())),
            config,
            epochs,
            caches: HashIndex::new(),
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }));
        client.start_sweeper();
        Ok(client)
    }

    /// Returns the configuration of the client.
    pub fn config(&self) -> &DrkeyClientConfig {
        &self.0.config
    }

    /// Returns the delegation secret of `src -> dst` valid at `val_time` (unix seconds).
    ///
    /// The secret is served from the cache of `server_address` if possible, otherwise it is
    /// fetched from the key service.
    pub async fn delegation_secret(
        &self,
        server_address: &str,
        src: IsdAsn,
        dst: IsdAsn,
        val_time: i64,
    ) -> Result<DelegationSecret, DrkeyError> {
        check_pair(src, dst)?;
        let cache = self.cache(server_address)?;
        let secret = cache
            .get_or_fetch(src, dst, val_time, SystemTime::now())
            .await?;

        Ok(DelegationSecret {
            protocol: self.0.config.protocol.clone(),
            epoch: secret.epoch,
            src_isd_as: src,
            dst_isd_as: dst,
            key: secret.key,
        })
    }

    /// Derives the level 2 key described by `meta`, valid at `val_time`.
    ///
    /// Only the delegation secret is fetched; the key itself is derived locally.
    pub async fn lvl2_key(
        &self,
        server_address: &str,
        meta: &Lvl2Meta,
        val_time: i64,
    ) -> Result<Lvl2Key, DrkeyError> {
        if meta.protocol != self.0.config.protocol {
            return Err(DrkeyError::InvalidInput(format!(
                "protocol {:?} is not served by this client (configured: {:?})",
                meta.protocol, self.0.config.protocol
            )));
        }
        let ds = self
            .delegation_secret(server_address, meta.src_isd_as, meta.dst_isd_as, val_time)
            .await?;
        Ok(derive_lvl2_from_ds(meta, &ds)?)
    }

    /// Returns the delegation secrets of the epoch containing `val_time` and of the epochs
    /// directly before and after it.
    pub async fn delegation_secrets_around(
        &self,
        server_address: &str,
        src: IsdAsn,
        dst: IsdAsn,
        val_time: i64,
    ) -> Result<DelegationSecretSet, DrkeyError> {
        let current = self
            .delegation_secret(server_address, src, dst, val_time)
            .await?;
        let (previous_time, next_time) = neighbour_times(&current.epoch)?;
        let previous = self
            .delegation_secret(server_address, src, dst, previous_time)
            .await?;
        let next = self
            .delegation_secret(server_address, src, dst, next_time)
            .await?;

        tracing::debug!(
            %src,
            %dst,
            previous = %previous.epoch,
            current = %current.epoch,
            next = %next.epoch,
            "Fetched delegation secrets around epoch"
        );
        Ok(DelegationSecretSet {
            previous,
            current,
            next,
        })
    }

    /// Warms the cache with the secrets valid at `val_time` and in the following epoch.
    ///
    /// Returns the epochs of the fetched secrets.
    pub async fn prefetch(
        &self,
        server_address: &str,
        src: IsdAsn,
        dst: IsdAsn,
        val_time: i64,
    ) -> Result<(Epoch, Epoch), DrkeyError> {
        let current = self
            .delegation_secret(server_address, src, dst, val_time)
            .await?;
        let next = self
            .delegation_secret(server_address, src, dst, current.epoch.not_after())
            .await?;
        Ok((current.epoch, next.epoch))
    }

    /// Removes all secrets that have expired at `now` from all caches.
    ///
    /// Returns the number of removed secrets.
    pub fn evict_expired(&self, now: SystemTime) -> usize {
        self.0.evict_expired(now)
    }

    /// Returns the number of cached secrets over all key services.
    pub fn cached_secrets(&self) -> usize {
        let mut count = 0;
        self.0.caches.retain_sync(|_, cache| {
            count += cache.len();
            true
        });
        count
    }

    /// Shuts the client down.
    ///
    /// In-flight fetches are aborted and their waiters receive
    /// [DrkeyError::InternalCacheError], as do all later calls. Cached secrets are dropped.
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down DRKey client");
        self.0.cancel.cancel();
        self.0.caches.retain_sync(|_, cache| {
            cache.shutdown();
            false
        });
        if let Some(sweeper) = self
            .0
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
    }

    /// Returns true if [Self::shutdown] was called.
    pub fn is_shut_down(&self) -> bool {
        self.0.cancel.is_cancelled()
    }

    fn cache(&self, server_address: &str) -> Result<ServerCache<F>, DrkeyError> {
        let server_address = server_address.trim();
        if server_address.is_empty() {
            return Err(DrkeyError::InvalidInput(
                "server address must not be empty".to_string(),
            ));
        }
        if self.0.cancel.is_cancelled() {
            return Err(DrkeyError::InternalCacheError(
                "DRKey client was shut down".to_string(),
            ));
        }

        let cache = match self.0.caches.entry_sync(server_address.to_string()) {
            scc::hash_index::Entry::Occupied(occupied) => occupied.get().clone(),
            scc::hash_index::Entry::Vacant(vacant) => {
                tracing::debug!(server = %server_address, "Creating delegation secret cache");
                let cache = SecretCache::new(
                    server_address,
                    self.0.config.protocol.clone(),
                    self.0.epochs,
                    self.0.config.hit_policy,
                    self.0.fetcher.clone(),
                    self.0.cancel.child_token(),
                );
                vacant.insert_entry(cache).get().clone()
            }
        };
        Ok(cache)
    }

    fn start_sweeper(&self) {
        let Some(interval) = self.0.config.sweep_interval else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime, expired secrets are only evicted on lookup");
            return;
        };

        let weak = Arc::downgrade(&self.0);
        let cancel = self.0.cancel.clone();
        let task = handle.spawn(sweep(weak, cancel, interval));
        *self
            .0
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

impl<F: SecretFetcher> DrkeyClientInner<F> {
    fn evict_expired(&self, now: SystemTime) -> usize {
        let mut removed = 0;
        self.caches.retain_sync(|_, cache| {
            removed += cache.evict_expired(now);
            true
        });
        removed
    }
}

async fn sweep<F: SecretFetcher>(
    client: Weak<DrkeyClientInner<F>>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(client) = client.upgrade() else {
                    break;
                };
                let removed = client.evict_expired(SystemTime::now());
                if removed > 0 {
                    tracing::debug!(removed, "Evicted expired delegation secrets");
                }
            }
        }
    }
}

fn check_pair(src: IsdAsn, dst: IsdAsn) -> Result<(), DrkeyError> {
    if src.is_wildcard() {
        return Err(DrkeyError::InvalidInput(format!(
            "source ISD-AS {src} is a wildcard"
        )));
    }
    if dst.is_wildcard() {
        return Err(DrkeyError::InvalidInput(format!(
            "destination ISD-AS {dst} is a wildcard"
        )));
    }
    Ok(())
}

/// Timestamps within the epochs directly before and after `epoch`.
fn neighbour_times(epoch: &Epoch) -> Result<(i64, i64), DrkeyError> {
    let previous = epoch.not_before().checked_sub(1).ok_or_else(|| {
        DrkeyError::InvalidInput(format!("no epoch before {epoch}"))
    })?;
    Ok((previous, epoch.not_after()))
}

#[cfg(test)]
mod tests {
    use std::{
        net::Ipv4Addr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        address::HostAddr,
        derive::{DerivationContext, KeyType, derive},
        key::SecretKey,
        transport::{FetchError, FetchRequest, FetchedSecret},
    };

    const SRC: IsdAsn = IsdAsn(0x0011_ffaa_0001_0d69);
    const DST: IsdAsn = IsdAsn(0x0011_ffaa_0001_0e97);
    const HOUR: i64 = 3600;

    /// Answers with one hour epochs; the key encodes the epoch index.
    #[derive(Default)]
    struct MockFetcher {
        received_requests: AtomicUsize,
    }

    #[async_trait]
    impl SecretFetcher for MockFetcher {
        async fn fetch_secret(&self, request: &FetchRequest) -> Result<FetchedSecret, FetchError> {
            self.received_requests.fetch_add(1, Ordering::SeqCst);
            if request.protocol != DEFAULT_PROTOCOL {
                return Err(FetchError::ServiceRejected("unknown protocol".into()));
            }
            let not_before = request.val_time.div_euclid(HOUR) * HOUR;
            Ok(FetchedSecret {
                epoch: Epoch::new(not_before, not_before + HOUR).unwrap(),
                key: SecretKey::from([(not_before / HOUR) as u8; 16]),
            })
        }
    }

    fn client() -> (DrkeyClient<Arc<MockFetcher>>, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher::default());
        let client = DrkeyClientBuilder::new()
            .with_epoch_duration(Duration::from_secs(HOUR as u64))
            .build_with_fetcher(fetcher.clone())
            .unwrap();
        (client, fetcher)
    }

    fn now() -> i64 {
        crate::epoch::unix_seconds(SystemTime::now())
    }

    #[test]
    fn should_validate_config() {
        assert!(DrkeyClientConfig::default().validate().is_ok());

        let config = DrkeyClientConfig {
            protocol: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DrkeyClientConfig {
            epoch_duration: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DrkeyClientConfig {
            sweep_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(matches!(
            DrkeyClient::new(config),
            Err(BuildDrkeyClientError::InvalidConfig(_))
        ));

        let (client, _) = client();
        assert_eq!(client.config().protocol, DEFAULT_PROTOCOL);
        assert_eq!(client.config().epoch_duration, Duration::from_secs(HOUR as u64));
        assert_eq!(client.config().sweep_interval, None);
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_return_delegation_secret() {
        let (client, fetcher) = client();
        let t = now();

        let ds = client
            .delegation_secret("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        assert_eq!(ds.protocol, "piskes");
        assert_eq!(ds.src_isd_as, SRC);
        assert_eq!(ds.dst_isd_as, DST);
        assert!(ds.epoch.contains(t));

        let again = client
            .delegation_secret("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        assert_eq!(ds, again);
        assert_eq!(fetcher.received_requests.load(Ordering::SeqCst), 1);
        assert_eq!(client.cached_secrets(), 1);
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_keep_one_cache_per_server() {
        let (client, fetcher) = client();
        let t = now();

        client
            .delegation_secret("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        client
            .delegation_secret("127.0.0.2:30255", SRC, DST, t)
            .await
            .unwrap();
        assert_eq!(fetcher.received_requests.load(Ordering::SeqCst), 2);
        assert_eq!(client.cached_secrets(), 2);
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_reject_invalid_input() {
        let (client, fetcher) = client();
        let t = now();

        for (server, src, dst) in [
            ("", SRC, DST),
            ("  ", SRC, DST),
            ("127.0.0.1:30255", IsdAsn(0), DST),
            ("127.0.0.1:30255", SRC, IsdAsn(0x0011_0000_0000_0000)),
        ] {
            let err = client
                .delegation_secret(server, src, dst, t)
                .await
                .unwrap_err();
            assert!(matches!(err, DrkeyError::InvalidInput(_)), "{err}");
        }
        assert_eq!(fetcher.received_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_fetch_neighbouring_epochs() {
        let (client, fetcher) = client();
        let t = 10 * HOUR + 42;

        let set = client
            .delegation_secrets_around("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        assert_eq!(set.previous.epoch, Epoch::new(9 * HOUR, 10 * HOUR).unwrap());
        assert_eq!(set.current.epoch, Epoch::new(10 * HOUR, 11 * HOUR).unwrap());
        assert_eq!(set.next.epoch, Epoch::new(11 * HOUR, 12 * HOUR).unwrap());
        assert_ne!(set.previous.key, set.current.key);
        assert_ne!(set.current.key, set.next.key);
        assert_eq!(fetcher.received_requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_prefetch_next_epoch() {
        let (client, fetcher) = client();
        let t = now();

        let (current, next) = client
            .prefetch("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        assert_eq!(current.not_after(), next.not_before());

        client
            .delegation_secret("127.0.0.1:30255", SRC, DST, next.not_before())
            .await
            .unwrap();
        assert_eq!(fetcher.received_requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_derive_lvl2_key_from_fetched_secret() {
        let (client, _) = client();
        let t = now();
        let meta = Lvl2Meta {
            protocol: "piskes".to_string(),
            src_isd_as: SRC,
            dst_isd_as: DST,
            context: DerivationContext {
                key_type: KeyType::HostToHost,
                src_host: Some(HostAddr::Ipv4(Ipv4Addr::new(127, 0, 0, 1))),
                dst_host: Some(HostAddr::Ipv4(Ipv4Addr::new(127, 0, 0, 2))),
            },
        };

        let lvl2 = client.lvl2_key("127.0.0.1:30255", &meta, t).await.unwrap();
        let ds = client
            .delegation_secret("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        assert_eq!(lvl2.epoch, ds.epoch);
        assert_eq!(lvl2.key, derive(&ds.key, &meta.context).unwrap());

        let other = Lvl2Meta {
            protocol: "scmp".to_string(),
            ..meta
        };
        assert!(matches!(
            client.lvl2_key("127.0.0.1:30255", &other, t).await,
            Err(DrkeyError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_evict_expired_secrets_from_all_caches() {
        let (client, _) = client();
        let t = now();

        client
            .delegation_secret("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        client
            .delegation_secret("127.0.0.2:30255", SRC, DST, t)
            .await
            .unwrap();

        assert_eq!(client.evict_expired(SystemTime::now()), 0);
        let later = SystemTime::now() + Duration::from_secs(2 * HOUR as u64);
        assert_eq!(client.evict_expired(later), 2);
        assert_eq!(client.cached_secrets(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn should_run_sweeper_until_shutdown() {
        let fetcher = Arc::new(MockFetcher::default());
        let client = DrkeyClientBuilder::new()
            .with_epoch_duration(Duration::from_secs(HOUR as u64))
            .with_sweep_interval(Duration::from_secs(60))
            .build_with_fetcher(fetcher)
            .unwrap();

        client
            .delegation_secret("127.0.0.1:30255", SRC, DST, now())
            .await
            .unwrap();

        // Secrets valid on the wall clock survive the sweeps.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(client.cached_secrets(), 1);
        assert!(client.0.sweeper.lock().unwrap().is_some());

        client.shutdown();
        assert!(client.is_shut_down());
        assert!(client.0.sweeper.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    #[test_log::test]
    async fn should_stop_sweeper_when_client_is_dropped() {
        let client = DrkeyClientBuilder::new()
            .with_sweep_interval(Duration::from_secs(60))
            .build_with_fetcher(MockFetcher::default())
            .unwrap();
        let sweeper = client.0.sweeper.lock().unwrap().take().unwrap();

        drop(client);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    #[test_log::test]
    async fn should_fail_after_shutdown() {
        let (client, fetcher) = client();
        let t = now();

        client
            .delegation_secret("127.0.0.1:30255", SRC, DST, t)
            .await
            .unwrap();
        client.shutdown();

        assert_eq!(client.cached_secrets(), 0);
        assert!(matches!(
            client
                .delegation_secret("127.0.0.1:30255", SRC, DST, t)
                .await,
            Err(DrkeyError::InternalCacheError(_))
        ));
        assert_eq!(fetcher.received_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_reject_epoch_without_predecessor() {
        let epoch = Epoch::new(i64::MIN, 0).unwrap();
        assert!(neighbour_times(&epoch).is_err());
        assert_eq!(
            neighbour_times(&Epoch::new(10, 20).unwrap()).unwrap(),
            (9, 20)
        );
    }
}
