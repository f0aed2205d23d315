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
//! Delegation secret cache of a single key service.
//!
//! Entries are keyed by the ISD-AS pair and the validity window confirmed by the key service.
//! Lookups for a timestamp hit any unexpired entry whose window covers it.
//!
//! ## Fetch coordination
//!
//! At most one fetch is in flight per (src, dst, local epoch estimate). The first caller
//! registers a watch channel in the in-flight map and spawns the fetch into its own task; later
//! callers subscribe to the same channel. The fetch task stores the result and removes the
//! marker under one write lock before publishing the result on the channel.
//!
//! A caller dropping its future never cancels the fetch. Only [SecretCache::shutdown] does,
//! in which case all waiters receive [DrkeyError::InternalCacheError].

// Internal:
//
// The local epoch estimate only groups concurrent callers. The key service is free to answer
// with a different window, e.g. around epoch boundaries. A waiter whose timestamp is not covered
// by the shared result falls back to a fetch keyed by its exact timestamp. The service validates
// every window against the requested timestamp, so that fetch always covers it.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, SystemTime},
};

use tokio::{select, sync::watch};
use tokio_util::sync::CancellationToken;

use crate::{
    address::IsdAsn,
    epoch::{Epoch, EpochCalculator, unix_seconds},
    error::DrkeyError,
    key::SecretKey,
    transport::{FetchRequest, FetchedSecret, SecretFetcher},
};

type SharedResult = Option<Result<FetchedSecret, DrkeyError>>;

/// Decides whether a cached entry may be served.
///
/// An entry is only ever served if its window covers the requested timestamp and has not
/// ended at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitPolicy {
    /// Serve any entry valid at the requested timestamp that has not expired yet.
    #[default]
    RequestTime,
    /// Like [HitPolicy::RequestTime], but entries with less than the given validity left at
    /// lookup time are refetched instead of served.
    MinRemaining(Duration),
}

impl HitPolicy {
    /// Returns true if an entry with `epoch` may serve a request for `t` at `now`.
    pub fn accepts(&self, epoch: &Epoch, t: i64, now: i64) -> bool {
        if !epoch.contains(t) || epoch.is_expired(now) {
            return false;
        }
        match self {
            HitPolicy::RequestTime => true,
            HitPolicy::MinRemaining(margin) => epoch.remaining(now) >= *margin,
        }
    }
}

/// Identifies a delegation secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Source ISD-AS.
    pub src: IsdAsn,
    /// Destination ISD-AS.
    pub dst: IsdAsn,
    /// Validity window.
    pub epoch: Epoch,
}

/// A cached delegation secret.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key of the entry, with the service-confirmed window.
    pub key: CacheKey,
    /// Key material.
    pub secret: SecretKey,
    /// Time the secret was received.
    pub fetched_at: SystemTime,
}

impl CacheEntry {
    fn to_fetched(&self) -> FetchedSecret {
        FetchedSecret {
            epoch: self.key.epoch,
            key: self.secret.clone(),
        }
    }
}

/// Identifies an in-flight fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FetchKey {
    /// Shared by all callers whose timestamp falls into the same local epoch estimate.
    Estimate(CacheKey),
    /// Shared by callers of exactly one timestamp.
    Exact { src: IsdAsn, dst: IsdAsn, t: i64 },
}

impl FetchKey {
    fn pair(&self) -> (IsdAsn, IsdAsn) {
        match self {
            FetchKey::Estimate(key) => (key.src, key.dst),
            FetchKey::Exact { src, dst, .. } => (*src, *dst),
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(IsdAsn, IsdAsn), Vec<CacheEntry>>,
    in_flight: HashMap<FetchKey, watch::Receiver<SharedResult>>,
}

impl CacheState {
    fn lookup(
        &self,
        policy: &HitPolicy,
        src: IsdAsn,
        dst: IsdAsn,
        t: i64,
        now: i64,
    ) -> Option<FetchedSecret> {
        self.entries
            .get(&(src, dst))?
            .iter()
            .find(|entry| policy.accepts(&entry.key.epoch, t, now))
            .map(CacheEntry::to_fetched)
    }

    /// Removes expired entries of a pair. Returns the number of removed entries.
    fn evict_pair(&mut self, src: IsdAsn, dst: IsdAsn, now: i64) -> usize {
        let Some(entries) = self.entries.get_mut(&(src, dst)) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|entry| !entry.key.epoch.is_expired(now));
        let removed = before - entries.len();
        if entries.is_empty() {
            self.entries.remove(&(src, dst));
        }
        removed
    }

    fn insert(&mut self, entry: CacheEntry) {
        let entries = self
            .entries
            .entry((entry.key.src, entry.key.dst))
            .or_default();
        match entries.iter_mut().find(|e| e.key.epoch == entry.key.epoch) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
}

/// Cache of the delegation secrets served by one key service.
pub struct SecretCache<F: SecretFetcher>(Arc<SecretCacheInner<F>>);

impl<F: SecretFetcher> Clone for SecretCache<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

struct SecretCacheInner<F: SecretFetcher> {
    server_address: String,
    protocol: String,
    epochs: EpochCalculator,
    hit_policy: HitPolicy,
    fetcher: F,
    cancel: CancellationToken,
    state: RwLock<CacheState>,
}

impl<F: SecretFetcher> SecretCache<F> {
    /// Creates an empty cache for the key service at `server_address`.
    ///
    /// Cancelling `cancel` aborts in-flight fetches and makes the cache unusable.
    pub fn new(
        server_address: impl Into<String>,
        protocol: impl Into<String>,
        epochs: EpochCalculator,
        hit_policy: HitPolicy,
        fetcher: F,
        cancel: CancellationToken,
    ) -> Self {
        Self(Arc::new(SecretCacheInner {
            server_address: server_address.into(),
            protocol: protocol.into(),
            epochs,
            hit_policy,
            fetcher,
            cancel,
            state: RwLock::new(CacheState::default()),
        }))
    }

    /// Returns the address of the key service.
    pub fn server_address(&self) -> &str {
        &self.0.server_address
    }

    /// Returns the secret of `src -> dst` valid at `t`, fetching it if it is not cached.
    ///
    /// `now` is the time used to decide whether cached entries have expired.
    pub async fn get_or_fetch(
        &self,
        src: IsdAsn,
        dst: IsdAsn,
        t: i64,
        now: SystemTime,
    ) -> Result<FetchedSecret, DrkeyError> {
        let now_secs = unix_seconds(now);
        let estimate = self.0.epochs.epoch(t)?;
        let mut key = FetchKey::Estimate(CacheKey {
            src,
            dst,
            epoch: estimate,
        });

        loop {
            if self.0.cancel.is_cancelled() {
                return Err(shut_down());
            }

            if let Some(hit) = self.0.read().lookup(&self.0.hit_policy, src, dst, t, now_secs) {
                tracing::trace!(%src, %dst, t, epoch = %hit.epoch, "Delegation secret cache hit");
                return Ok(hit);
            }

            let mut rx = {
                let mut state = self.0.write();
                if let Some(hit) = state.lookup(&self.0.hit_policy, src, dst, t, now_secs) {
                    return Ok(hit);
                }
                state.evict_pair(src, dst, now_secs);

                match state.in_flight.get(&key) {
                    Some(rx) => {
                        tracing::trace!(%src, %dst, t, "Joining in-flight fetch");
                        rx.clone()
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight.insert(key, rx.clone());
                        let inner = self.0.clone();
                        tokio::spawn(async move {
                            inner.fetch(key, t, now, tx).await;
                        });
                        rx
                    }
                }
            };

            let result = match rx.wait_for(Option::is_some).await {
                Ok(result) => result.clone(),
                Err(_) => None,
            };
            match result {
                Some(Ok(secret)) if secret.epoch.contains(t) => return Ok(secret),
                Some(Ok(secret)) => {
                    if matches!(key, FetchKey::Exact { .. }) {
                        // Fetched secrets are validated against the requested timestamp.
                        return Err(DrkeyError::MalformedResponse(format!(
                            "validity window {} does not cover {t}",
                            secret.epoch
                        )));
                    }
                    tracing::debug!(
                        %src, %dst, t, epoch = %secret.epoch,
                        "Shared fetch returned a window not covering the request, fetching again"
                    );
                    key = FetchKey::Exact { src, dst, t };
                }
                Some(Err(e)) => return Err(e),
                None => {
                    // The fetch task ended without publishing a result.
                    let mut state = self.0.write();
                    if state
                        .in_flight
                        .get(&key)
                        .is_some_and(|current| current.same_channel(&rx))
                    {
                        state.in_flight.remove(&key);
                    }
                    return Err(DrkeyError::InternalCacheError(
                        "delegation secret fetch was aborted".to_string(),
                    ));
                }
            }
        }
    }

    /// Removes all entries that have expired at `now`. Returns the number of removed entries.
    pub fn evict_expired(&self, now: SystemTime) -> usize {
        let now = unix_seconds(now);
        let mut state = self.0.write();
        let pairs: Vec<(IsdAsn, IsdAsn)> = state.entries.keys().copied().collect();
        pairs
            .into_iter()
            .map(|(src, dst)| state.evict_pair(src, dst, now))
            .sum()
    }

    /// Returns the number of cached secrets.
    pub fn len(&self) -> usize {
        self.0.read().entries.values().map(Vec::len).sum()
    }

    /// Returns true if no secret is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.0.read().in_flight.len()
    }

    /// Removes all cached secrets. In-flight fetches are not affected.
    pub fn clear(&self) {
        self.0.write().entries.clear();
    }

    /// Aborts in-flight fetches and removes all cached secrets.
    pub fn shutdown(&self) {
        self.0.cancel.cancel();
        let mut state = self.0.write();
        state.entries.clear();
    }
}

impl<F: SecretFetcher> SecretCacheInner<F> {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[tracing::instrument(
        name = "fetch_delegation_secret",
        skip_all,
        fields(server = %self.server_address, src = %key.pair().0, dst = %key.pair().1, val_time = val_time)
    )]
    async fn fetch(
        self: Arc<Self>,
        key: FetchKey,
        val_time: i64,
        now: SystemTime,
        tx: watch::Sender<SharedResult>,
    ) {
        let (src, dst) = key.pair();
        let request = FetchRequest {
            server_address: self.server_address.clone(),
            src,
            dst,
            val_time,
            protocol: self.protocol.clone(),
        };

        tracing::debug!(?key, "Fetching delegation secret");
        let result = select! {
            biased;
            _ = self.cancel.cancelled() => Err(shut_down()),
            result = self.fetcher.fetch_secret(&request) => {
                result
                    .and_then(|secret| secret.validate(val_time).map(|_| secret))
                    .map_err(DrkeyError::from)
            }
        };

        {
            let mut state = self.write();
            match &result {
                Ok(secret) if !secret.epoch.is_expired(unix_seconds(now)) => {
                    tracing::debug!(epoch = %secret.epoch, "Fetched delegation secret");
                    if !self.cancel.is_cancelled() {
                        state.insert(CacheEntry {
                            key: CacheKey {
                                src,
                                dst,
                                epoch: secret.epoch,
                            },
                            secret: secret.key.clone(),
                            fetched_at: SystemTime::now(),
                        });
                    }
                }
                Ok(secret) => {
                    tracing::debug!(epoch = %secret.epoch, "Fetched delegation secret is already expired, not caching");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Fetching delegation secret failed");
                }
            }
            if state
                .in_flight
                .get(&key)
                .is_some_and(|current| current.same_channel(&tx.subscribe()))
            {
                state.in_flight.remove(&key);
            }
        }

        tx.send_replace(Some(result));
    }
}

fn shut_down() -> DrkeyError {
    DrkeyError::InternalCacheError("DRKey client was shut down".to_string())
}
