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
//! Transport to the DRKey key service.
//!
//! A [SecretFetcher] performs exactly one round trip for a [FetchRequest]. The default
//! implementation is the Connect-RPC client [crpc::CrpcSecretFetcher]; [retry::RetryingFetcher]
//! adds per-attempt timeouts and bounded retries on top of any fetcher.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    address::IsdAsn,
    epoch::Epoch,
    key::SecretKey,
};

pub mod crpc;
pub mod proto;
pub mod retry;

/// Request for the delegation secret of an AS pair valid at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Address of the key service, `host:port` or a URL.
    pub server_address: String,
    /// Source (fast side) ISD-AS.
    pub src: IsdAsn,
    /// Destination (slow side) ISD-AS.
    pub dst: IsdAsn,
    /// Unix seconds the secret must be valid at.
    pub val_time: i64,
    /// DRKey protocol identifier.
    pub protocol: String,
}

/// A delegation secret as returned by the key service.
///
/// The epoch is authoritative; it is the service's view of the validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSecret {
    /// Validity window confirmed by the service.
    pub epoch: Epoch,
    /// Key material.
    pub key: SecretKey,
}

impl FetchedSecret {
    /// Checks that the secret is valid at `val_time`.
    pub fn validate(&self, val_time: i64) -> Result<(), FetchError> {
        if !self.epoch.contains(val_time) {
            return Err(FetchError::MalformedResponse(format!(
                "validity window {} does not cover requested time {val_time}",
                self.epoch
            )));
        }
        Ok(())
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The key service could not be reached.
    #[error("key service {server} unreachable: {reason}")]
    Unreachable {
        /// Server address.
        server: String,
        /// Underlying failure.
        reason: String,
    },
    /// The key service did not answer in time.
    #[error("key service {server} timed out after {timeout:?}")]
    Timeout {
        /// Server address.
        server: String,
        /// Elapsed timeout.
        timeout: Duration,
    },
    /// The key service refused the request.
    #[error("key service rejected request: {0}")]
    ServiceRejected(String),
    /// The key service answered with something that is not a valid secret.
    #[error("malformed key service response: {0}")]
    MalformedResponse(String),
    /// The request cannot be sent, e.g. because the server address is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Returns true if retrying the request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Unreachable { .. } | FetchError::Timeout { .. })
    }
}

/// Fetches delegation secrets from a key service.
#[async_trait]
pub trait SecretFetcher: Send + Sync + 'static {
    /// Performs one request for the secret described by `request`.
    async fn fetch_secret(&self, request: &FetchRequest) -> Result<FetchedSecret, FetchError>;
}

#[async_trait]
impl<T: SecretFetcher + ?Sized> SecretFetcher for Arc<T> {
    async fn fetch_secret(&self, request: &FetchRequest) -> Result<FetchedSecret, FetchError> {
        (**self).fetch_secret(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_only_retry_network_errors() {
        assert!(
            FetchError::Unreachable {
                server: "a".into(),
                reason: "refused".into()
            }
            .is_transient()
        );
        assert!(
            FetchError::Timeout {
                server: "a".into(),
                timeout: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(!FetchError::ServiceRejected("no".into()).is_transient());
        assert!(!FetchError::MalformedResponse("short key".into()).is_transient());
        assert!(!FetchError::InvalidRequest("bad url".into()).is_transient());
    }

    #[test]
    fn should_reject_window_not_covering_request() {
        let secret = FetchedSecret {
            epoch: Epoch::new(100, 200).unwrap(),
            key: SecretKey::from([0; 16]),
        };
        assert!(secret.validate(100).is_ok());
        assert!(secret.validate(199).is_ok());
        assert!(matches!(
            secret.validate(200),
            Err(FetchError::MalformedResponse(_))
        ));
        assert!(matches!(
            secret.validate(99),
            Err(FetchError::MalformedResponse(_))
        ));
    }
}
