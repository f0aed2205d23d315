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
//! Errors returned by the DRKey client.

use crate::{derive::DeriveError, epoch::InvalidTimestampError, transport::FetchError};

/// DRKey client error.
///
/// The error is cloneable so that a single fetch result can be shared with all callers waiting
/// for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrkeyError {
    /// The request parameters are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The key service could not be reached, even after retrying.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The key service did not answer in time, even after retrying.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The key service refused the request.
    #[error("service rejected request: {0}")]
    ServiceRejected(String),
    /// The key service answered with an invalid secret.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The cache failed to produce a result, e.g. because the client was shut down.
    #[error("internal cache error: {0}")]
    InternalCacheError(String),
}

impl From<FetchError> for DrkeyError {
    fn from(value: FetchError) -> Self {
        match value {
            FetchError::Unreachable { server, reason } => {
                DrkeyError::Unreachable(format!("key service {server}: {reason}"))
            }
            FetchError::Timeout { server, timeout } => {
                DrkeyError::Timeout(format!(
                    "key service {server} did not answer within {timeout:?}"
                ))
            }
            FetchError::ServiceRejected(reason) => DrkeyError::ServiceRejected(reason),
            FetchError::MalformedResponse(reason) => DrkeyError::MalformedResponse(reason),
            FetchError::InvalidRequest(reason) => DrkeyError::InvalidInput(reason),
        }
    }
}

impl From<InvalidTimestampError> for DrkeyError {
    fn from(value: InvalidTimestampError) -> Self {
        DrkeyError::InvalidInput(value.to_string())
    }
}

impl From<DeriveError> for DrkeyError {
    fn from(value: DeriveError) -> Self {
        DrkeyError::InvalidInput(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn should_not_repeat_error_kind_in_message() {
        let err = DrkeyError::from(FetchError::Unreachable {
            server: "127.0.0.1:1".to_string(),
            reason: "connection refused".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "unreachable: key service 127.0.0.1:1: connection refused"
        );

        let err = DrkeyError::from(FetchError::Timeout {
            server: "127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
        });
        assert_eq!(
            err.to_string(),
            "timeout: key service 127.0.0.1:1 did not answer within 2s"
        );

        let err = DrkeyError::from(FetchError::ServiceRejected("AS pair not authorized".into()));
        assert_eq!(
            err.to_string(),
            "service rejected request: AS pair not authorized"
        );

        let err = DrkeyError::from(FetchError::InvalidRequest("empty address".into()));
        assert_eq!(err, DrkeyError::InvalidInput("empty address".into()));
    }
}
