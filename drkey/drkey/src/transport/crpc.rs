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
//! Connect-RPC client for the DRKey key service.
//!
//! Requests are unary Connect-RPC calls with protobuf bodies sent over HTTP with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{StatusCode, header::CONTENT_TYPE};
use prost::Message;
use serde::Deserialize;
use url::Url;

use crate::transport::{
    FetchError, FetchRequest, FetchedSecret, SecretFetcher,
    proto::{DELEGATION_SECRET, DelegationSecretRequest, DelegationSecretResponse, SERVICE_PATH},
};

/// Content type of protobuf encoded Connect-RPC unary messages.
pub const PROTO_CONTENT_TYPE: &str = "application/proto";
const CONNECT_PROTOCOL_VERSION_HEADER: &str = "connect-protocol-version";

/// Default timeout of a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error body of a failed Connect-RPC call.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectErrorBody {
    /// Connect error code, e.g. `unavailable`.
    pub code: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
}

/// [SecretFetcher] talking Connect-RPC to a DRKey key service.
#[derive(Debug, Clone)]
pub struct CrpcSecretFetcher {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl Default for CrpcSecretFetcher {
    fn default() -> Self {
        Self::new_with_client(reqwest::Client::new())
    }
}

impl CrpcSecretFetcher {
    /// Creates a new fetcher with a default `reqwest::Client`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new fetcher with the provided `reqwest::Client`.
    pub fn new_with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the timeout of a single HTTP request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the endpoint URL for the given server address.
    ///
    /// `host:port` is interpreted as `http://host:port`, anything containing a scheme is used as
    /// is.
    pub fn endpoint(server_address: &str) -> Result<Url, FetchError> {
        let server_address = server_address.trim();
        if server_address.is_empty() {
            return Err(FetchError::InvalidRequest(
                "empty server address".to_string(),
            ));
        }
        let base = if server_address.contains("://") {
            server_address.to_string()
        } else {
            format!("http://{server_address}")
        };
        let url = format!(
            "{}{SERVICE_PATH}{DELEGATION_SECRET}",
            base.trim_end_matches('/')
        );
        Url::parse(&url).map_err(|e| {
            FetchError::InvalidRequest(format!("invalid server address {server_address:?}: {e}"))
        })
    }

    fn map_send_error(&self, server: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout {
                server: server.to_string(),
                timeout: self.request_timeout,
            };
        }
        if err.is_builder() {
            return FetchError::InvalidRequest(err.to_string());
        }
        FetchError::Unreachable {
            server: server.to_string(),
            reason: format!("{err:#}"),
        }
    }

    fn map_status_error(&self, server: &str, status: StatusCode, body: &[u8]) -> FetchError {
        // Try to parse the body as a Connect error, otherwise fall back to the HTTP status.
        match serde_json::from_slice::<ConnectErrorBody>(body) {
            Ok(crpc_err) => {
                match crpc_err.code.as_str() {
                    "unavailable" => {
                        FetchError::Unreachable {
                            server: server.to_string(),
                            reason: crpc_err.message,
                        }
                    }
                    "deadline_exceeded" => {
                        FetchError::Timeout {
                            server: server.to_string(),
                            timeout: self.request_timeout,
                        }
                    }
                    code => FetchError::ServiceRejected(format!("{code}: {}", crpc_err.message)),
                }
            }
            Err(_) => {
                match status {
                    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
                        FetchError::Unreachable {
                            server: server.to_string(),
                            reason: format!("HTTP {status}"),
                        }
                    }
                    StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                        FetchError::Timeout {
                            server: server.to_string(),
                            timeout: self.request_timeout,
                        }
                    }
                    _ => {
                        FetchError::ServiceRejected(format!(
                            "HTTP {status}: {}",
                            String::from_utf8_lossy(body)
                        ))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SecretFetcher for CrpcSecretFetcher {
    async fn fetch_secret(&self, request: &FetchRequest) -> Result<FetchedSecret, FetchError> {
        let url = Self::endpoint(&request.server_address)?;
        let server = request.server_address.as_str();
        let body = DelegationSecretRequest::from(request).encode_to_vec();

        tracing::debug!(
            %url,
            src = %request.src,
            dst = %request.dst,
            val_time = request.val_time,
            protocol = %request.protocol,
            body_len = body.len(),
            "Sending delegation secret request"
        );

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(CONTENT_TYPE, PROTO_CONTENT_TYPE)
            .header(CONNECT_PROTOCOL_VERSION_HEADER, "1")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(server, e))?;

        let status = response.status();
        let body: Bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(server, e))?;

        if !status.is_success() {
            return Err(self.map_status_error(server, status, &body));
        }
        tracing::debug!(body_len = body.len(), "Received delegation secret response");

        let response = DelegationSecretResponse::decode(body).map_err(|e| {
            FetchError::MalformedResponse(format!("error decoding response body: {e}"))
        })?;
        let secret = FetchedSecret::try_from(response)?;
        secret.validate(request.val_time)?;
        Ok(secret)
    }
}
