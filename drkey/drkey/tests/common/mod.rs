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

//! Mock DRKey key service speaking Connect-RPC over HTTP.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use prost::Message;
use scion_drkey::transport::{
    crpc::PROTO_CONTENT_TYPE,
    proto::{DELEGATION_SECRET, DelegationSecretRequest, DelegationSecretResponse, SERVICE_PATH},
};
use tokio_util::sync::CancellationToken;

/// Key returned by the mock service.
pub const MOCK_KEY: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

/// How the mock answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// `[t - 3600, t + 3600)` with [MOCK_KEY].
    Serve,
    /// Connect `permission_denied` error.
    Reject,
    /// Connect `unavailable` error.
    Unavailable,
    /// A 15 byte key.
    ShortKey,
    /// A body that is not a protobuf message.
    Garbage,
}

/// State of the mock key service.
pub struct MockKeyService {
    received_requests: AtomicUsize,
    behavior: Mutex<Behavior>,
    delay: Mutex<Duration>,
    last_request: Mutex<Option<DelegationSecretRequest>>,
}

impl MockKeyService {
    pub fn received_requests(&self) -> usize {
        self.received_requests.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Delays every answer by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn last_request(&self) -> Option<DelegationSecretRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

/// A running mock key service. Stops serving when dropped.
pub struct MockKeyServiceHandle {
    pub addr: SocketAddr,
    pub service: Arc<MockKeyService>,
    cancel: CancellationToken,
}

impl MockKeyServiceHandle {
    /// Server address in `host:port` form.
    pub fn server_address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for MockKeyServiceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts a mock key service on a random local port.
pub async fn start_mock_key_service(behavior: Behavior) -> MockKeyServiceHandle {
    let service = Arc::new(MockKeyService {
        received_requests: AtomicUsize::new(0),
        behavior: Mutex::new(behavior),
        delay: Mutex::new(Duration::ZERO),
        last_request: Mutex::new(None),
    });

    let router = Router::new().nest(
        SERVICE_PATH,
        Router::new()
            .route(DELEGATION_SECRET, post(delegation_secret_handler))
            .with_state(service.clone()),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .unwrap();
    });

    MockKeyServiceHandle {
        addr,
        service,
        cancel,
    }
}

/// Returns an address on which nothing is listening.
pub async fn unused_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

async fn delegation_secret_handler(
    State(service): State<Arc<MockKeyService>>,
    body: Bytes,
) -> Response {
    service.received_requests.fetch_add(1, Ordering::SeqCst);
    let delay = *service.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let request = match DelegationSecretRequest::decode(body) {
        Ok(request) => request,
        Err(e) => {
            return connect_error(StatusCode::BAD_REQUEST, "invalid_argument", &e.to_string());
        }
    };
    *service.last_request.lock().unwrap() = Some(request.clone());

    let behavior = *service.behavior.lock().unwrap();
    match behavior {
        Behavior::Serve | Behavior::ShortKey => {
            let mut key = MOCK_KEY.to_vec();
            if behavior == Behavior::ShortKey {
                key.truncate(15);
            }
            let response = DelegationSecretResponse {
                not_before: request.val_time - 3600,
                not_after: request.val_time + 3600,
                key,
            };
            (
                [(CONTENT_TYPE, PROTO_CONTENT_TYPE)],
                response.encode_to_vec(),
            )
                .into_response()
        }
        Behavior::Reject => {
            connect_error(
                StatusCode::FORBIDDEN,
                "permission_denied",
                "AS pair not authorized",
            )
        }
        Behavior::Unavailable => {
            connect_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "key not yet available",
            )
        }
        Behavior::Garbage => {
            (
                [(CONTENT_TYPE, PROTO_CONTENT_TYPE)],
                vec![0xff, 0xff, 0xff, 0xff],
            )
                .into_response()
        }
    }
}

fn connect_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        serde_json::json!({ "code": code, "message": message }).to_string(),
    )
        .into_response()
}
