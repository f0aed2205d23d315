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
//! Protobuf messages of the `scion.drkey.v1.DrkeyService` API.

use crate::{
    epoch::Epoch,
    key::SecretKey,
    transport::{FetchError, FetchRequest, FetchedSecret},
};

/// Service path of the DRKey service.
pub const SERVICE_PATH: &str = "/scion.drkey.v1.DrkeyService";
/// Delegation secret method.
pub const DELEGATION_SECRET: &str = "/DelegationSecret";

/// Request for an AS-to-AS delegation secret.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelegationSecretRequest {
    /// Unix seconds the secret must be valid at.
    #[prost(int64, tag = "1")]
    pub val_time: i64,
    /// Source ISD-AS.
    #[prost(uint64, tag = "2")]
    pub src_isd_as: u64,
    /// Destination ISD-AS.
    #[prost(uint64, tag = "3")]
    pub dst_isd_as: u64,
    /// DRKey protocol identifier.
    #[prost(string, tag = "4")]
    pub protocol: ::prost::alloc::string::String,
}

/// Delegation secret with its validity window.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelegationSecretResponse {
    /// Start of validity, unix seconds.
    #[prost(int64, tag = "1")]
    pub not_before: i64,
    /// End of validity (exclusive), unix seconds.
    #[prost(int64, tag = "2")]
    pub not_after: i64,
    /// Key material.
    #[prost(bytes = "vec", tag = "3")]
    pub key: ::prost::alloc::vec::Vec<u8>,
}

impl From<&FetchRequest> for DelegationSecretRequest {
    fn from(value: &FetchRequest) -> Self {
        Self {
            val_time: value.val_time,
            src_isd_as: value.src.value(),
            dst_isd_as: value.dst.value(),
            protocol: value.protocol.clone(),
        }
    }
}

impl TryFrom<DelegationSecretResponse> for FetchedSecret {
    type Error = FetchError;

    fn try_from(value: DelegationSecretResponse) -> Result<Self, Self::Error> {
        let epoch = Epoch::new(value.not_before, value.not_after)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        let key = SecretKey::try_from(value.key.as_slice())
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        Ok(FetchedSecret { epoch, key })
    }
}
