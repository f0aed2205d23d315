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
//! DRKey key material.

use crate::{address::IsdAsn, epoch::Epoch};

/// Length of every DRKey in bytes.
pub const KEY_LEN: usize = 16;

/// DRKey secret key material.
///
/// The key is zeroized on drop and never printed.
#[derive(zeroize::ZeroizeOnDrop, Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Copies the raw key bytes out of the key.
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }
}

impl From<[u8; KEY_LEN]> for SecretKey {
    fn from(value: [u8; KEY_LEN]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = InvalidKeyLengthError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let key: [u8; KEY_LEN] = value
            .try_into()
            .map_err(|_| InvalidKeyLengthError(value.len()))?;
        Ok(Self(key))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretKey").field(&"...").finish()
    }
}

/// Error returned when key material has the wrong length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
pub struct InvalidKeyLengthError(pub usize);

/// The delegation secret of an AS pair for one protocol and epoch.
///
/// The delegation secret is the AS-to-AS level 2 key. Services holding it can derive all host
/// keys of the pair locally, see [crate::derive::derive_lvl2_from_ds].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationSecret {
    /// DRKey protocol identifier.
    pub protocol: String,
    /// Validity window.
    pub epoch: Epoch,
    /// Source (fast side) ISD-AS.
    pub src_isd_as: IsdAsn,
    /// Destination (slow side) ISD-AS.
    pub dst_isd_as: IsdAsn,
    /// Key material.
    pub key: SecretKey,
}
