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

//! # DRKey derivation
//!
//! Derivation of level 2 keys from a delegation secret (DS), without any network access.
//!
//! The DS of an AS pair is the AS-to-AS key for one protocol and epoch. Lower level keys are
//! computed with AES-128-CMAC keyed by the DS over a serialization of the end hosts:
//!
//! ```text
//! K_{A->B:H}     = CMAC(DS, type(H) || len(H) || H)
//! K_{A:HA->B:HB} = CMAC(DS, type(HA) || len(HA) || type(HB) || len(HB) || HA || HB)
//! ```
//!
//! where `type` is the host address type (IPv4 = 1, IPv6 = 2, SVC = 3) and `len` the length of
//! the packed address in bytes. The key service derives the same keys independently, so the
//! encoding must never change.
//!
//! ## Example
//!
//! ```
//! use std::net::Ipv4Addr;
//!
//! use scion_drkey::{
//!     address::HostAddr,
//!     derive::{DerivationContext, KeyType, derive},
//!     key::SecretKey,
//! };
//!
//! let ds = SecretKey::from([7u8; 16]);
//! let ctx = DerivationContext {
//!     key_type: KeyType::HostToHost,
//!     src_host: Some(HostAddr::Ipv4(Ipv4Addr::new(10, 0, 0, 1))),
//!     dst_host: Some(HostAddr::Ipv4(Ipv4Addr::new(10, 0, 0, 2))),
//! };
//!
//! let key = derive(&ds, &ctx).unwrap();
//! assert_eq!(key, derive(&ds, &ctx).unwrap());
//! ```

use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::{
    address::{HostAddr, IsdAsn},
    epoch::Epoch,
    key::{DelegationSecret, KEY_LEN, SecretKey},
};

/// Level 2 key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyType {
    /// Key shared by the two ASes (the delegation secret itself).
    AsToAs = 0,
    /// Key between the source AS and a host in the destination AS.
    AsToHost = 1,
    /// Key between a host in the source AS and a host in the destination AS.
    HostToHost = 2,
}

/// Host context of a derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationContext {
    /// Requested key type.
    pub key_type: KeyType,
    /// Host in the source AS, required for [KeyType::HostToHost].
    pub src_host: Option<HostAddr>,
    /// Host in the destination AS, required for [KeyType::AsToHost] and [KeyType::HostToHost].
    pub dst_host: Option<HostAddr>,
}

/// Metadata identifying a level 2 key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lvl2Meta {
    /// DRKey protocol identifier.
    pub protocol: String,
    /// Source ISD-AS.
    pub src_isd_as: IsdAsn,
    /// Destination ISD-AS.
    pub dst_isd_as: IsdAsn,
    /// Key type and hosts.
    pub context: DerivationContext,
}

/// A derived level 2 key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lvl2Key {
    /// Metadata the key was derived for.
    pub meta: Lvl2Meta,
    /// Validity window, inherited from the delegation secret.
    pub epoch: Epoch,
    /// Key material.
    pub key: SecretKey,
}

/// Derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeriveError {
    /// A host required by the key type is missing.
    #[error("{key_type:?} key requires a {side} host")]
    MissingHost {
        /// Requested key type.
        key_type: KeyType,
        /// Which host is missing.
        side: &'static str,
    },
    /// The metadata does not describe the given delegation secret.
    #[error("metadata does not match delegation secret: {0}")]
    MetaMismatch(String),
}

/// Derives the key described by `context` from the delegation secret `secret`.
pub fn derive(secret: &SecretKey, context: &DerivationContext) -> Result<SecretKey, DeriveError> {
    let missing = |side| {
        DeriveError::MissingHost {
            key_type: context.key_type,
            side,
        }
    };

    match context.key_type {
        KeyType::AsToAs => Ok(secret.clone()),
        KeyType::AsToHost => {
            let dst = context.dst_host.ok_or_else(|| missing("destination"))?;
            let dst_packed = dst.pack();

            let mut input = Vec::with_capacity(2 + dst_packed.len());
            input.push(dst.addr_type() as u8);
            input.push(dst_packed.len() as u8);
            input.extend_from_slice(&dst_packed);

            Ok(cmac(secret, &input))
        }
        KeyType::HostToHost => {
            let src = context.src_host.ok_or_else(|| missing("source"))?;
            let dst = context.dst_host.ok_or_else(|| missing("destination"))?;
            let src_packed = src.pack();
            let dst_packed = dst.pack();

            let mut input = Vec::with_capacity(4 + src_packed.len() + dst_packed.len());
            input.push(src.addr_type() as u8);
            input.push(src_packed.len() as u8);
            input.push(dst.addr_type() as u8);
            input.push(dst_packed.len() as u8);
            input.extend_from_slice(&src_packed);
            input.extend_from_slice(&dst_packed);

            Ok(cmac(secret, &input))
        }
    }
}

/// Derives a level 2 key from a delegation secret.
///
/// The protocol and ISD-AS pair of `meta` must match the delegation secret.
pub fn derive_lvl2_from_ds(meta: &Lvl2Meta, ds: &DelegationSecret) -> Result<Lvl2Key, DeriveError> {
    if meta.protocol != ds.protocol {
        return Err(DeriveError::MetaMismatch(format!(
            "protocol {:?} != {:?}",
            meta.protocol, ds.protocol
        )));
    }
    if meta.src_isd_as != ds.src_isd_as || meta.dst_isd_as != ds.dst_isd_as {
        return Err(DeriveError::MetaMismatch(format!(
            "ISD-AS pair {} -> {} != {} -> {}",
            meta.src_isd_as, meta.dst_isd_as, ds.src_isd_as, ds.dst_isd_as
        )));
    }

    let key = derive(&ds.key, &meta.context)?;
    Ok(Lvl2Key {
        meta: meta.clone(),
        epoch: ds.epoch,
        key,
    })
}

/// AES-128-CMAC of `input` keyed with `key`.
fn cmac(key: &SecretKey, input: &[u8]) -> SecretKey {
    // A 16 byte key is always valid for AES-128.
    let mut mac = match Cmac::<Aes128>::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("AES-128 accepts {KEY_LEN} byte keys"),
    };
    mac.update(input);

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    SecretKey::from(out)
}
