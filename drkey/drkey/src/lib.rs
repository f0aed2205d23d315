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
//! # SCION DRKey client
//!
//! DRKey lets two SCION ASes authenticate traffic with symmetric keys that both sides derive
//! independently, without a per-packet key exchange. This crate implements the end host side:
//!
//! - fetching the delegation secret (DS) of an AS pair from a key service,
//! - caching it per validity epoch, with at most one fetch in flight per secret,
//! - deriving AS-to-host and host-to-host keys from the DS without further network access.
//!
//! The entry point is the [DrkeyClient]. Secrets are cached per key service address and
//! evicted once their epoch has ended.
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//!
//! use scion_drkey::{
//!     DrkeyClientBuilder, IsdAsn,
//!     address::HostAddr,
//!     derive::{DerivationContext, KeyType, Lvl2Meta},
//! };
//!
//! async fn host_key() {
//!     let client = DrkeyClientBuilder::new().build().unwrap();
//!     let meta = Lvl2Meta {
//!         protocol: "piskes".to_string(),
//!         src_isd_as: "17-ffaa:1:d69".parse::<IsdAsn>().unwrap(),
//!         dst_isd_as: "17-ffaa:1:e97".parse::<IsdAsn>().unwrap(),
//!         context: DerivationContext {
//!             key_type: KeyType::HostToHost,
//!             src_host: Some(HostAddr::Ipv4(Ipv4Addr::new(127, 0, 0, 1))),
//!             dst_host: Some(HostAddr::Ipv4(Ipv4Addr::new(127, 0, 0, 2))),
//!         },
//!     };
//!     let key = client
//!         .lvl2_key("127.0.0.1:30255", &meta, 1_700_000_000)
//!         .await
//!         .unwrap();
//!     println!("key valid in {}", key.epoch);
//! }
//! ```

pub mod address;
pub mod cache;
pub mod client;
pub mod derive;
pub mod epoch;
pub mod error;
pub mod key;
pub mod transport;

pub use address::IsdAsn;
pub use client::{DrkeyClient, DrkeyClientBuilder, DrkeyClientConfig};
pub use epoch::Epoch;
pub use error::DrkeyError;
pub use key::{DelegationSecret, SecretKey};
