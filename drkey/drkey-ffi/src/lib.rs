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
//! C ABI of the DRKey client.
//!
//! Exposes `GetDelegationSecret`, see `include/libdrkey.h`. All calls share one process-wide
//! [DrkeyClient] driven by its own multi-threaded tokio runtime, so secrets are cached across
//! calls.
//!
//! Logging goes to stderr and is configured with the `DRKEY_LOG` environment variable using the
//! `tracing_subscriber::EnvFilter` syntax, e.g. `DRKEY_LOG=scion_drkey=debug`.

use std::{
    ffi::{CStr, c_char, c_int},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::OnceLock,
    time::Duration,
};

use scion_drkey::{DelegationSecret, DrkeyClient, DrkeyClientBuilder, DrkeyError, IsdAsn};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

/// Size of the output buffer of `GetDelegationSecret`.
pub const DS_BUFFER_LEN: usize = 32;

/// Success.
pub const DRKEY_OK: c_int = 0;
/// Invalid arguments.
pub const DRKEY_ERR_INVALID_INPUT: c_int = -1;
/// The key service could not be reached.
pub const DRKEY_ERR_UNREACHABLE: c_int = -2;
/// The key service did not answer in time.
pub const DRKEY_ERR_TIMEOUT: c_int = -3;
/// The key service rejected the request.
pub const DRKEY_ERR_REJECTED: c_int = -4;
/// The key service answered with an invalid secret.
pub const DRKEY_ERR_MALFORMED: c_int = -5;
/// Internal error, including panics.
pub const DRKEY_ERR_INTERNAL: c_int = -6;

const LOG_ENV: &str = "DRKEY_LOG";
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

struct FfiContext {
    runtime: Runtime,
    client: DrkeyClient,
}

static CONTEXT: OnceLock<Result<FfiContext, String>> = OnceLock::new();

fn context() -> Result<&'static FfiContext, DrkeyError> {
    CONTEXT
        .get_or_init(|| {
            init_logging();
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("drkey")
                .build()
                .map_err(|e| format!("failed to start tokio runtime: {e}"))?;
            // The sweeper is spawned onto the current runtime.
            let guard = runtime.enter();
            let client = DrkeyClientBuilder::new()
                .with_sweep_interval(SWEEP_INTERVAL)
                .build()
                .map_err(|e| e.to_string())?;
            drop(guard);
            Ok(FfiContext { runtime, client })
        })
        .as_ref()
        .map_err(|e| DrkeyError::InternalCacheError(e.clone()))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // Another subscriber may already be installed by the host application.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Maps an error to its C error code.
pub fn error_code(error: &DrkeyError) -> c_int {
    match error {
        DrkeyError::InvalidInput(_) => DRKEY_ERR_INVALID_INPUT,
        DrkeyError::Unreachable(_) => DRKEY_ERR_UNREACHABLE,
        DrkeyError::Timeout(_) => DRKEY_ERR_TIMEOUT,
        DrkeyError::ServiceRejected(_) => DRKEY_ERR_REJECTED,
        DrkeyError::MalformedResponse(_) => DRKEY_ERR_MALFORMED,
        DrkeyError::InternalCacheError(_) => DRKEY_ERR_INTERNAL,
    }
}

/// Encodes a delegation secret as `not_before | not_after | key`, integers in native byte
/// order.
pub fn encode_delegation_secret(ds: &DelegationSecret) -> [u8; DS_BUFFER_LEN] {
    let mut buf = [0u8; DS_BUFFER_LEN];
    buf[0..8].copy_from_slice(&ds.epoch.not_before().to_ne_bytes());
    buf[8..16].copy_from_slice(&ds.epoch.not_after().to_ne_bytes());
    buf[16..32].copy_from_slice(ds.key.as_bytes());
    buf
}

/// Fetches a delegation secret with the process-wide client.
///
/// Must not be called from within a tokio runtime.
pub fn get_delegation_secret(
    server_address: &str,
    src: IsdAsn,
    dst: IsdAsn,
    val_time: i64,
) -> Result<DelegationSecret, DrkeyError> {
    let ctx = context()?;
    ctx.runtime
        .block_on(ctx.client.delegation_secret(server_address, src, dst, val_time))
}

/// Fetches the AS-to-AS delegation secret of `src_isd_as -> dst_isd_as` valid at `val_time`
/// (unix seconds) from the key service at `server_address` (`host:port` or URL).
///
/// On success writes 32 bytes to `out`: the start and end of the validity window as native
/// endian `int64_t`, followed by the 16 byte key, and returns 0. On failure `out` is zero-filled
/// and a negative error code is returned.
///
/// # Safety
///
/// `server_address` must be null or point to a NUL-terminated string. `out` must be null or
/// point to at least 32 writable bytes.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn GetDelegationSecret(
    server_address: *const c_char,
    src_isd_as: u64,
    dst_isd_as: u64,
    val_time: i64,
    out: *mut u8,
) -> c_int {
    if out.is_null() {
        return DRKEY_ERR_INVALID_INPUT;
    }
    // SAFETY: the caller guarantees that `out` points to DS_BUFFER_LEN writable bytes.
    let out = unsafe { std::slice::from_raw_parts_mut(out, DS_BUFFER_LEN) };
    out.fill(0);

    if server_address.is_null() {
        return DRKEY_ERR_INVALID_INPUT;
    }
    // SAFETY: the caller guarantees a NUL-terminated string.
    let server_address = match unsafe { CStr::from_ptr(server_address) }.to_str() {
        Ok(address) => address,
        Err(_) => return DRKEY_ERR_INVALID_INPUT,
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        get_delegation_secret(
            server_address,
            IsdAsn(src_isd_as),
            IsdAsn(dst_isd_as),
            val_time,
        )
    }));
    match result {
        Ok(Ok(ds)) => {
            out.copy_from_slice(&encode_delegation_secret(&ds));
            DRKEY_OK
        }
        Ok(Err(e)) => {
            tracing::warn!(
                server = %server_address,
                src = %IsdAsn(src_isd_as),
                dst = %IsdAsn(dst_isd_as),
                val_time,
                error = %e,
                "GetDelegationSecret failed"
            );
            error_code(&e)
        }
        Err(_) => {
            tracing::error!("GetDelegationSecret panicked");
            DRKEY_ERR_INTERNAL
        }
    }
}
