//! Content materialization settings.
//!
//! `ContentPolicy` is passed explicitly to table constructors; the core
//! never reads process-wide state. `from_env` is a convenience for
//! embedders that configure through the environment.

use serde::Deserialize;
use tracing::warn;

/// Environment variable holding the maximum content size, in MiB.
pub const MAX_SIZE_ENV: &str = "GIT_TABLES_BLOBS_MAX_SIZE";
/// Environment variable allowing binary content (`true|1|yes|on`).
pub const ALLOW_BINARY_ENV: &str = "GIT_TABLES_BLOBS_ALLOW_BINARY";

const MIB: u64 = 1024 * 1024;

/// Which blob contents may be returned in `blob_content` columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContentPolicy {
    /// Blobs larger than this many bytes yield empty content.
    pub max_content_size: u64,
    /// Return content that looks binary instead of empty content.
    pub allow_binary: bool,
}

impl ContentPolicy {
    pub const DEFAULT: Self = Self {
        max_content_size: 5 * MIB,
        allow_binary: false,
    };

    /// Reads overrides from the process environment.
    ///
    /// Unset variables keep their defaults; malformed values are logged and
    /// ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut policy = Self::DEFAULT;

        if let Some(raw) = lookup(MAX_SIZE_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(mib) => policy.max_content_size = mib.saturating_mul(MIB),
                Err(_) => warn!(key = MAX_SIZE_ENV, value = %raw, "ignoring malformed setting"),
            }
        }

        if let Some(raw) = lookup(ALLOW_BINARY_ENV) {
            match parse_bool(&raw) {
                Some(v) => policy.allow_binary = v,
                None => warn!(key = ALLOW_BINARY_ENV, value = %raw, "ignoring malformed setting"),
            }
        }

        policy
    }
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
