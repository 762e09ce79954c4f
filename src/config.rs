//! Typed configuration parsed from environment variables.
//!
//! Values are read through a lookup closure so tests can feed a map instead
//! of mutating the process environment.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path::PathBuf;

use crate::error::ErrorCode;

pub const DEFAULT_PROFILE_TABLE: &str = "profiles";
pub const DEFAULT_SESSION_FILE: &str = ".passport-pals/session.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing config: env var {var} not set")]
    MissingVar { var: &'static str },
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingVar { .. } => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

/// What `update_profile` does after the backend accepts a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Merge the caller's fields into the cached profile without re-reading.
    #[default]
    TrustLocalWrite,
    /// Re-read the profile row after every successful write.
    RefetchAfterWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Connection settings for the hosted identity/storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project base URL without a trailing slash.
    pub url: String,
    /// Public API key sent as `apikey` on every request.
    pub anon_key: String,
    pub profile_table: String,
    /// Where the signed-in session is persisted between runs.
    pub session_file: PathBuf,
    /// Landing page for magic links, if the project needs an explicit one.
    pub redirect_url: Option<String>,
    pub timeouts: BackendTimeouts,
}

/// Auth facade behavior knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthOptions {
    pub update_policy: UpdatePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub auth: AuthOptions,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Required:
    /// - `PALS_BACKEND_URL`
    /// - `PALS_ANON_KEY`
    ///
    /// Optional:
    /// - `PALS_PROFILE_TABLE`: default `profiles`
    /// - `PALS_SESSION_FILE`: default `.passport-pals/session.json`
    /// - `PALS_AUTH_REDIRECT_URL`
    /// - `PALS_REQUEST_TIMEOUT_SECS`: default 30
    /// - `PALS_CONNECT_TIMEOUT_SECS`: default 10
    /// - `PALS_PROFILE_UPDATE_POLICY`: `optimistic` (default) or `refetch`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = get("PALS_BACKEND_URL")
            .ok_or(ConfigError::MissingVar { var: "PALS_BACKEND_URL" })?
            .trim_end_matches('/')
            .to_owned();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid { var: "PALS_BACKEND_URL", value: url });
        }
        let anon_key = get("PALS_ANON_KEY").ok_or(ConfigError::MissingVar { var: "PALS_ANON_KEY" })?;

        let backend = BackendConfig {
            url,
            anon_key,
            profile_table: get("PALS_PROFILE_TABLE").unwrap_or_else(|| DEFAULT_PROFILE_TABLE.to_owned()),
            session_file: get("PALS_SESSION_FILE").map_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE), PathBuf::from),
            redirect_url: get("PALS_AUTH_REDIRECT_URL"),
            timeouts: BackendTimeouts {
                request_secs: parse_u64(&get, "PALS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
                connect_secs: parse_u64(&get, "PALS_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
            },
        };
        let auth = AuthOptions { update_policy: parse_update_policy(get("PALS_PROFILE_UPDATE_POLICY").as_deref())? };

        Ok(Self { backend, auth })
    }
}

fn parse_u64<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_update_policy(raw: Option<&str>) -> Result<UpdatePolicy, ConfigError> {
    match raw.unwrap_or("optimistic") {
        "optimistic" => Ok(UpdatePolicy::TrustLocalWrite),
        "refetch" => Ok(UpdatePolicy::RefetchAfterWrite),
        other => Err(ConfigError::Invalid { var: "PALS_PROFILE_UPDATE_POLICY", value: other.to_owned() }),
    }
}
