// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup. Invalid values
//! abort startup with a [`ConfigError`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SUPABASE_URL` | Identity provider base URL (`SUPABASE_PROJECT_URL` also accepted) | Required |
//! | `AUTH_JWKS_PATH` | Key set endpoint path | `/auth/v1/keys` |
//! | `SUPABASE_API_KEY` | API key for the user-lookup endpoint (`SUPABASE_ANON_KEY` also accepted) | Unset (lookup disabled) |
//! | `AUTH_ALLOWED_ALGORITHMS` | Comma-separated signature algorithm allow-list | `RS256` |
//! | `AUTH_JWKS_CACHE_TTL_SECS` | Key set cache freshness | `300` |
//! | `AUTH_JWKS_TIMEOUT_SECS` | Key set / provider request timeout | `10` |
//! | `AUTH_VERIFY_ISSUER` | Enforce the `iss` claim | `false` |
//! | `AUTH_EXPECTED_ISSUER` | Expected `iss` | `<SUPABASE_URL>/auth/v1` |
//! | `AUTH_VERIFY_AUDIENCE` | Enforce the `aud` claim | `false` |
//! | `AUTH_EXPECTED_AUDIENCE` | Expected `aud` (required if enforced) | Unset |
//! | `AUTH_LEEWAY_SECS` | Clock skew leeway for `exp`/`nbf` | `0` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | Unset (HTTP) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use thiserror::Error;
use url::Url;

use crate::auth::{keys::DEFAULT_MIN_REFRESH_INTERVAL, KeySetSettings, VerifierConfig};

pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
/// Older name for [`SUPABASE_URL_ENV`].
pub const SUPABASE_PROJECT_URL_ENV: &str = "SUPABASE_PROJECT_URL";
pub const JWKS_PATH_ENV: &str = "AUTH_JWKS_PATH";
pub const API_KEY_ENV: &str = "SUPABASE_API_KEY";
/// Older name for [`API_KEY_ENV`].
pub const ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";
pub const ALLOWED_ALGORITHMS_ENV: &str = "AUTH_ALLOWED_ALGORITHMS";
pub const JWKS_CACHE_TTL_ENV: &str = "AUTH_JWKS_CACHE_TTL_SECS";
pub const JWKS_TIMEOUT_ENV: &str = "AUTH_JWKS_TIMEOUT_SECS";
pub const VERIFY_ISSUER_ENV: &str = "AUTH_VERIFY_ISSUER";
pub const EXPECTED_ISSUER_ENV: &str = "AUTH_EXPECTED_ISSUER";
pub const VERIFY_AUDIENCE_ENV: &str = "AUTH_VERIFY_AUDIENCE";
pub const EXPECTED_AUDIENCE_ENV: &str = "AUTH_EXPECTED_AUDIENCE";
pub const LEEWAY_ENV: &str = "AUTH_LEEWAY_SECS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default key set path on the provider.
pub const DEFAULT_JWKS_PATH: &str = "/auth/v1/keys";

/// Issuer path the provider stamps into `iss`, relative to the base URL.
pub const ISSUER_PATH: &str = "/auth/v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully parsed gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub provider_url: Url,
    pub jwks_url: String,
    pub api_key: Option<String>,
    pub key_set: KeySetSettings,
    pub verifier: VerifierConfig,
    pub bind_addr: SocketAddr,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let raw_url = get(SUPABASE_URL_ENV)
            .or_else(|| get(SUPABASE_PROJECT_URL_ENV))
            .ok_or(ConfigError::Missing(SUPABASE_URL_ENV))?;
        let provider_url =
            Url::parse(&raw_url).map_err(|e| invalid(SUPABASE_URL_ENV, e.to_string()))?;
        if !matches!(provider_url.scheme(), "http" | "https") {
            return Err(invalid(SUPABASE_URL_ENV, "scheme must be http or https"));
        }
        let base = provider_url.as_str().trim_end_matches('/').to_string();

        let jwks_path = get(JWKS_PATH_ENV).unwrap_or_else(|| DEFAULT_JWKS_PATH.to_string());
        let jwks_url = if jwks_path.starts_with('/') {
            format!("{base}{jwks_path}")
        } else {
            format!("{base}/{jwks_path}")
        };

        let allowed_algorithms = match get(ALLOWED_ALGORITHMS_ENV) {
            Some(list) => parse_algorithms(&list)?,
            None => vec![Algorithm::RS256],
        };

        let key_set = KeySetSettings {
            cache_ttl: Duration::from_secs(parse_or(&get, JWKS_CACHE_TTL_ENV, 300)?),
            fetch_timeout: Duration::from_secs(parse_or(&get, JWKS_TIMEOUT_ENV, 10)?),
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            allowed_algorithms,
        };
        if key_set.fetch_timeout.is_zero() {
            return Err(invalid(JWKS_TIMEOUT_ENV, "must be greater than zero"));
        }

        let verify_issuer = parse_bool(&get, VERIFY_ISSUER_ENV)?;
        let verify_audience = parse_bool(&get, VERIFY_AUDIENCE_ENV)?;
        let expected_audience = get(EXPECTED_AUDIENCE_ENV);
        if verify_audience && expected_audience.is_none() {
            return Err(ConfigError::Missing(EXPECTED_AUDIENCE_ENV));
        }

        let verifier = VerifierConfig {
            verify_issuer,
            expected_issuer: get(EXPECTED_ISSUER_ENV).or_else(|| Some(format!("{base}{ISSUER_PATH}"))),
            verify_audience,
            expected_audience,
            leeway_secs: parse_or(&get, LEEWAY_ENV, 0)?,
        };

        let host = get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&get, PORT_ENV, 8080)?;
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid(HOST_ENV, e.to_string()))?;

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None => LogFormat::default(),
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Some(v) => return Err(invalid(LOG_FORMAT_ENV, format!("unknown format {v:?}"))),
        };

        Ok(Self {
            provider_url,
            jwks_url,
            api_key: get(API_KEY_ENV).or_else(|| get(ANON_KEY_ENV)),
            key_set,
            verifier,
            bind_addr,
            tls,
            log_format,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(v) => v.parse().map_err(|e: T::Err| invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<bool, ConfigError> {
    match get(var).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false" | "0" | "no" | "off") => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some(other) => Err(invalid(var, format!("expected a boolean, got {other:?}"))),
    }
}

/// Parse the algorithm allow-list. Symmetric algorithms are refused: a
/// public key set can never justify trusting an HMAC signature.
fn parse_algorithms(list: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let alg = Algorithm::from_str(name)
            .map_err(|_| invalid(ALLOWED_ALGORITHMS_ENV, format!("unknown algorithm {name:?}")))?;
        if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(invalid(
                ALLOWED_ALGORITHMS_ENV,
                format!("{name} is symmetric and cannot be verified with a public key set"),
            ));
        }
        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }
    if algorithms.is_empty() {
        return Err(invalid(ALLOWED_ALGORITHMS_ENV, "list is empty"));
    }
    Ok(algorithms)
}
