// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Loaded once from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the redb database | `./data` |
//! | `JWT_SECRET` | HMAC secret for bearer tokens | random per process |
//! | `JWT_ISSUER` | Issuer claim written and enforced | `parley` |
//! | `TOKEN_TTL_SECS` | Lifetime of issued tokens | `604800` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files enabling HTTPS | unset |
//! | `WALLET_PROVIDER_URL` | Wallet provider base URL | unset (wallet disabled) |
//! | `WALLET_PROVIDER_API_KEY` | Wallet provider API key | required with URL |
//! | `WALLET_PROVIDER_SIGNING_SECRET` | Request signing secret | required with URL |
//! | `WALLET_CURRENCY` | Ledger currency | `EUR` |

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use ring::rand::{SecureRandom, SystemRandom};

use crate::providers::WalletProviderConfig;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
/// Directory for the database file. Created on startup if missing.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const TOKEN_TTL_ENV: &str = "TOKEN_TTL_SECS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const WALLET_PROVIDER_URL_ENV: &str = "WALLET_PROVIDER_URL";
pub const WALLET_PROVIDER_API_KEY_ENV: &str = "WALLET_PROVIDER_API_KEY";
pub const WALLET_PROVIDER_SIGNING_SECRET_ENV: &str = "WALLET_PROVIDER_SIGNING_SECRET";
pub const WALLET_CURRENCY_ENV: &str = "WALLET_CURRENCY";

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DATABASE_FILE: &str = "parley.redb";
const DEFAULT_ISSUER: &str = "parley";
const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_CURRENCY: &str = "EUR";
const GENERATED_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{0} must be set together with {1}")]
    Incomplete(&'static str, &'static str),

    #[error("failed to generate random secret")]
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub jwt_secret: Vec<u8>,
    /// True when no secret was configured and one was generated
    pub jwt_secret_generated: bool,
    pub jwt_issuer: String,
    pub token_ttl_secs: i64,
    pub log_format: LogFormat,
    pub tls: Option<TlsPaths>,
    pub wallet: Option<WalletProviderConfig>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_secret_generated", &self.jwt_secret_generated)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("log_format", &self.log_format)
            .field("tls", &self.tls)
            .field("wallet_provider", &self.wallet.as_ref().map(|w| &w.base_url))
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = match get(PORT_ENV) {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                name: PORT_ENV,
                reason: format!("{e}"),
            })?,
            None => 8080,
        };
        let bind_addr: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|e| ConfigError::Invalid {
                    name: HOST_ENV,
                    reason: format!("{e}"),
                })?;

        let (jwt_secret, jwt_secret_generated) = match get(JWT_SECRET_ENV) {
            Some(secret) => (secret.into_bytes(), false),
            None => (generate_secret()?, true),
        };

        let token_ttl_secs = match get(TOKEN_TTL_ENV) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(ttl) if ttl > 0 => ttl,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: TOKEN_TTL_ENV,
                        reason: "must be a positive number of seconds".to_string(),
                    })
                }
            },
            None => DEFAULT_TOKEN_TTL_SECS,
        };

        let log_format = match get(LOG_FORMAT_ENV).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Incomplete(TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Incomplete(TLS_KEY_PATH_ENV, TLS_CERT_PATH_ENV)),
        };

        let wallet = match get(WALLET_PROVIDER_URL_ENV) {
            Some(base_url) => Some(WalletProviderConfig {
                base_url,
                api_key: get(WALLET_PROVIDER_API_KEY_ENV).ok_or(ConfigError::Incomplete(
                    WALLET_PROVIDER_API_KEY_ENV,
                    WALLET_PROVIDER_URL_ENV,
                ))?,
                signing_secret: get(WALLET_PROVIDER_SIGNING_SECRET_ENV).ok_or(
                    ConfigError::Incomplete(WALLET_PROVIDER_SIGNING_SECRET_ENV, WALLET_PROVIDER_URL_ENV),
                )?,
                currency: get(WALLET_CURRENCY_ENV)
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
                    .to_ascii_uppercase(),
            }),
            None => None,
        };

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            jwt_secret,
            jwt_secret_generated,
            jwt_issuer: get(JWT_ISSUER_ENV).unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            token_ttl_secs,
            log_format,
            tls,
            wallet,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn generate_secret() -> Result<Vec<u8>, ConfigError> {
    let mut secret = vec![0u8; GENERATED_SECRET_LEN];
    SystemRandom::new()
        .fill(&mut secret)
        .map_err(|_| ConfigError::Random)?;
    Ok(secret)
}
