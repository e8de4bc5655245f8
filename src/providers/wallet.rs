// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote wallet provider client.
//!
//! The ledger lives at the provider; this client only creates accounts,
//! reads balances and history, and submits deposits and transfers. Every
//! request carries the API key, and every mutating request an
//! `Idempotency-Key` and an `X-Signature` (base64 HMAC-SHA256 over
//! `METHOD\npath\nbody`).

use std::time::Duration;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum WalletProviderError {
    #[error("Wallet provider configuration invalid: {0}")]
    InvalidConfig(String),

    #[error("Wallet provider request failed: {0}")]
    Request(String),

    #[error("Wallet provider rejected request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Wallet provider response was invalid: {0}")]
    InvalidResponse(String),
}

/// Connection settings for the provider, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct WalletProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub signing_secret: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderAccount {
    pub account_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderBalance {
    pub account_id: String,
    pub currency: String,
    pub balance_minor: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTransaction {
    pub transaction_id: String,
    pub kind: String,
    pub amount_minor: u64,
    pub currency: String,
    #[serde(default)]
    pub counterparty_account_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TransactionPage {
    transactions: Vec<ProviderTransaction>,
}

#[derive(Debug, Clone)]
pub struct WalletProviderClient {
    base_url: Url,
    api_key: String,
    signing_secret: String,
    currency: String,
    http: Client,
}

impl WalletProviderClient {
    pub fn new(config: WalletProviderConfig) -> Result<Self, WalletProviderError> {
        let mut base_url = Url::parse(config.base_url.trim())
            .map_err(|e| WalletProviderError::InvalidConfig(format!("base url: {e}")))?;
        // Url::join drops the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WalletProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key: config.api_key,
            signing_secret: config.signing_secret,
            currency: config.currency.to_ascii_uppercase(),
            http,
        })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Open an account for `owner_reference`.
    ///
    /// The idempotency key makes repeated creation for the same owner return
    /// the same account.
    pub async fn create_account(
        &self,
        owner_reference: &str,
        idempotency_key: &str,
    ) -> Result<ProviderAccount, WalletProviderError> {
        let payload = json!({
            "owner_reference": owner_reference,
            "currency": self.currency,
        });
        self.send(Method::POST, "v1/accounts", Some(&payload), Some(idempotency_key))
            .await
    }

    pub async fn balance(&self, account_id: &str) -> Result<ProviderBalance, WalletProviderError> {
        self.send(
            Method::GET,
            &format!("v1/accounts/{account_id}/balance"),
            None,
            None,
        )
        .await
    }

    pub async fn deposit(
        &self,
        account_id: &str,
        amount_minor: u64,
        idempotency_key: &str,
    ) -> Result<ProviderTransaction, WalletProviderError> {
        let payload = json!({
            "amount_minor": amount_minor,
            "currency": self.currency,
        });
        self.send(
            Method::POST,
            &format!("v1/accounts/{account_id}/deposits"),
            Some(&payload),
            Some(idempotency_key),
        )
        .await
    }

    pub async fn transfer(
        &self,
        from_account_id: &str,
        to_account_id: &str,
        amount_minor: u64,
        note: Option<&str>,
        idempotency_key: &str,
    ) -> Result<ProviderTransaction, WalletProviderError> {
        let mut payload = json!({
            "from_account_id": from_account_id,
            "to_account_id": to_account_id,
            "amount_minor": amount_minor,
            "currency": self.currency,
        });
        if let (Some(note), Some(obj)) = (note, payload.as_object_mut()) {
            obj.insert("note".to_string(), Value::String(note.to_string()));
        }
        self.send(Method::POST, "v1/transfers", Some(&payload), Some(idempotency_key))
            .await
    }

    /// Account history as reported by the provider, newest first.
    pub async fn transactions(
        &self,
        account_id: &str,
    ) -> Result<Vec<ProviderTransaction>, WalletProviderError> {
        let page: TransactionPage = self
            .send(
                Method::GET,
                &format!("v1/accounts/{account_id}/transactions"),
                None,
                None,
            )
            .await?;
        Ok(page.transactions)
    }

    fn endpoint(&self, path: &str) -> Result<Url, WalletProviderError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| WalletProviderError::InvalidConfig(format!("endpoint {path}: {e}")))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> Result<T, WalletProviderError> {
        let url = self.endpoint(path)?;
        let body = match payload {
            Some(value) => serde_json::to_string(value).map_err(|e| {
                WalletProviderError::InvalidResponse(format!("serialize body failed: {e}"))
            })?,
            None => String::new(),
        };
        let signature = sign_request(&self.signing_secret, method.as_str(), url.path(), &body)?;

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("X-Api-Key", &self.api_key)
            .header("X-Signature", signature);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if payload.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(|e| {
            WalletProviderError::Request(format!("{method} {} failed: {e}", url.path()))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%method, path = %url.path(), %status, "Wallet provider returned error");
            return Err(WalletProviderError::Rejected { status, body });
        }

        response.json().await.map_err(|e| {
            WalletProviderError::InvalidResponse(format!("{method} {} invalid JSON: {e}", url.path()))
        })
    }
}

/// Base64 HMAC-SHA256 over `METHOD\npath\nbody`.
pub fn sign_request(
    secret: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, WalletProviderError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| WalletProviderError::InvalidConfig(format!("signing secret: {e}")))?;
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(b"\n");
    mac.update(path.as_bytes());
    mac.update(b"\n");
    mac.update(body.as_bytes());
    Ok(Base64::encode_string(&mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> WalletProviderConfig {
        WalletProviderConfig {
            base_url: base_url.to_string(),
            api_key: "key".to_string(),
            signing_secret: "secret".to_string(),
            currency: "eur".to_string(),
        }
    }

    #[test]
    fn signature_is_deterministic_and_covers_every_part() {
        let base = sign_request("secret", "POST", "/v1/transfers", r#"{"a":1}"#).unwrap();
        assert_eq!(
            base,
            sign_request("secret", "post", "/v1/transfers", r#"{"a":1}"#).unwrap()
        );
        assert_ne!(base, sign_request("other", "POST", "/v1/transfers", r#"{"a":1}"#).unwrap());
        assert_ne!(base, sign_request("secret", "GET", "/v1/transfers", r#"{"a":1}"#).unwrap());
        assert_ne!(base, sign_request("secret", "POST", "/v1/accounts", r#"{"a":1}"#).unwrap());
        assert_ne!(base, sign_request("secret", "POST", "/v1/transfers", r#"{"a":2}"#).unwrap());

        let raw = Base64::decode_vec(&base).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn endpoints_keep_base_path() {
        let client = WalletProviderClient::new(config("https://wallet.example.com/api")).unwrap();
        assert_eq!(
            client.endpoint("/v1/accounts").unwrap().as_str(),
            "https://wallet.example.com/api/v1/accounts"
        );
        assert_eq!(client.currency(), "EUR");

        let client = WalletProviderClient::new(config("https://wallet.example.com")).unwrap();
        assert_eq!(
            client.endpoint("v1/transfers").unwrap().path(),
            "/v1/transfers"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            WalletProviderClient::new(config("not a url")),
            Err(WalletProviderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn transaction_page_parses() {
        let page: TransactionPage = serde_json::from_str(
            r#"{"transactions":[{"transaction_id":"t1","kind":"deposit","amount_minor":1250,"currency":"EUR","created_at":"2026-01-02T03:04:05Z"}]}"#,
        )
        .unwrap();
        assert_eq!(page.transactions.len(), 1);
        assert_eq!(page.transactions[0].amount_minor, 1250);
        assert!(page.transactions[0].note.is_none());
    }
}
