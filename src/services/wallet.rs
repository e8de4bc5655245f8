// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet operations delegated to the remote provider.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    DepositRequest, TransferRequest, WalletResponse, WalletTransaction, WalletTransactionList,
};
use crate::providers::wallet::{ProviderTransaction, WalletProviderClient, WalletProviderError};
use crate::services::accounts::AccountService;

impl From<WalletProviderError> for ServiceError {
    fn from(err: WalletProviderError) -> Self {
        match err {
            WalletProviderError::Rejected { status, body } if status.is_client_error() => {
                ServiceError::InvalidArgument(if body.trim().is_empty() {
                    format!("wallet provider rejected the request ({status})")
                } else {
                    body
                })
            }
            WalletProviderError::Rejected { .. } | WalletProviderError::Request(_) => {
                ServiceError::Unavailable(err.to_string())
            }
            WalletProviderError::InvalidConfig(_) | WalletProviderError::InvalidResponse(_) => {
                ServiceError::Internal(err.to_string())
            }
        }
    }
}

/// Parse a decimal amount (at most two fractional digits) into minor units.
///
/// Returns the normalized decimal string alongside the minor amount.
pub fn parse_amount_to_minor(amount: &str) -> ServiceResult<(String, u64)> {
    let invalid = || ServiceError::InvalidArgument("amount must be a valid positive number".to_string());

    let trimmed = amount.trim();
    let (whole_part, fraction_part) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    if whole_part.is_empty() || !whole_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction_part.len() > 2 || !fraction_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServiceError::InvalidArgument(
            "amount must have at most 2 decimal places".to_string(),
        ));
    }

    let whole = whole_part
        .parse::<u64>()
        .map_err(|_| ServiceError::InvalidArgument("amount is too large".to_string()))?;
    let fraction = match fraction_part.len() {
        0 => 0,
        1 => fraction_part.parse::<u64>().map_err(|_| invalid())? * 10,
        _ => fraction_part.parse::<u64>().map_err(|_| invalid())?,
    };

    let minor = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(|| ServiceError::InvalidArgument("amount is too large".to_string()))?;
    if minor == 0 {
        return Err(ServiceError::InvalidArgument(
            "amount must be greater than zero".to_string(),
        ));
    }

    Ok((format_minor(minor), minor))
}

/// Minor units as a two-digit decimal string.
pub fn format_minor(minor: u64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}

fn transaction_view(tx: ProviderTransaction) -> WalletTransaction {
    WalletTransaction {
        transaction_id: tx.transaction_id,
        kind: tx.kind,
        amount: format_minor(tx.amount_minor),
        currency: tx.currency,
        counterparty_account_id: tx.counterparty_account_id,
        note: tx.note,
        created_at: tx.created_at,
    }
}

#[derive(Clone)]
pub struct WalletService {
    client: Arc<WalletProviderClient>,
    accounts: AccountService,
}

impl WalletService {
    pub fn new(client: WalletProviderClient, accounts: AccountService) -> Self {
        Self {
            client: Arc::new(client),
            accounts,
        }
    }

    /// Provider account of the user, created and linked on first access.
    pub async fn account_id(&self, user_id: &str) -> ServiceResult<String> {
        let user = self.accounts.get(user_id).await?;
        if let Some(account_id) = user.wallet_account_id {
            return Ok(account_id);
        }

        // Stable per user so a racing first access yields the same account
        let idempotency_key =
            Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("wallet-account:{user_id}").as_bytes())
                .to_string();
        let account = self.client.create_account(user_id, &idempotency_key).await?;
        self.accounts
            .link_wallet_account(user_id, &account.account_id)
            .await?;
        tracing::info!(user_id = %user_id, account_id = %account.account_id, "Wallet account linked");
        Ok(account.account_id)
    }

    pub async fn summary(&self, user_id: &str) -> ServiceResult<WalletResponse> {
        let account_id = self.account_id(user_id).await?;
        let balance = self.client.balance(&account_id).await?;
        Ok(WalletResponse {
            account_id: balance.account_id,
            currency: balance.currency,
            balance: format_minor(balance.balance_minor),
        })
    }

    pub async fn transactions(&self, user_id: &str) -> ServiceResult<WalletTransactionList> {
        let account_id = self.account_id(user_id).await?;
        let transactions = self.client.transactions(&account_id).await?;
        Ok(WalletTransactionList {
            transactions: transactions.into_iter().map(transaction_view).collect(),
        })
    }

    pub async fn deposit(
        &self,
        user_id: &str,
        request: DepositRequest,
    ) -> ServiceResult<WalletTransaction> {
        let (amount, minor) = parse_amount_to_minor(&request.amount)?;
        let account_id = self.account_id(user_id).await?;
        let request_id = Uuid::new_v4().to_string();

        tracing::info!(user_id = %user_id, %amount, request_id = %request_id, "Submitting deposit");
        let tx = self.client.deposit(&account_id, minor, &request_id).await?;
        Ok(transaction_view(tx))
    }

    pub async fn transfer(
        &self,
        user_id: &str,
        request: TransferRequest,
    ) -> ServiceResult<WalletTransaction> {
        if request.recipient_id == user_id {
            return Err(ServiceError::InvalidArgument(
                "cannot transfer to yourself".to_string(),
            ));
        }
        let (amount, minor) = parse_amount_to_minor(&request.amount)?;
        let note = request
            .note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let from = self.account_id(user_id).await?;
        let to = self.account_id(&request.recipient_id).await?;
        let request_id = Uuid::new_v4().to_string();

        tracing::info!(
            user_id = %user_id,
            recipient_id = %request.recipient_id,
            %amount,
            request_id = %request_id,
            "Submitting transfer"
        );
        let tx = self
            .client
            .transfer(&from, &to, minor, note.as_deref(), &request_id)
            .await?;
        Ok(transaction_view(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn parses_amounts() {
        assert_eq!(parse_amount_to_minor("12").unwrap(), ("12.00".to_string(), 1200));
        assert_eq!(parse_amount_to_minor(" 12.5 ").unwrap(), ("12.50".to_string(), 1250));
        assert_eq!(parse_amount_to_minor("0.07").unwrap(), ("0.07".to_string(), 7));
    }

    #[test]
    fn rejects_bad_amounts() {
        for bad in ["", "abc", "-1", "1.234", "1.2.3", ".5", "0", "0.00", "1e3"] {
            assert!(
                matches!(parse_amount_to_minor(bad), Err(ServiceError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(parse_amount_to_minor("184467440737095517").is_err());
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_minor(0), "0.00");
        assert_eq!(format_minor(5), "0.05");
        assert_eq!(format_minor(123456), "1234.56");
    }

    #[test]
    fn provider_errors_map_to_taxonomy() {
        let rejected = WalletProviderError::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: "insufficient funds".to_string(),
        };
        match ServiceError::from(rejected) {
            ServiceError::InvalidArgument(msg) => assert_eq!(msg, "insufficient funds"),
            other => panic!("unexpected {other:?}"),
        }

        let outage = WalletProviderError::Rejected {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(matches!(ServiceError::from(outage), ServiceError::Unavailable(_)));
        assert!(matches!(
            ServiceError::from(WalletProviderError::Request("timeout".into())),
            ServiceError::Unavailable(_)
        ));
        assert!(matches!(
            ServiceError::from(WalletProviderError::InvalidResponse("bad".into())),
            ServiceError::Internal(_)
        ));
    }
}
