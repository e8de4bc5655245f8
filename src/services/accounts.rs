// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account registration, credentials and profiles.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{RegisterRequest, UpdateProfileRequest};
use crate::storage::{Store, StoredUser, UserCache, UserRepository, UserSummary};

const MIN_PASSWORD_CHARS: usize = 8;
const MAX_USERNAME_CHARS: usize = 32;
const MIN_USERNAME_CHARS: usize = 3;
const MAX_DISPLAY_NAME_CHARS: usize = 64;
const SUMMARY_CACHE_CAPACITY: usize = 4096;
const SUMMARY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Canonical form of a username: NFKC, trimmed, lowercase.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().nfkc().collect::<String>().to_lowercase()
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn validate_username(username: &str) -> ServiceResult<()> {
    let len = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        return Err(ServiceError::InvalidArgument(format!(
            "username must be {MIN_USERNAME_CHARS}-{MAX_USERNAME_CHARS} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ServiceError::InvalidArgument(
            "username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> ServiceResult<()> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(ServiceError::InvalidArgument(
            "email address is invalid".to_string(),
        )),
    }
}

fn clean_display_name(raw: Option<String>) -> ServiceResult<Option<String>> {
    let Some(name) = raw.map(|n| n.trim().to_string()) else {
        return Ok(None);
    };
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ServiceError::InvalidArgument(format!(
            "display_name must be at most {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    Ok(Some(name))
}

/// Account-store collaborator used by the real-time core and the HTTP API.
#[derive(Clone)]
pub struct AccountService {
    store: Store,
    cache: Arc<UserCache>,
}

impl AccountService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: Arc::new(UserCache::new(SUMMARY_CACHE_CAPACITY, SUMMARY_CACHE_TTL)),
        }
    }

    /// Create an account.
    ///
    /// Fails with `Conflict` if the username or email is already taken.
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<StoredUser> {
        let username = normalize_username(&request.username);
        let email = normalize_email(&request.email);
        validate_username(&username)?;
        validate_email(&email)?;
        if request.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(ServiceError::InvalidArgument(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        let display_name = clean_display_name(request.display_name)?;
        let password = request.password;

        let user = self
            .store
            .run(move |store| {
                let password_hash =
                    hash_password(&password).map_err(|e| ServiceError::Internal(e.to_string()))?;
                let now = Utc::now();
                let user = StoredUser {
                    user_id: Uuid::new_v4().to_string(),
                    username,
                    email,
                    display_name,
                    avatar_url: None,
                    password_hash,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                    last_seen_at: None,
                    wallet_account_id: None,
                };
                UserRepository::new(store).create(&user)?;
                Ok::<_, ServiceError>(user)
            })
            .await?;

        tracing::info!(user_id = %user.user_id, username = %user.username, "Account registered");
        Ok(user)
    }

    /// Check a username-or-email and password pair.
    ///
    /// Returns `None` for unknown logins, wrong passwords and deactivated
    /// accounts alike.
    pub async fn verify_credentials(
        &self,
        login: &str,
        password: &str,
    ) -> ServiceResult<Option<StoredUser>> {
        let login = if login.contains('@') {
            normalize_email(login)
        } else {
            normalize_username(login)
        };
        let password = password.to_string();

        self.store
            .run(move |store| {
                let Some(user) = UserRepository::new(store).find_by_login(&login)? else {
                    return Ok(None);
                };
                if !user.is_active || !verify_password(&password, &user.password_hash) {
                    return Ok(None);
                }
                Ok::<_, ServiceError>(Some(user))
            })
            .await
    }

    /// Active account by id, `NotFound` otherwise.
    pub async fn get(&self, user_id: &str) -> ServiceResult<StoredUser> {
        let id = user_id.to_string();
        let user = self
            .store
            .run(move |store| Ok::<_, ServiceError>(UserRepository::new(store).get(&id)?))
            .await?;
        match user {
            Some(user) if user.is_active => Ok(user),
            _ => Err(ServiceError::NotFound(format!("User {user_id} not found"))),
        }
    }

    /// The account-existence check consumed by calls, messages and auth.
    pub async fn exists_active(&self, user_id: &str) -> ServiceResult<bool> {
        match self.get(user_id).await {
            Ok(_) => Ok(true),
            Err(ServiceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Cached public summary, `None` if the user does not exist.
    pub async fn summary(&self, user_id: &str) -> ServiceResult<Option<UserSummary>> {
        if let Some(summary) = self.cache.get(user_id) {
            return Ok(Some(summary));
        }
        match self.get(user_id).await {
            Ok(user) => {
                let summary = UserSummary::from(&user);
                self.cache.put(summary.clone());
                Ok(Some(summary))
            }
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Summary used to decorate pushes and listings. A failed lookup is
    /// logged and yields `None` so the surrounding operation still succeeds.
    pub async fn display_summary(&self, user_id: &str) -> Option<UserSummary> {
        match self.summary(user_id).await {
            Ok(summary) => summary,
            Err(e) => {
                e.log_if_internal("user_summary");
                None
            }
        }
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        request: UpdateProfileRequest,
    ) -> ServiceResult<StoredUser> {
        let display_name = match request.display_name {
            Some(raw) => Some(clean_display_name(Some(raw))?),
            None => None,
        };
        let avatar_url = request
            .avatar_url
            .map(|u| u.trim().to_string())
            .map(|u| if u.is_empty() { None } else { Some(u) });
        if let Some(Some(url)) = &avatar_url {
            url::Url::parse(url).map_err(|_| {
                ServiceError::InvalidArgument("avatar_url must be an absolute URL".to_string())
            })?;
        }

        let id = user_id.to_string();
        let user = self
            .store
            .run(move |store| {
                let user = UserRepository::new(store).update(&id, |user| {
                    if let Some(name) = display_name {
                        user.display_name = name;
                    }
                    if let Some(url) = avatar_url {
                        user.avatar_url = url;
                    }
                })?;
                Ok::<_, ServiceError>(user)
            })
            .await?;

        self.cache.invalidate(user_id);
        Ok(user)
    }

    pub async fn search(
        &self,
        query: &str,
        requester: &str,
        limit: usize,
    ) -> ServiceResult<Vec<StoredUser>> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }
        let requester = requester.to_string();
        self.store
            .run(move |store| {
                Ok::<_, ServiceError>(UserRepository::new(store).search(&query, &requester, limit)?)
            })
            .await
    }

    /// Record the time a user's last live connection closed.
    pub async fn touch_last_seen(&self, user_id: &str) -> ServiceResult<()> {
        let id = user_id.to_string();
        self.store
            .run(move |store| {
                UserRepository::new(store).update(&id, |user| user.last_seen_at = Some(Utc::now()))?;
                Ok::<_, ServiceError>(())
            })
            .await
    }

    /// Remember the user's account id at the wallet provider.
    pub async fn link_wallet_account(&self, user_id: &str, account_id: &str) -> ServiceResult<()> {
        let id = user_id.to_string();
        let account_id = account_id.to_string();
        self.store
            .run(move |store| {
                UserRepository::new(store).update(&id, |user| {
                    user.wallet_account_id = Some(account_id)
                })?;
                Ok::<_, ServiceError>(())
            })
            .await
    }
}

#[cfg(test)]
pub(crate) async fn register_user(accounts: &AccountService, username: &str) -> StoredUser {
    accounts
        .register(RegisterRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "password123".to_string(),
            display_name: None,
        })
        .await
        .unwrap()
}
