// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User account repository.
//!
//! Usernames and emails are kept unique through the `usernames` and `emails`
//! lookup tables, written in the same transaction as the user row.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    read_row, write_row, Store, StoreError, StoreResult, EMAILS, USERNAMES, USERS,
};

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub user_id: String,
    /// NFKC-normalized, lowercase
    pub username: String,
    /// Lowercase
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// `pbkdf2-sha256$iterations$salt$hash`, never returned via API
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Account id at the external wallet provider, linked on first use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_account_id: Option<String>,
}

/// Public view of a user attached to pushed events and API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl From<&StoredUser> for UserSummary {
    fn from(user: &StoredUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

/// Repository for account rows.
pub struct UserRepository<'a> {
    store: &'a Store,
}

impl<'a> UserRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Insert a new user.
    ///
    /// # Returns
    /// - `Err(StoreError::AlreadyExists)` if the username or email is taken
    pub fn create(&self, user: &StoredUser) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut usernames = write_txn.open_table(USERNAMES)?;
            if usernames.get(user.username.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "Username {}",
                    user.username
                )));
            }
            let mut emails = write_txn.open_table(EMAILS)?;
            if emails.get(user.email.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("Email {}", user.email)));
            }

            usernames.insert(user.username.as_str(), user.user_id.as_str())?;
            emails.insert(user.email.as_str(), user.user_id.as_str())?;

            let mut users = write_txn.open_table(USERS)?;
            write_row(&mut users, &user.user_id, user)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> StoreResult<Option<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let users = read_txn.open_table(USERS)?;
        read_row(&users, user_id)
    }

    /// Look up by username or email (both already normalized by the caller).
    pub fn find_by_login(&self, login: &str) -> StoreResult<Option<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let users = read_txn.open_table(USERS)?;

        let table = if login.contains('@') {
            read_txn.open_table(EMAILS)?
        } else {
            read_txn.open_table(USERNAMES)?
        };
        let user_id = match table.get(login)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        read_row(&users, &user_id)
    }

    /// Apply `mutate` to the stored row and persist it.
    pub fn update<F>(&self, user_id: &str, mutate: F) -> StoreResult<StoredUser>
    where
        F: FnOnce(&mut StoredUser),
    {
        let write_txn = self.store.db().begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let mut user: StoredUser = read_row(&users, user_id)?
                .ok_or_else(|| StoreError::NotFound(format!("User {user_id}")))?;
            mutate(&mut user);
            user.updated_at = Utc::now();
            write_row(&mut users, user_id, &user)?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Case-insensitive substring search over username and display name.
    ///
    /// Inactive accounts and `exclude` are skipped.
    pub fn search(&self, query: &str, exclude: &str, limit: usize) -> StoreResult<Vec<StoredUser>> {
        let needle = query.to_lowercase();
        let read_txn = self.store.db().begin_read()?;
        let users = read_txn.open_table(USERS)?;

        let mut results = Vec::new();
        for entry in users.iter()? {
            let (_, value) = entry?;
            let user: StoredUser = serde_json::from_slice(value.value())?;
            if !user.is_active || user.user_id == exclude {
                continue;
            }
            let display = user
                .display_name
                .as_deref()
                .map(str::to_lowercase)
                .unwrap_or_default();
            if user.username.contains(&needle) || display.contains(&needle) {
                results.push(user);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) fn sample_user(user_id: &str, username: &str) -> StoredUser {
    let now = Utc::now();
    StoredUser {
        user_id: user_id.to_string(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        display_name: None,
        avatar_url: None,
        password_hash: "pbkdf2-sha256$1$AA$AA".to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
        last_seen_at: None,
        wallet_account_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::temp_store;

    #[test]
    fn create_and_lookup_by_username_or_email() {
        let (store, _dir) = temp_store();
        let repo = UserRepository::new(&store);
        repo.create(&sample_user("u1", "alice")).unwrap();

        assert_eq!(repo.get("u1").unwrap().unwrap().username, "alice");
        assert_eq!(repo.find_by_login("alice").unwrap().unwrap().user_id, "u1");
        assert_eq!(
            repo.find_by_login("alice@example.com").unwrap().unwrap().user_id,
            "u1"
        );
        assert!(repo.find_by_login("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_or_email_is_rejected() {
        let (store, _dir) = temp_store();
        let repo = UserRepository::new(&store);
        repo.create(&sample_user("u1", "alice")).unwrap();

        let same_name = sample_user("u2", "alice");
        assert!(matches!(
            repo.create(&same_name),
            Err(StoreError::AlreadyExists(_))
        ));

        let mut same_email = sample_user("u3", "alicia");
        same_email.email = "alice@example.com".to_string();
        assert!(matches!(
            repo.create(&same_email),
            Err(StoreError::AlreadyExists(_))
        ));

        // Nothing from the failed attempts was written
        assert!(repo.get("u2").unwrap().is_none());
        assert!(repo.find_by_login("alicia").unwrap().is_none());
    }

    #[test]
    fn update_persists_changes() {
        let (store, _dir) = temp_store();
        let repo = UserRepository::new(&store);
        repo.create(&sample_user("u1", "alice")).unwrap();

        let updated = repo
            .update("u1", |u| u.display_name = Some("Alice".to_string()))
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Alice"));
        assert_eq!(
            repo.get("u1").unwrap().unwrap().display_name.as_deref(),
            Some("Alice")
        );

        assert!(matches!(
            repo.update("missing", |_| {}),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn search_matches_username_and_display_name() {
        let (store, _dir) = temp_store();
        let repo = UserRepository::new(&store);
        repo.create(&sample_user("u1", "alice")).unwrap();
        let mut bob = sample_user("u2", "bob");
        bob.display_name = Some("Bobby Alison".to_string());
        repo.create(&bob).unwrap();
        let mut carol = sample_user("u3", "carol");
        carol.is_active = false;
        repo.create(&carol).unwrap();

        let hits = repo.search("ALI", "nobody", 10).unwrap();
        assert_eq!(hits.len(), 2);

        let hits = repo.search("ali", "u1", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user_id, "u2");

        assert!(repo.search("carol", "nobody", 10).unwrap().is_empty());
    }
}
