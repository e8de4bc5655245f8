// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache of user summaries.
//!
//! Pushed events carry sender/caller info; caching the summary avoids a redb
//! read on every message and call push.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::repository::users::UserSummary;

struct CacheEntry {
    summary: UserSummary,
    inserted_at: Instant,
}

/// In-process LRU cache keyed by user id.
pub struct UserCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl UserCache {
    /// Create a new cache with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns `None` if not cached or expired.
    pub fn get(&self, user_id: &str) -> Option<UserSummary> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(user_id) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.summary.clone());
            }
            cache.pop(user_id);
        }
        None
    }

    pub fn put(&self, summary: UserSummary) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                summary.user_id.clone(),
                CacheEntry {
                    summary,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop a user's entry after a profile change.
    pub fn invalidate(&self, user_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(user_id);
        }
    }
}
