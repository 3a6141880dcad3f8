//! Two-tier response cache: a process-local map with lazy expiry (L1) in
//! front of an optional durable key-to-document store (L2).
//!
//! Every request is cached under two digests so that identical goals hit
//! even when the planner emits a different plan, while plan-level keys
//! protect exact replays:
//!
//! - `goal_key = sha256(normalize(goal))`
//! - `plan_key = sha256(normalize(goal) ‖ plan_text)`
//!
//! TTL is the sole eviction policy.

use crate::error::Result;
use crate::traits::CacheStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Lowercase, trim, and collapse runs of whitespace to single spaces.
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(
        String::with_capacity(digest.len() * 2),
        |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{:02x}", byte);
            out
        },
    )
}

/// Digest key over the normalized goal alone.
pub fn goal_key(goal: &str) -> String {
    hex_digest(&normalize(goal))
}

/// Digest key over the normalized goal concatenated with the raw plan text.
pub fn plan_key(goal: &str, plan_text: &str) -> String {
    hex_digest(&format!("{}{}", normalize(goal), plan_text))
}

/// One durable cache document, stored under both of its digest keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Digest of the normalized goal.
    pub goal_key: String,
    /// Digest of the normalized goal plus plan text.
    pub plan_key: String,
    /// The normalized goal, kept for inspection.
    pub goal_normalized: String,
    /// The raw plan text the response was produced from.
    pub plan_text: String,
    /// The cached final answer.
    pub response: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp; entries at or past this instant are misses.
    pub expires_at: DateTime<Utc>,
}

struct L1Entry {
    response: String,
    expires_at: DateTime<Utc>,
}

/// Two-tier TTL cache for final answers.
///
/// L1 is per-process and read-dominated; L2 is shared across processes when
/// a [`CacheStore`] is attached. L2 failures are logged and treated as
/// misses so the cache can never fail a request.
pub struct ResponseCache {
    l1: RwLock<HashMap<String, L1Entry>>,
    store: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache with the given TTL and optional durable tier.
    pub fn new(ttl: Duration, store: Option<Arc<dyn CacheStore>>) -> Self {
        Self {
            l1: RwLock::new(HashMap::new()),
            store,
            ttl,
        }
    }

    /// Look up a cached response for `(goal, plan_text)`, checking the goal
    /// key before the plan key and L1 before L2. L2 hits are promoted into
    /// L1.
    pub async fn get(&self, goal: &str, plan_text: &str) -> Option<String> {
        let keys = [goal_key(goal), plan_key(goal, plan_text)];
        let now = Utc::now();

        // L1: read path, with lazy purge of expired entries.
        let mut expired: Vec<String> = Vec::new();
        {
            let l1 = self.l1.read().await;
            for key in &keys {
                match l1.get(key) {
                    Some(entry) if entry.expires_at > now => {
                        metrics::counter!("cache.lookup.total", "tier" => "l1", "outcome" => "hit")
                            .increment(1);
                        return Some(entry.response.clone());
                    }
                    Some(_) => expired.push(key.clone()),
                    None => {}
                }
            }
        }
        if !expired.is_empty() {
            let mut l1 = self.l1.write().await;
            for key in &expired {
                // Re-check under the write lock; a concurrent set may have
                // refreshed the entry.
                if l1.get(key).is_some_and(|e| e.expires_at <= now) {
                    l1.remove(key);
                }
            }
        }
        metrics::counter!("cache.lookup.total", "tier" => "l1", "outcome" => "miss").increment(1);

        // L2: durable tier, promoting hits into L1.
        let store = self.store.as_ref()?;
        for key in &keys {
            match store.get(key).await {
                Ok(Some(entry)) if entry.expires_at > now => {
                    metrics::counter!("cache.lookup.total", "tier" => "l2", "outcome" => "hit")
                        .increment(1);
                    let mut l1 = self.l1.write().await;
                    l1.insert(
                        key.clone(),
                        L1Entry {
                            response: entry.response.clone(),
                            expires_at: entry.expires_at,
                        },
                    );
                    return Some(entry.response);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Cache store lookup failed, treating as miss");
                }
            }
        }
        metrics::counter!("cache.lookup.total", "tier" => "l2", "outcome" => "miss").increment(1);
        None
    }

    /// Store `response` under both keys in both tiers with
    /// `expires_at = now + ttl`.
    pub async fn set(&self, goal: &str, plan_text: &str, response: &str) {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let gk = goal_key(goal);
        let pk = plan_key(goal, plan_text);

        {
            let mut l1 = self.l1.write().await;
            for key in [&gk, &pk] {
                l1.insert(
                    key.clone(),
                    L1Entry {
                        response: response.to_string(),
                        expires_at,
                    },
                );
            }
        }

        if let Some(store) = &self.store {
            let entry = CacheEntry {
                goal_key: gk.clone(),
                plan_key: pk.clone(),
                goal_normalized: normalize(goal),
                plan_text: plan_text.to_string(),
                response: response.to_string(),
                created_at: now,
                expires_at,
            };
            for key in [&gk, &pk] {
                if let Err(e) = store.put(key, &entry).await {
                    tracing::warn!(error = %e, "Cache store write failed");
                }
            }
        }
    }

    /// Number of live L1 entries; test and diagnostics helper.
    pub async fn l1_len(&self) -> usize {
        self.l1.read().await.len()
    }
}
