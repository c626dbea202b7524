use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::evaluator::Decision;
use crate::models::access_rule::RuleType;

const DEFAULT_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub email: String,
    pub role: Option<String>,
    pub resource: String,
    pub rule_type: RuleType,
}

/// Short-TTL cache of per-user decisions for read-heavy paths (sidebar
/// visibility, batch checks). Staleness is bounded two ways: entries lapse
/// after the TTL, and every rule write clears the whole cache so an
/// administrator always sees their own edits take effect.
pub struct DecisionCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, (Instant, Decision)>>,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// TTL from `AUTHZ_CACHE_TTL_SECS` (default 60, 0 disables caching).
    pub fn from_env() -> Self {
        let ttl_secs = std::env::var("AUTHZ_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TTL_SECS);

        Self::new(Duration::from_secs(ttl_secs))
    }

    pub(crate) async fn get(&self, key: &CacheKey) -> Option<Decision> {
        if self.ttl.is_zero() {
            return None;
        }

        let entries = self.entries.read().await;
        let (inserted_at, decision) = entries.get(key)?;
        if inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(decision.clone())
    }

    pub(crate) async fn insert(&self, key: CacheKey, decision: Decision) {
        if self.ttl.is_zero() {
            return;
        }

        let mut entries = self.entries.write().await;
        // Lazy eviction keeps the map bounded without a sweeper task.
        if entries.len() > 4096 {
            entries.retain(|_, (at, _)| at.elapsed() <= self.ttl);
        }
        entries.insert(key, (Instant::now(), decision));
    }

    /// Drop everything. Called after any role/user rule write.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(email: &str) -> CacheKey {
        CacheKey {
            email: email.to_string(),
            role: Some("Admin".to_string()),
            resource: "dashboard/overview".to_string(),
            rule_type: RuleType::Page,
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache = DecisionCache::new(Duration::from_secs(60));
        cache
            .insert(key("a@example.com"), Decision::allow("ok"))
            .await;

        let hit = cache.get(&key("a@example.com")).await;
        assert!(matches!(hit, Some(Decision::Allow { .. })));
        assert!(cache.get(&key("b@example.com")).await.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let cache = DecisionCache::new(Duration::ZERO);
        cache
            .insert(key("a@example.com"), Decision::allow("ok"))
            .await;
        assert!(cache.get(&key("a@example.com")).await.is_none());
    }

    #[tokio::test]
    async fn clear_invalidates_everything() {
        let cache = DecisionCache::new(Duration::from_secs(60));
        cache
            .insert(key("a@example.com"), Decision::allow("ok"))
            .await;
        cache.clear().await;
        assert!(cache.get(&key("a@example.com")).await.is_none());
    }
}
