use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use revline_core::config::{
    CUSTOMER_CACHE_TTL_SECS, SESSION_STORE_DEADLINE_MS, SESSION_TTL_SECS, VIN_CACHE_TTL_SECS,
};

use crate::error::{Result, StoreError};
use crate::types::{CustomerSnapshot, SessionRecord, VinRecord};

/// Atomic read-merge-write for session patches.
///
/// GETs the current record, fails if absent, merges the patch keys over it,
/// stamps `last_updated`, and SETs with the remaining TTL (reset to the full
/// session TTL only when the key had none). Running server-side makes the
/// whole sequence atomic, so concurrent patches from a call's tasks cannot
/// lose updates; reusing the remaining TTL means a session never lives past
/// its original hour.
const UPDATE_SESSION_LUA: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return nil
end
local record = cjson.decode(current)
local patch = cjson.decode(ARGV[1])
for k, v in pairs(patch) do
  record[k] = v
end
record['last_updated'] = ARGV[2]
local ttl = redis.call('TTL', KEYS[1])
if ttl <= 0 then
  ttl = tonumber(ARGV[3])
end
redis.call('SET', KEYS[1], cjson.encode(record), 'EX', ttl)
return 1
"#;

fn session_key(call_sid: &str) -> String {
    format!("session:{call_sid}")
}

fn customer_key(phone: &str) -> String {
    format!("customer:{phone}")
}

fn vin_key(vin: &str) -> String {
    format!("vin:{vin}")
}

/// Typed adapter over the ephemeral key/value store.
///
/// Every operation checks `initialized` and runs under a 2 s deadline;
/// timeouts and misses are logged and surfaced as misses, never panics.
pub struct SessionStore {
    /// Round-robin pool of multiplexed connections.
    pool: Vec<ConnectionManager>,
    next: AtomicUsize,
    update_script: Arc<Script>,
    initialized: AtomicBool,
}

impl SessionStore {
    /// Connect and validate with a PING. The returned adapter is the only
    /// handle that reports `initialized`; construction failure means the
    /// caller should degrade, not crash.
    pub async fn init(url: &str, pool_size: u32) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let size = pool_size.clamp(1, 256) as usize;

        let mut pool = Vec::with_capacity(size);
        for _ in 0..size {
            pool.push(ConnectionManager::new(client.clone()).await?);
        }

        let mut probe = pool[0].clone();
        let pong: String = timeout(
            Duration::from_millis(SESSION_STORE_DEADLINE_MS),
            redis::cmd("PING").query_async(&mut probe),
        )
        .await
        .map_err(|_| StoreError::Timeout {
            ms: SESSION_STORE_DEADLINE_MS,
        })??;
        debug!(%pong, "session store ping ok");

        let store = Self {
            pool,
            next: AtomicUsize::new(0),
            update_script: Arc::new(Script::new(UPDATE_SESSION_LUA)),
            initialized: AtomicBool::new(true),
        };
        info!(url, pool = size, "session store initialized");
        Ok(store)
    }

    /// Adapter that never connected. Every operation returns its defined
    /// negative result; nothing panics. Lets the process serve calls in a
    /// degraded mode when the store is down at startup.
    pub fn disconnected() -> Self {
        Self {
            pool: Vec::new(),
            next: AtomicUsize::new(0),
            update_script: Arc::new(Script::new(UPDATE_SESSION_LUA)),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn connection(&self) -> Result<ConnectionManager> {
        if !self.is_initialized() || self.pool.is_empty() {
            return Err(StoreError::NotInitialized);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        Ok(self.pool[idx].clone())
    }

    async fn with_deadline<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(Duration::from_millis(SESSION_STORE_DEADLINE_MS), fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                warn!(op, error = %e, "session store operation failed");
                Err(StoreError::Redis(e))
            }
            Err(_) => {
                warn!(op, ms = SESSION_STORE_DEADLINE_MS, "session store operation timed out");
                Err(StoreError::Timeout {
                    ms: SESSION_STORE_DEADLINE_MS,
                })
            }
        }
    }

    /// Overwrite the session record with a fresh TTL.
    pub async fn set_session(&self, call_sid: &str, record: &SessionRecord) -> Result<()> {
        let mut conn = self.connection()?;
        let json = serde_json::to_string(record)?;
        let key = session_key(call_sid);
        self.with_deadline("set_session", async move {
            conn.set_ex::<_, _, ()>(key, json, SESSION_TTL_SECS).await
        })
        .await
    }

    /// Fetch the session record. Misses and failures both come back as
    /// `None`; the caller can't tell them apart and shouldn't need to.
    pub async fn get_session(&self, call_sid: &str) -> Option<SessionRecord> {
        let Ok(mut conn) = self.connection() else {
            return None;
        };
        let key = session_key(call_sid);
        let raw: Option<String> = self
            .with_deadline("get_session", async move { conn.get(key).await })
            .await
            .ok()
            .flatten();
        raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(call_sid, error = %e, "corrupt session record, treating as miss");
                None
            }
        })
    }

    /// Atomically merge `patch` into the stored session via the server-side
    /// script. Client-side read-modify-write is deliberately not offered.
    pub async fn update_session(
        &self,
        call_sid: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        if !patch.is_object() {
            return Err(StoreError::Serialization(serde::ser::Error::custom(
                "session patch must be a JSON object",
            )));
        }

        let mut conn = self.connection()?;
        let script = Arc::clone(&self.update_script);
        let key = session_key(call_sid);
        let patch_json = patch.to_string();
        let now = Utc::now().to_rfc3339();

        let applied: Option<i64> = self
            .with_deadline("update_session", async move {
                script
                    .key(key)
                    .arg(patch_json)
                    .arg(now)
                    .arg(SESSION_TTL_SECS)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        match applied {
            Some(_) => Ok(()),
            None => Err(StoreError::SessionNotFound {
                call_sid: call_sid.to_string(),
            }),
        }
    }

    pub async fn delete_session(&self, call_sid: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let key = session_key(call_sid);
        self.with_deadline("delete_session", async move {
            conn.del::<_, ()>(key).await
        })
        .await
    }

    /// Cache a customer snapshot for the lookup fast path.
    pub async fn cache_customer(&self, phone: &str, snapshot: &CustomerSnapshot) -> Result<()> {
        let mut conn = self.connection()?;
        let json = serde_json::to_string(snapshot)?;
        let key = customer_key(phone);
        self.with_deadline("cache_customer", async move {
            conn.set_ex::<_, _, ()>(key, json, CUSTOMER_CACHE_TTL_SECS).await
        })
        .await
    }

    pub async fn get_cached_customer(&self, phone: &str) -> Option<CustomerSnapshot> {
        let Ok(mut conn) = self.connection() else {
            return None;
        };
        let key = customer_key(phone);
        let raw: Option<String> = self
            .with_deadline("get_cached_customer", async move { conn.get(key).await })
            .await
            .ok()
            .flatten();
        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    /// Drop the snapshot after any write that affects the customer.
    pub async fn invalidate_customer_cache(&self, phone: &str) {
        let Ok(mut conn) = self.connection() else {
            return;
        };
        let key = customer_key(phone);
        if self
            .with_deadline("invalidate_customer_cache", async move {
                conn.del::<_, ()>(key).await
            })
            .await
            .is_err()
        {
            // The TTL bounds staleness to five minutes if the delete failed.
            warn!(phone = %revline_core::phone::mask(phone), "customer cache invalidation failed");
        }
    }

    pub async fn cache_vin(&self, vin: &str, record: &VinRecord) -> Result<()> {
        let mut conn = self.connection()?;
        let json = serde_json::to_string(record)?;
        let key = vin_key(vin);
        self.with_deadline("cache_vin", async move {
            conn.set_ex::<_, _, ()>(key, json, VIN_CACHE_TTL_SECS).await
        })
        .await
    }

    pub async fn get_cached_vin(&self, vin: &str) -> Option<VinRecord> {
        let Ok(mut conn) = self.connection() else {
            return None;
        };
        let key = vin_key(vin);
        let raw: Option<String> = self
            .with_deadline("get_cached_vin", async move { conn.get(key).await })
            .await
            .ok()
            .flatten();
        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    /// Liveness probe for the health endpoint.
    pub async fn health(&self) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        self.with_deadline("health", async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The merge/TTL semantics live in the Lua script; these tests lock the
    // script text so a refactor can't silently drop the TTL clamp or the
    // absent-key guard.

    #[test]
    fn script_preserves_remaining_ttl() {
        assert!(UPDATE_SESSION_LUA.contains("redis.call('TTL', KEYS[1])"));
        assert!(UPDATE_SESSION_LUA.contains("if ttl <= 0"));
    }

    #[test]
    fn script_fails_on_absent_session() {
        assert!(UPDATE_SESSION_LUA.contains("if not current"));
    }

    #[test]
    fn script_stamps_last_updated() {
        assert!(UPDATE_SESSION_LUA.contains("record['last_updated'] = ARGV[2]"));
    }

    #[test]
    fn keys_match_persisted_layout() {
        assert_eq!(session_key("CA1"), "session:CA1");
        assert_eq!(customer_key("+15551234567"), "customer:+15551234567");
        assert_eq!(vin_key("1HGCM82633A004352"), "vin:1HGCM82633A004352");
    }

    #[tokio::test]
    async fn disconnected_adapter_returns_defined_negatives() {
        let store = SessionStore::disconnected();
        assert!(!store.is_initialized());

        let record = SessionRecord::new("CA1", "+15551234567");
        assert!(matches!(
            store.set_session("CA1", &record).await,
            Err(StoreError::NotInitialized)
        ));
        assert!(store.get_session("CA1").await.is_none());
        assert!(store.get_cached_customer("+15551234567").await.is_none());
        assert!(!store.health().await);
        // must not panic
        store.invalidate_customer_cache("+15551234567").await;
    }
}
