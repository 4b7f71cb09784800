//! Two-tier expiring cache store.
//!
//! The [`CacheStore`] pairs a fast in-process tier (lost on restart) with a
//! durable libSQL tier (survives restarts, bounded space). Every entry carries
//! a write timestamp; an entry older than the configured TTL is treated as
//! absent and purged on read. Writes always land in the fast tier; the durable
//! tier is updated unless the key is flagged as a secret, and a durable write
//! failure is logged and swallowed rather than propagated.
//!
//! Concurrent access is last-writer-wins; no transaction discipline. Callers
//! needing isolation serialize their own calls.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use orgpulse_shared::{OrgPulseError, Result};

/// Key prefixes that must never reach durable storage.
const SECRET_KEY_PREFIXES: &[&str] = &["token-", "secret-"];

/// Namespace prefix for all cache keys.
const CACHE_NS: &str = "orgpulse";

// ---------------------------------------------------------------------------
// Key construction
// ---------------------------------------------------------------------------

/// Build a cache key from a logical endpoint and its call parameters.
///
/// Parameters are serialized through a sorted map, so two calls with identical
/// (endpoint, parameters) always collide and differing parameters never do,
/// regardless of argument order at the call site.
pub fn cache_key(endpoint: &str, params: &[(&str, String)]) -> String {
    let sorted: std::collections::BTreeMap<&str, &str> =
        params.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let serialized = serde_json::to_string(&sorted).expect("string map serializes");
    format!("{CACHE_NS}:{endpoint}:{serialized}")
}

/// Whether a key is flagged as a secret (never written to the durable tier).
fn is_secret_key(key: &str) -> bool {
    SECRET_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Fixed-width durable-tier key: hex SHA-256 of the logical key.
fn durable_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// A cached value with its write timestamp.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: serde_json::Value,
    stored_at: DateTime<Utc>,
}

/// Durable tier handle wrapping a libSQL database.
struct Durable {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// Two-tier expiring key/value store.
pub struct CacheStore {
    ttl: Duration,
    memory: Mutex<HashMap<String, CacheEntry>>,
    durable: Option<Durable>,
}

impl CacheStore {
    /// Open or create the durable tier at `path`, with entries expiring after `ttl`.
    pub async fn open(path: &Path, ttl: std::time::Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OrgPulseError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OrgPulseError::Cache(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OrgPulseError::Cache(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                stored_at TEXT NOT NULL
            )",
        )
        .await
        .map_err(|e| OrgPulseError::Cache(format!("schema init failed: {e}")))?;

        Ok(Self {
            ttl: to_chrono(ttl),
            memory: Mutex::new(HashMap::new()),
            durable: Some(Durable { db, conn }),
        })
    }

    /// A store with no durable tier. Entries live only in process memory.
    ///
    /// Used when the durable tier cannot be opened (degraded mode) and in tests.
    pub fn in_memory(ttl: std::time::Duration) -> Self {
        Self {
            ttl: to_chrono(ttl),
            memory: Mutex::new(HashMap::new()),
            durable: None,
        }
    }

    /// Look up a fresh entry. Checks the fast tier first; on miss, checks the
    /// durable tier and re-populates the fast tier before returning. A stale
    /// entry is purged from both tiers and treated as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Utc::now();

        // Fast tier
        let mem_hit = {
            let mut mem = self.memory.lock().expect("cache mutex poisoned");
            match mem.get(key) {
                Some(entry) if now - entry.stored_at < self.ttl => Some(entry.payload.clone()),
                Some(_) => {
                    // Stale: purge and fall through to the durable check
                    let _ = mem.remove(key);
                    None
                }
                None => None,
            }
        };
        if let Some(payload) = mem_hit {
            return decode(key, payload);
        }

        // Durable tier
        let durable = self.durable.as_ref()?;
        match self.durable_get(durable, key).await {
            Ok(Some(entry)) => {
                if now - entry.stored_at < self.ttl {
                    // Hydrate the fast tier
                    let payload = entry.payload.clone();
                    self.memory
                        .lock()
                        .expect("cache mutex poisoned")
                        .insert(key.to_string(), entry);
                    decode(key, payload)
                } else {
                    self.durable_delete(durable, key).await;
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "durable cache read failed");
                None
            }
        }
    }

    /// Store a value in both tiers. Secret-flagged keys stay in the fast tier
    /// only. Never fails: serialization or durable-write errors are logged and
    /// the call returns.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "cache value serialization failed, entry dropped");
                return;
            }
        };
        let entry = CacheEntry {
            payload,
            stored_at: Utc::now(),
        };

        self.memory
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.to_string(), entry.clone());

        if is_secret_key(key) {
            debug!(key, "secret key, skipping durable tier");
            return;
        }

        if let Some(durable) = &self.durable {
            self.durable_set(durable, key, &entry).await;
        }
    }

    /// Drop every cached entry from both tiers.
    pub async fn clear(&self) {
        self.memory
            .lock()
            .expect("cache mutex poisoned")
            .clear();

        if let Some(durable) = &self.durable {
            if let Err(e) = durable
                .conn
                .execute("DELETE FROM cache_entries", params![])
                .await
            {
                warn!(error = %e, "durable cache clear failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Durable tier operations
    // -----------------------------------------------------------------------

    async fn durable_get(&self, durable: &Durable, key: &str) -> Result<Option<CacheEntry>> {
        let mut rows = durable
            .conn
            .query(
                "SELECT payload, stored_at FROM cache_entries WHERE key = ?1",
                params![durable_key(key)],
            )
            .await
            .map_err(|e| OrgPulseError::Cache(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let payload_text: String = row
                    .get(0)
                    .map_err(|e| OrgPulseError::Cache(e.to_string()))?;
                let stored_at_text: String = row
                    .get(1)
                    .map_err(|e| OrgPulseError::Cache(e.to_string()))?;

                let payload = serde_json::from_str(&payload_text)
                    .map_err(|e| OrgPulseError::Cache(format!("corrupt payload: {e}")))?;
                let stored_at = DateTime::parse_from_rfc3339(&stored_at_text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| OrgPulseError::Cache(format!("invalid timestamp: {e}")))?;

                Ok(Some(CacheEntry { payload, stored_at }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OrgPulseError::Cache(e.to_string())),
        }
    }

    /// Durable writes fail silently: quota or I/O problems must not break a fetch.
    async fn durable_set(&self, durable: &Durable, key: &str, entry: &CacheEntry) {
        let payload_text = entry.payload.to_string();
        let result = durable
            .conn
            .execute(
                "INSERT INTO cache_entries (key, payload, stored_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   payload = excluded.payload,
                   stored_at = excluded.stored_at",
                params![
                    durable_key(key),
                    payload_text.as_str(),
                    entry.stored_at.to_rfc3339()
                ],
            )
            .await;

        if let Err(e) = result {
            warn!(key, error = %e, "durable cache write failed");
        }
    }

    async fn durable_delete(&self, durable: &Durable, key: &str) {
        if let Err(e) = durable
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE key = ?1",
                params![durable_key(key)],
            )
            .await
        {
            warn!(key, error = %e, "stale entry purge failed");
        }
    }

    /// Backdate an entry in both tiers (for expiry tests).
    #[cfg(test)]
    async fn set_with_timestamp<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        stored_at: DateTime<Utc>,
    ) {
        let entry = CacheEntry {
            payload: serde_json::to_value(value).expect("test value serializes"),
            stored_at,
        };
        self.memory
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.to_string(), entry.clone());
        if let Some(durable) = &self.durable {
            self.durable_set(durable, key, &entry).await;
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("ttl", &self.ttl)
            .field("durable", &self.durable.is_some())
            .finish_non_exhaustive()
    }
}

/// Deserialize a cached payload; a shape mismatch is treated as a miss.
fn decode<T: DeserializeOwned>(key: &str, payload: serde_json::Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "cached payload has unexpected shape, treating as miss");
            None
        }
    }
}

fn to_chrono(ttl: std::time::Duration) -> Duration {
    Duration::from_std(ttl).unwrap_or_else(|_| Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    const HOUR: StdDuration = StdDuration::from_secs(3600);

    /// Create a temp-file-backed store for testing.
    async fn test_store(ttl: StdDuration) -> (CacheStore, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("orgpulse_test_{}.db", Uuid::now_v7()));
        let store = CacheStore::open(&path, ttl).await.expect("open test cache");
        (store, path)
    }

    #[test]
    fn cache_key_is_stable_across_param_order() {
        let a = cache_key("credits", &[("org", "Acme".into()), ("months", "12".into())]);
        let b = cache_key("credits", &[("months", "12".into()), ("org", "Acme".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_by_params_and_endpoint() {
        let a = cache_key("credits", &[("org", "Acme".into())]);
        let b = cache_key("credits", &[("org", "Other".into())]);
        let c = cache_key("comments", &[("org", "Acme".into())]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let (store, path) = test_store(HOUR).await;
        store.set("k1", &vec![1u32, 2, 3]).await;

        let got: Option<Vec<u32>> = store.get("k1").await;
        assert_eq!(got, Some(vec![1, 2, 3]));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = CacheStore::in_memory(HOUR);
        let got: Option<String> = store.get("nope").await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store = CacheStore::in_memory(StdDuration::ZERO);
        store.set("k1", &"value".to_string()).await;
        let got: Option<String> = store.get("k1").await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn stale_entry_is_purged_then_overwritable() {
        let (store, path) = test_store(HOUR).await;
        let old = Utc::now() - Duration::hours(2);
        store.set_with_timestamp("k1", &"old".to_string(), old).await;

        // Stale in both tiers: read purges and reports absent
        let got: Option<String> = store.get("k1").await;
        assert!(got.is_none());

        // A later set overwrites cleanly
        store.set("k1", &"fresh".to_string()).await;
        let got: Option<String> = store.get("k1").await;
        assert_eq!(got.as_deref(), Some("fresh"));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn durable_tier_survives_reopen() {
        let path = std::env::temp_dir().join(format!("orgpulse_test_{}.db", Uuid::now_v7()));

        {
            let store = CacheStore::open(&path, HOUR).await.expect("first open");
            store.set("k1", &42u64).await;
        }

        let store = CacheStore::open(&path, HOUR).await.expect("second open");
        let got: Option<u64> = store.get("k1").await;
        assert_eq!(got, Some(42));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn secret_keys_never_reach_durable_tier() {
        let path = std::env::temp_dir().join(format!("orgpulse_test_{}.db", Uuid::now_v7()));

        {
            let store = CacheStore::open(&path, HOUR).await.expect("first open");
            store.set("token-gitlab", &"s3cret".to_string()).await;
            // Readable in-process
            let got: Option<String> = store.get("token-gitlab").await;
            assert_eq!(got.as_deref(), Some("s3cret"));
        }

        // Gone after restart: the fast tier died with the process
        let store = CacheStore::open(&path, HOUR).await.expect("second open");
        let got: Option<String> = store.get("token-gitlab").await;
        assert!(got.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let path = std::env::temp_dir().join(format!("orgpulse_test_{}.db", Uuid::now_v7()));

        {
            let store = CacheStore::open(&path, HOUR).await.expect("first open");
            store.set("k1", &1u32).await;
            store.clear().await;
            let got: Option<u32> = store.get("k1").await;
            assert!(got.is_none());
        }

        // Durable rows are gone too
        let store = CacheStore::open(&path, HOUR).await.expect("second open");
        let got: Option<u32> = store.get("k1").await;
        assert!(got.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn shape_mismatch_is_a_miss() {
        let store = CacheStore::in_memory(HOUR);
        store.set("k1", &"not a number".to_string()).await;
        let got: Option<u64> = store.get("k1").await;
        assert!(got.is_none());
    }
}
