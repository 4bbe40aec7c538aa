//! Sandbox policy metadata persisted in the KV store.
//!
//! Metadata is written twice: as one composite JSON record under
//! `ooss:metadata` and as individual fields under `ooss:<field>` so other
//! clients can read a single field without decoding the whole record. The
//! composite is authoritative for reads; every writer refreshes both views.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use warren_store::{unix_now, KvStore, Result as StoreResult};

/// Key prefix for every sandbox metadata entry.
pub const METADATA_PREFIX: &str = "ooss:";

/// Composite record key.
pub const METADATA_KEY: &str = "ooss:metadata";

/// How long a cached read stays fresh.
const CACHE_TTL: Duration = Duration::from_secs(5);

/// Structured sandbox policy metadata.
///
/// `allowed_paths`/`denied_paths` are glob patterns; an empty allow list
/// means "no allow-list constraint". Unknown fields round-trip through
/// `custom`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_class: Option<String>,
    pub allowed_paths: Vec<String>,
    pub denied_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(flatten)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

struct CacheSlot {
    fetched_at: Instant,
    value: Option<SandboxMetadata>,
}

/// Read-through cached store for [`SandboxMetadata`].
pub struct MetadataStore {
    kv: KvStore,
    cache: Mutex<Option<CacheSlot>>,
    ttl: Duration,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    pub fn new(kv: KvStore) -> Self {
        Self::with_ttl(kv, CACHE_TTL)
    }

    /// Custom cache TTL (tests).
    pub fn with_ttl(kv: KvStore, ttl: Duration) -> Self {
        Self {
            kv,
            cache: Mutex::new(None),
            ttl,
        }
    }

    /// Current metadata, served from cache while fresh.
    pub fn get(&self) -> StoreResult<Option<SandboxMetadata>> {
        {
            let cache = self.cache.lock();
            if let Some(slot) = cache.as_ref() {
                if slot.fetched_at.elapsed() < self.ttl {
                    return Ok(slot.value.clone());
                }
            }
        }

        let value: Option<SandboxMetadata> = self.kv.get(METADATA_KEY)?;
        *self.cache.lock() = Some(CacheSlot {
            fetched_at: Instant::now(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// Replace the metadata. Writes the composite record and every
    /// individual field, then invalidates the cache.
    pub fn set(&self, meta: &SandboxMetadata) -> StoreResult<()> {
        self.kv.set(METADATA_KEY, meta)?;
        self.write_fields(meta)?;
        self.invalidate();
        tracing::debug!(
            allowed = meta.allowed_paths.len(),
            denied = meta.denied_paths.len(),
            "sandbox metadata updated"
        );
        Ok(())
    }

    /// Read-modify-write, stamping `updated_at`. Reads the composite
    /// directly so the edit never works from a stale cache entry.
    pub fn update(
        &self,
        f: impl FnOnce(&mut SandboxMetadata),
    ) -> StoreResult<SandboxMetadata> {
        let mut meta: SandboxMetadata = self.kv.get(METADATA_KEY)?.unwrap_or_default();
        f(&mut meta);
        meta.updated_at = Some(unix_now());
        if meta.created_at.is_none() {
            meta.created_at = meta.updated_at;
        }
        self.set(&meta)?;
        Ok(meta)
    }

    /// Remove all metadata entries (composite, fields, custom).
    pub fn clear(&self) -> StoreResult<()> {
        for key in self.kv.keys(METADATA_PREFIX)? {
            self.kv.delete(&key)?;
        }
        self.invalidate();
        Ok(())
    }

    /// Drop the cached value; the next read hits the store.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Read one shadow field (`ooss:<name>`) without decoding the
    /// composite record.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> StoreResult<Option<T>> {
        self.kv.get(&format!("{METADATA_PREFIX}{name}"))
    }

    fn write_fields(&self, meta: &SandboxMetadata) -> StoreResult<()> {
        self.write_optional("workspaceId", &meta.workspace_id)?;
        self.write_optional("workloadId", &meta.workload_id)?;
        self.write_optional("sandboxId", &meta.sandbox_id)?;
        self.write_optional("trustClass", &meta.trust_class)?;
        self.kv
            .set(&format!("{METADATA_PREFIX}allowedPaths"), &meta.allowed_paths)?;
        self.kv
            .set(&format!("{METADATA_PREFIX}deniedPaths"), &meta.denied_paths)?;
        self.write_optional("createdAt", &meta.created_at)?;
        self.write_optional("updatedAt", &meta.updated_at)?;
        for (name, value) in &meta.custom {
            self.kv.set(&format!("{METADATA_PREFIX}{name}"), value)?;
        }
        Ok(())
    }

    fn write_optional<T: Serialize>(&self, name: &str, value: &Option<T>) -> StoreResult<()> {
        let key = format!("{METADATA_PREFIX}{name}");
        match value {
            Some(value) => self.kv.set(&key, value)?,
            None => {
                self.kv.delete(&key)?;
            }
        }
        Ok(())
    }
}
