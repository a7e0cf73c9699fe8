//! Schema manager (§4.8). A sentinel point carries the collection's schema
//! version and migration history in its payload, so the pipeline can tell
//! a fresh collection apart from one that predates the sentinel and needs
//! migrating forward.

use serde_json::json;

use crate::error::Result;
use crate::point::{Payload, PayloadIndexSchema, Point, WriteOptions};
use crate::store::VectorStore;

/// Point ID the schema metadata lives under. Chosen to never collide with a
/// real chunk's point ID (those are UUIDs).
pub const SCHEMA_SENTINEL_ID: &str = "__schema_metadata__";

/// The only migration defined so far: v0 → v4 creates a keyword index on
/// `relativePath`.
pub const CURRENT_SCHEMA_VERSION: u32 = 4;

/// Reads the sentinel point's `schemaVersion`. If no sentinel exists yet,
/// falls back to `ensurePayloadIndex`'s idempotency signal: asking it to
/// create the legacy `relativePath` keyword index and getting back
/// `Ok(false)` means the index (and therefore a pre-sentinel schema) already
/// existed, so the collection is treated as current; getting back `Ok(true)`
/// means nothing existed at all, i.e. version 0.
pub async fn get_schema_version(store: &dyn VectorStore, collection: &str) -> Result<u32> {
    if let Some(point) = store.get_point(collection, SCHEMA_SENTINEL_ID).await? {
        let version = point.payload.get("schemaVersion").and_then(|v| v.as_u64()).unwrap_or(0);
        return Ok(version as u32);
    }

    let created = store.ensure_payload_index(collection, "relativePath", PayloadIndexSchema::Keyword).await?;
    Ok(if created { 0 } else { CURRENT_SCHEMA_VERSION })
}

/// Outcome of [`ensure_current_schema`]: the version walked from, the
/// version landed on, and a human-readable log of each migration step
/// applied along the way (§8 scenario 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMigration {
    pub from_version: u32,
    pub to_version: u32,
    pub migrations_applied: Vec<String>,
}

/// Walks whatever migrations are needed to bring `collection` up to
/// [`CURRENT_SCHEMA_VERSION`], writing the sentinel payload after each step.
pub async fn ensure_current_schema(store: &dyn VectorStore, collection: &str) -> Result<SchemaMigration> {
    let from_version = get_schema_version(store, collection).await?;
    let mut migrations_applied = Vec::new();

    if from_version >= CURRENT_SCHEMA_VERSION {
        return Ok(SchemaMigration {
            from_version,
            to_version: from_version,
            migrations_applied,
        });
    }

    // v0 -> v4: the only migration defined so far.
    if from_version < 4 {
        store.ensure_payload_index(collection, "relativePath", PayloadIndexSchema::Keyword).await?;
        migrations_applied.push("v4: Created keyword index on relativePath".to_string());
    }
    write_sentinel(store, collection, CURRENT_SCHEMA_VERSION).await?;

    Ok(SchemaMigration {
        from_version,
        to_version: CURRENT_SCHEMA_VERSION,
        migrations_applied,
    })
}

/// Create-path variant of [`ensure_current_schema`] for a brand-new
/// collection: writes the sentinel at the current version directly, no
/// migration walk needed.
pub async fn initialize_schema(store: &dyn VectorStore, collection: &str) -> Result<()> {
    store.ensure_payload_index(collection, "relativePath", PayloadIndexSchema::Keyword).await?;
    write_sentinel(store, collection, CURRENT_SCHEMA_VERSION).await
}

async fn write_sentinel(store: &dyn VectorStore, collection: &str, version: u32) -> Result<()> {
    let mut payload = Payload::new();
    payload.insert("_type".to_string(), json!("schema_metadata"));
    payload.insert("schemaVersion".to_string(), json!(version));
    payload.insert("migratedAt".to_string(), json!(chrono::Utc::now().to_rfc3339()));
    payload.insert("indexes".to_string(), json!(["relativePath"]));

    store
        .add_points(
            collection,
            vec![Point {
                id: SCHEMA_SENTINEL_ID.to_string(),
                vector: Vec::new(),
                payload,
            }],
            WriteOptions::wait(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Distance;
    use crate::store::MemoryVectorStore;

    #[tokio::test]
    async fn fresh_collection_starts_at_version_zero() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 3, Distance::Cosine, false).await.unwrap();
        assert_eq!(get_schema_version(&store, "c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_current_schema_migrates_and_is_idempotent() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 3, Distance::Cosine, false).await.unwrap();

        let first = ensure_current_schema(&store, "c").await.unwrap();
        assert_eq!(first.from_version, 0);
        assert_eq!(first.to_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(first.migrations_applied, vec!["v4: Created keyword index on relativePath".to_string()]);

        let second = ensure_current_schema(&store, "c").await.unwrap();
        assert_eq!(second.from_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(second.to_version, CURRENT_SCHEMA_VERSION);
        assert!(second.migrations_applied.is_empty());

        let version = get_schema_version(&store, "c").await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn initialize_schema_writes_sentinel_directly() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 3, Distance::Cosine, false).await.unwrap();
        initialize_schema(&store, "c").await.unwrap();

        let point = store.get_point("c", SCHEMA_SENTINEL_ID).await.unwrap().unwrap();
        assert_eq!(point.payload.get("_type").unwrap(), "schema_metadata");
        assert_eq!(point.payload.get("schemaVersion").unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn preexisting_legacy_index_is_treated_as_current() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 3, Distance::Cosine, false).await.unwrap();
        // Simulate a pre-sentinel collection that already has the legacy index.
        store.ensure_payload_index("c", "relativePath", PayloadIndexSchema::Keyword).await.unwrap();

        assert_eq!(get_schema_version(&store, "c").await.unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
