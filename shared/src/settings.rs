//! Role and event-name presets, and the LINE identities bound to them.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Role, SettingsItem};
use crate::{Error, Result};

/// Settings type holding event-name presets.
pub const EVENT_NAME_TYPE: &str = "event_name";

/// Whether `item_type` is one the settings table accepts.
pub fn is_known_type(item_type: &str) -> bool {
    item_type == EVENT_NAME_TYPE || Role::from_key(item_type).is_some()
}

/// Store of settings items, unique on `(item_type, name)`.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn list(&self) -> Result<Vec<SettingsItem>>;

    async fn list_by_type(&self, item_type: &str) -> Result<Vec<SettingsItem>>;

    async fn find(&self, item_type: &str, name: &str) -> Result<Option<SettingsItem>>;

    /// Insert a new item. A `(item_type, name)` collision yields `Error::Conflict`.
    async fn insert(&self, item_type: &str, name: &str, line_id: Option<&str>) -> Result<SettingsItem>;

    async fn update_line_id(&self, id: Uuid, line_id: Option<&str>) -> Result<SettingsItem>;
}

/// Create or update the `(item_type, name)` preset.
///
/// An existing item keeps its LINE binding unless a new one is given. When the
/// insert loses a race against a concurrent registration, the row that won is
/// looked up and updated instead.
pub async fn upsert_item(
    store: &dyn SettingsStore,
    item_type: &str,
    name: &str,
    line_id: Option<&str>,
) -> Result<SettingsItem> {
    if let Some(existing) = store.find(item_type, name).await? {
        return bind_line_id(store, existing, line_id).await;
    }

    match store.insert(item_type, name, line_id).await {
        Ok(item) => {
            info!(item_type, name, "Created settings item");
            Ok(item)
        }
        Err(Error::Conflict(msg)) => {
            warn!(item_type, name, "Concurrent insert detected ({}), updating instead", msg);
            let existing = store.find(item_type, name).await?.ok_or_else(|| {
                Error::NotFound(format!("settings item {}/{}", item_type, name))
            })?;
            bind_line_id(store, existing, line_id).await
        }
        Err(e) => Err(e),
    }
}

async fn bind_line_id(
    store: &dyn SettingsStore,
    existing: SettingsItem,
    line_id: Option<&str>,
) -> Result<SettingsItem> {
    match line_id {
        Some(id) if existing.line_id.as_deref() != Some(id) => {
            store.update_line_id(existing.id, Some(id)).await
        }
        _ => Ok(existing),
    }
}

/// Group items by type, preserving store order within each group.
pub fn group_by_type(items: Vec<SettingsItem>) -> BTreeMap<String, Vec<SettingsItem>> {
    let mut grouped: BTreeMap<String, Vec<SettingsItem>> = BTreeMap::new();
    for item in items {
        grouped.entry(item.item_type.clone()).or_default().push(item);
    }
    grouped
}

/// Map of person name to LINE user id, for every role preset bound to a LINE user.
pub async fn recipients(store: &dyn SettingsStore) -> Result<HashMap<String, String>> {
    let items = store.list().await?;
    Ok(items
        .into_iter()
        .filter(|item| item.item_type != EVENT_NAME_TYPE)
        .filter_map(|item| item.line_id.map(|line_id| (item.name, line_id)))
        .collect())
}

/// Postgres-backed settings store.
#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn list(&self) -> Result<Vec<SettingsItem>> {
        let items = sqlx::query_as::<_, SettingsItem>(
            r#"
            SELECT id, item_type, name, line_id, created_at, updated_at
            FROM settings_items
            ORDER BY item_type, created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn list_by_type(&self, item_type: &str) -> Result<Vec<SettingsItem>> {
        let items = sqlx::query_as::<_, SettingsItem>(
            r#"
            SELECT id, item_type, name, line_id, created_at, updated_at
            FROM settings_items
            WHERE item_type = $1
            ORDER BY created_at
            "#,
        )
        .bind(item_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn find(&self, item_type: &str, name: &str) -> Result<Option<SettingsItem>> {
        let item = sqlx::query_as::<_, SettingsItem>(
            r#"
            SELECT id, item_type, name, line_id, created_at, updated_at
            FROM settings_items
            WHERE item_type = $1 AND name = $2
            "#,
        )
        .bind(item_type)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn insert(&self, item_type: &str, name: &str, line_id: Option<&str>) -> Result<SettingsItem> {
        sqlx::query_as::<_, SettingsItem>(
            r#"
            INSERT INTO settings_items (id, item_type, name, line_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, item_type, name, line_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item_type)
        .bind(name)
        .bind(line_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::from_insert(e, &format!("settings item {}/{}", item_type, name)))
    }

    async fn update_line_id(&self, id: Uuid, line_id: Option<&str>) -> Result<SettingsItem> {
        let item = sqlx::query_as::<_, SettingsItem>(
            r#"
            UPDATE settings_items
            SET line_id = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, item_type, name, line_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(line_id)
        .fetch_optional(&self.pool)
        .await?;

        item.ok_or_else(|| Error::NotFound(format!("settings item {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemorySettingsStore;

    #[tokio::test]
    async fn test_upsert_creates_then_binds() {
        let store = MemorySettingsStore::default();

        let created = upsert_item(&store, "officiant", "A", None).await.unwrap();
        assert!(created.line_id.is_none());

        let bound = upsert_item(&store, "officiant", "A", Some("U1")).await.unwrap();
        assert_eq!(bound.id, created.id);
        assert_eq!(bound.line_id.as_deref(), Some("U1"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_without_line_id_keeps_binding() {
        let store = MemorySettingsStore::default();
        upsert_item(&store, "sound", "B", Some("U2")).await.unwrap();

        let item = upsert_item(&store, "sound", "B", None).await.unwrap();
        assert_eq!(item.line_id.as_deref(), Some("U2"));
    }

    #[tokio::test]
    async fn test_upsert_recovers_from_insert_race() {
        let store = MemorySettingsStore::default();
        // Another registration lands between our lookup and our insert.
        store.race_next_insert("officiant", "A", None);

        let item = upsert_item(&store, "officiant", "A", Some("U9")).await.unwrap();
        assert_eq!(item.line_id.as_deref(), Some("U9"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recipients_only_bound_role_items() {
        let store = MemorySettingsStore::default();
        upsert_item(&store, "officiant", "A", Some("U1")).await.unwrap();
        upsert_item(&store, "sound", "B", None).await.unwrap();
        upsert_item(&store, EVENT_NAME_TYPE, "月次祭", Some("U3")).await.unwrap();

        let map = recipients(&store).await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("A").map(String::as_str), Some("U1"));
    }

    #[test]
    fn test_known_types() {
        assert!(is_known_type("officiant"));
        assert!(is_known_type(EVENT_NAME_TYPE));
        assert!(!is_known_type("janitor"));
    }
}
