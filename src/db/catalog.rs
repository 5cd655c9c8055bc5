//! Read-only catalog lookups used when a fitting job is created.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::db::store::StoreError;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Reference of the owner's most recent base photo.
    async fn latest_photo(&self, owner_id: Uuid) -> Result<Option<String>, StoreError>;

    /// Main image reference per item id. Items without any image are absent.
    async fn main_images(&self, item_ids: &[i64]) -> Result<HashMap<i64, String>, StoreError>;

    /// Display name per item id. Unknown items are absent.
    async fn item_names(&self, item_ids: &[i64]) -> Result<HashMap<i64, String>, StoreError>;
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn latest_photo(&self, owner_id: Uuid) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT image_url
            FROM user_images
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get("image_url")).transpose()?)
    }

    async fn main_images(&self, item_ids: &[i64]) -> Result<HashMap<i64, String>, StoreError> {
        // Main image first, otherwise the oldest image of the item.
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (item_id) item_id, image_url
            FROM item_images
            WHERE item_id = ANY($1)
            ORDER BY item_id, is_main DESC, image_id ASC
            "#,
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<(i64, String), StoreError> {
                Ok((r.try_get("item_id")?, r.try_get("image_url")?))
            })
            .collect()
    }

    async fn item_names(&self, item_ids: &[i64]) -> Result<HashMap<i64, String>, StoreError> {
        let rows = sqlx::query("SELECT item_id, item_name FROM items WHERE item_id = ANY($1)")
            .bind(item_ids)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| -> Result<(i64, String), StoreError> {
                Ok((r.try_get("item_id")?, r.try_get("item_name")?))
            })
            .collect()
    }
}

/// Catalog backed by maps, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    photos: RwLock<HashMap<Uuid, String>>,
    items: RwLock<HashMap<i64, String>>,
    names: RwLock<HashMap<i64, String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_photo(&self, owner_id: Uuid, reference: impl Into<String>) {
        self.photos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner_id, reference.into());
    }

    pub fn add_item(&self, item_id: i64, image_reference: impl Into<String>) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_id, image_reference.into());
    }

    pub fn name_item(&self, item_id: i64, name: impl Into<String>) {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_id, name.into());
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn latest_photo(&self, owner_id: Uuid) -> Result<Option<String>, StoreError> {
        let photos = self.photos.read().map_err(|_| StoreError::Poisoned)?;
        Ok(photos.get(&owner_id).cloned())
    }

    async fn main_images(&self, item_ids: &[i64]) -> Result<HashMap<i64, String>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::Poisoned)?;
        Ok(item_ids
            .iter()
            .filter_map(|id| items.get(id).map(|reference| (*id, reference.clone())))
            .collect())
    }

    async fn item_names(&self, item_ids: &[i64]) -> Result<HashMap<i64, String>, StoreError> {
        let names = self.names.read().map_err(|_| StoreError::Poisoned)?;
        Ok(item_ids
            .iter()
            .filter_map(|id| names.get(id).map(|name| (*id, name.clone())))
            .collect())
    }
}
