//! Request-scoped entity loader
//!
//! Loads models by `(type, id)` through a [`DataLoader`], so any number of
//! fields asking for the same entity in one request cause at most one fetch.
//! Results pass through the viewer's [`Authorizer`]: entities the viewer may not
//! see come back as `None`, exactly like missing ones.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::authz::{Authorizer, ViewerContext};
use crate::config::LoaderConfig;
use crate::dataloaders::{BatchLoader, DataLoader, LoadError};
use crate::model::{project, Model};
use crate::source::{DataSource, SourceError};
use crate::types::{EntityId, EntityType, RawRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

/// Fans a mixed batch of keys out to one `get_by_ids` call per entity type
pub struct SourceBatchLoader {
    source: Arc<dyn DataSource>,
}

impl SourceBatchLoader {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl BatchLoader<EntityKey, Model> for SourceBatchLoader {
    async fn load_batch(&self, keys: &[EntityKey]) -> Result<HashMap<EntityKey, Model>, SourceError> {
        // Group by type, keeping first-seen order of types and ids
        let mut groups: Vec<(EntityType, Vec<EntityId>)> = Vec::new();
        for key in keys {
            match groups.iter_mut().find(|(t, _)| *t == key.entity_type) {
                Some((_, ids)) => ids.push(key.id.clone()),
                None => groups.push((key.entity_type, vec![key.id.clone()])),
            }
        }

        let mut models = HashMap::with_capacity(keys.len());
        for (entity_type, ids) in groups {
            tracing::debug!(entity = %entity_type, count = ids.len(), "Batch loading entities");
            let records = self.source.get_by_ids(entity_type, &ids).await?;
            for (id, record) in records {
                models.insert(EntityKey { entity_type, id }, project(record, entity_type));
            }
        }
        Ok(models)
    }
}

pub struct EntityLoader {
    inner: DataLoader<EntityKey, Model, SourceBatchLoader>,
    authorizer: Arc<dyn Authorizer>,
    viewer: ViewerContext,
}

impl EntityLoader {
    pub fn new(
        source: Arc<dyn DataSource>,
        authorizer: Arc<dyn Authorizer>,
        viewer: ViewerContext,
        config: LoaderConfig,
    ) -> Self {
        Self {
            inner: DataLoader::with_config(SourceBatchLoader::new(source), config),
            authorizer,
            viewer,
        }
    }

    pub fn viewer(&self) -> &ViewerContext {
        &self.viewer
    }

    /// Load one entity; `None` when missing or not visible
    pub async fn load(&self, entity_type: EntityType, id: impl Into<EntityId>) -> Result<Option<Model>, LoadError> {
        let model = self.inner.load(EntityKey::new(entity_type, id)).await?;
        Ok(self.visible(model))
    }

    /// Load many entities of one type, one slot per id
    pub async fn load_many(&self, entity_type: EntityType, ids: &[EntityId]) -> Result<Vec<Option<Model>>, LoadError> {
        let keys: Vec<EntityKey> = ids
            .iter()
            .map(|id| EntityKey::new(entity_type, id.clone()))
            .collect();
        let models = self.inner.load_many(&keys).await?;
        Ok(models.into_iter().map(|m| self.visible(m)).collect())
    }

    /// Models for records a connection query already fetched
    ///
    /// An entity already in the request cache is reused; new ones are projected
    /// and primed so later loads of them are served from the cache. Loads of
    /// them still waiting for a batch are answered without a fetch. No
    /// authorization is applied here.
    pub async fn adopt_records(&self, entity_type: EntityType, records: Vec<RawRecord>) -> Vec<Model> {
        let mut models = Vec::with_capacity(records.len());
        for record in records {
            let key = EntityKey::new(entity_type, record.id.clone());
            let model = match self.inner.get_cached(&key).await {
                Some(Some(cached)) => cached,
                _ => {
                    let model = project(record, entity_type);
                    self.inner.prime(key, model.clone()).await;
                    model
                }
            };
            models.push(model);
        }
        models
    }

    /// Record a write made during this request
    pub async fn prime(&self, model: Model) {
        let key = EntityKey::new(model.entity_type(), model.id().clone());
        self.inner.prime(key, model).await;
    }

    /// Drop an entity mutated during this request so the next load refetches it
    pub async fn invalidate(&self, entity_type: EntityType, id: impl Into<EntityId>) {
        self.inner.invalidate(&EntityKey::new(entity_type, id)).await;
    }

    pub async fn clear(&self) {
        self.inner.clear().await;
    }

    pub fn can_view_field(&self, model: &Model, field: &str) -> bool {
        self.authorizer.can_view_field(&self.viewer, model, field)
    }

    fn visible(&self, model: Option<Model>) -> Option<Model> {
        model.filter(|m| self.authorizer.can_view(&self.viewer, m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::VisibilityPolicy;
    use crate::memory::MemorySource;

    fn source() -> Arc<MemorySource> {
        Arc::new(MemorySource::new().with_records(vec![
            RawRecord::new(EntityType::Post, 42u64).with_field("status", "publish"),
            RawRecord::new(EntityType::Post, 43u64)
                .with_field("status", "draft")
                .with_field("author", 5),
            RawRecord::new(EntityType::User, 5u64).with_field("name", "ada"),
        ]))
    }

    fn loader(source: Arc<MemorySource>, viewer: ViewerContext) -> EntityLoader {
        EntityLoader::new(
            source,
            Arc::new(VisibilityPolicy::cms_defaults()),
            viewer,
            LoaderConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_sibling_loads_fetch_once() {
        let src = source();
        let loader = loader(src.clone(), ViewerContext::anonymous());

        let (a, b, c) = tokio::join!(
            loader.load(EntityType::Post, 42u64),
            loader.load(EntityType::Post, 42u64),
            loader.load(EntityType::Post, 42u64),
        );
        for model in [a, b, c] {
            assert_eq!(model.unwrap().map(|m| m.id().to_string()), Some("42".to_string()));
        }
        assert_eq!(
            src.get_calls(),
            vec![(EntityType::Post, vec![EntityId::from(42u64)])]
        );
    }

    #[tokio::test]
    async fn test_mixed_types_group_per_type() {
        let src = source();
        let loader = loader(src.clone(), ViewerContext::user(5u64, &[]));

        let (post, user) = tokio::join!(
            loader.load(EntityType::Post, 43u64),
            loader.load(EntityType::User, 5u64),
        );
        assert!(post.unwrap().is_some());
        assert!(user.unwrap().is_some());
        assert_eq!(
            src.get_calls(),
            vec![
                (EntityType::Post, vec![EntityId::from(43u64)]),
                (EntityType::User, vec![EntityId::from(5u64)]),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_many_nulls_missing_and_hidden() {
        let src = source();
        let loader = loader(src.clone(), ViewerContext::anonymous());

        let ids: Vec<EntityId> = vec![43u64.into(), 99u64.into(), 42u64.into()];
        let models = loader.load_many(EntityType::Post, &ids).await.unwrap();
        let present: Vec<Option<String>> = models
            .iter()
            .map(|m| m.as_ref().map(|m| m.id().to_string()))
            .collect();
        // 43 is a draft, 99 does not exist
        assert_eq!(present, vec![None, None, Some("42".to_string())]);
        assert_eq!(src.get_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_adopted_records_serve_later_loads() {
        let src = source();
        let loader = loader(src.clone(), ViewerContext::anonymous());

        let record = RawRecord::new(EntityType::Post, 42u64).with_field("status", "publish");
        let adopted = loader.adopt_records(EntityType::Post, vec![record]).await;
        assert_eq!(adopted.len(), 1);

        let loaded = loader.load(EntityType::Post, 42u64).await.unwrap();
        assert_eq!(loaded, Some(adopted[0].clone()));
        assert!(src.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_adopted_records_answer_queued_loads() {
        let src = source();
        let loader = loader(src.clone(), ViewerContext::anonymous());

        let record = RawRecord::new(EntityType::Post, 42u64)
            .with_field("status", "publish")
            .with_field("title", "from connection");
        let (loaded, adopted) = tokio::join!(
            loader.load(EntityType::Post, 42u64),
            loader.adopt_records(EntityType::Post, vec![record]),
        );
        let loaded = loaded.unwrap().unwrap();
        assert_eq!(loaded, adopted[0]);
        assert_eq!(loaded.str_field("title"), Some("from connection"));

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(src.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_after_write_refetches() {
        let src = source();
        let loader = loader(src.clone(), ViewerContext::anonymous());

        loader.load(EntityType::Post, 42u64).await.unwrap();
        loader.invalidate(EntityType::Post, 42u64).await;
        loader.load(EntityType::Post, 42u64).await.unwrap();
        assert_eq!(src.get_calls().len(), 2);

        let edited = project(
            RawRecord::new(EntityType::Post, 42u64)
                .with_field("status", "publish")
                .with_field("title", "edited"),
            EntityType::Post,
        );
        loader.prime(edited).await;
        let loaded = loader.load(EntityType::Post, 42u64).await.unwrap().unwrap();
        assert_eq!(loaded.str_field("title"), Some("edited"));
        assert_eq!(src.get_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_source_failure_surfaces() {
        let src = source();
        src.fail_with(Some(SourceError::Unavailable("db down".to_string())));
        let loader = loader(src.clone(), ViewerContext::anonymous());
        let result = loader.load(EntityType::Post, 42u64).await;
        assert_eq!(
            result,
            Err(LoadError::Source(SourceError::Unavailable("db down".to_string())))
        );
    }
}
