//! Materialized entity view of one dataset, keyed by canonical ID.

use crate::dataset::Dataset;
use crate::entity::{Entity, EntityQuery, ReconstructError};
use crate::resolver::Resolver;
use crate::schema::SchemaModel;
use crate::statement::StatementSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Read access to resolved entities.
#[async_trait]
pub trait EntityLoader: Send + Sync {
    /// The entity for a canonical or raw ID, if it is (still) present.
    async fn get_entity(&self, id: &str) -> Option<Arc<Entity>>;

    /// Every entity in the view, in ID order.
    fn entities(&self) -> Vec<Arc<Entity>>;
}

/// Entities of a dataset with confirmed duplicates folded together.
#[derive(Debug, Clone, Default)]
pub struct DatasetView {
    dataset: String,
    entities: BTreeMap<String, Arc<Entity>>,
    /// Raw ID to canonical ID
    referents: BTreeMap<String, String>,
}

impl DatasetView {
    /// Reconstruct every entity of `dataset` and fold them by canonical ID.
    pub fn build(
        source: &dyn StatementSource,
        dataset: &Dataset,
        resolver: &mut Resolver,
        model: &SchemaModel,
    ) -> Result<Self> {
        let statements = source
            .all_statements(&dataset.name, None)
            .with_context(|| format!("cannot read statements of {}", dataset.name))?;
        let mut folded: BTreeMap<String, Entity> = BTreeMap::new();
        let mut skipped = 0usize;
        for result in EntityQuery::new(statements, dataset, model) {
            let entity = match result {
                Ok(entity) => entity,
                Err(ReconstructError::UnknownSchema { entity_id }) => {
                    warn!(entity = %entity_id, dataset = %dataset.name, "Skipping entity without a known schema");
                    skipped += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let canonical = resolver.canonicalize(&entity.id);
            match folded.get_mut(&canonical) {
                Some(existing) => existing.merge(&entity, model),
                None => {
                    let mut entity = entity;
                    entity.id = canonical.clone();
                    folded.insert(canonical, entity);
                }
            }
        }
        let view = Self::from_entities(&dataset.name, folded.into_values());
        info!(
            dataset = %dataset.name,
            entities = view.len(),
            skipped,
            "Built dataset view"
        );
        Ok(view)
    }

    pub fn from_entities(dataset: &str, entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut view = Self {
            dataset: dataset.to_string(),
            ..Self::default()
        };
        for entity in entities {
            view.insert(entity);
        }
        view
    }

    fn insert(&mut self, entity: Entity) {
        for referent in entity.referents() {
            self.referents.insert(referent.clone(), entity.id.clone());
        }
        self.entities.insert(entity.id.clone(), Arc::new(entity));
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Entity>> {
        self.entities.get(id).or_else(|| {
            self.referents
                .get(id)
                .and_then(|canonical| self.entities.get(canonical))
        })
    }

    /// Drop an entity and its referents from the view.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Entity>> {
        let entity = self.entities.remove(id)?;
        for referent in entity.referents() {
            self.referents.remove(referent);
        }
        Some(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[async_trait]
impl EntityLoader for DatasetView {
    async fn get_entity(&self, id: &str) -> Option<Arc<Entity>> {
        self.get(id).cloned()
    }

    fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Judgement;
    use crate::statement::{MemoryStatementStore, Statement};
    use crate::test_support::sample_store;

    #[tokio::test]
    async fn test_view_loads_entities() {
        let store = sample_store();
        let mut resolver = Resolver::in_memory();
        let view = DatasetView::build(
            &store,
            &Dataset::new("test"),
            &mut resolver,
            &SchemaModel::default(),
        )
        .unwrap();
        assert_eq!(view.len(), 3);
        let e1 = view.get_entity("e1").await.unwrap();
        assert_eq!(e1.get("name"), vec!["Jane Doe"]);
        assert!(view.get_entity("missing").await.is_none());
        let ids: Vec<String> = view.entities().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_view_folds_confirmed_duplicates() {
        let store = sample_store();
        let mut resolver = Resolver::in_memory();
        resolver
            .decide("e2", "e1", Judgement::Confirmed, Some(1.0))
            .unwrap();
        let view = DatasetView::build(
            &store,
            &Dataset::new("test"),
            &mut resolver,
            &SchemaModel::default(),
        )
        .unwrap();
        assert_eq!(view.len(), 2);
        let merged = view.get_entity("e2").await.unwrap();
        assert_eq!(merged.id, "e1");
        assert_eq!(
            merged.referents().iter().collect::<Vec<_>>(),
            vec!["e1", "e2"]
        );
    }

    #[test]
    fn test_unknown_schema_is_skipped() {
        let mut store = MemoryStatementStore::new();
        store.add(Statement::new("test", "x1", "Spaceship", "name", "Enterprise"));
        store.add(Statement::new("test", "p1", "Person", "name", "Jane Doe"));
        let mut resolver = Resolver::in_memory();
        let mut view = DatasetView::build(
            &store,
            &Dataset::new("test"),
            &mut resolver,
            &SchemaModel::default(),
        )
        .unwrap();
        assert_eq!(view.len(), 1);
        assert!(view.remove("p1").is_some());
        assert!(view.get("p1").is_none());
    }
}
