//! # Entity Reconstruction
//!
//! Rebuilds typed entities from runs of statements. Bad values are dropped and
//! logged one by one; a run as a whole only fails when the caller breaks the
//! run contract (empty or mixed-ID input).

use crate::cleaning::clean;
use crate::dataset::Dataset;
use crate::schema::{Schema, SchemaError, SchemaModel};
use crate::statement::Statement;
use std::collections::{BTreeMap, BTreeSet};
use std::iter::Peekable;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Caller contract violations during reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructError {
    #[error("cannot reconstruct an entity from an empty statement run")]
    EmptyRun,

    #[error("statement run for {expected} contains a statement for {found}")]
    MixedRun { expected: String, found: String },

    #[error("no statement of entity {entity_id} declares a known schema")]
    UnknownSchema { entity_id: String },
}

/// Reasons a single property value cannot be attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("schema {schema} has no property {prop}")]
    UnknownProperty { schema: String, prop: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// An entity rebuilt from statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    schema: Arc<Schema>,
    properties: BTreeMap<String, BTreeSet<String>>,
    datasets: BTreeSet<String>,
    referents: BTreeSet<String>,
}

impl Entity {
    pub fn new(id: &str, schema: Arc<Schema>) -> Self {
        let mut referents = BTreeSet::new();
        referents.insert(id.to_string());
        Self {
            id: id.to_string(),
            schema,
            properties: BTreeMap::new(),
            datasets: BTreeSet::new(),
            referents,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn properties(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.properties
    }

    /// Values of one property, in sorted order.
    pub fn get(&self, prop: &str) -> Vec<&str> {
        self.properties
            .get(prop)
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn first(&self, prop: &str) -> Option<&str> {
        self.properties
            .get(prop)
            .and_then(|values| values.iter().next())
            .map(String::as_str)
    }

    /// Datasets that contributed statements to this entity.
    pub fn datasets(&self) -> &BTreeSet<String> {
        &self.datasets
    }

    /// Raw entity IDs folded into this entity.
    pub fn referents(&self) -> &BTreeSet<String> {
        &self.referents
    }

    pub fn add_dataset(&mut self, dataset: &str) {
        self.datasets.insert(dataset.to_string());
    }

    /// Make the entity's schema more specific. Fails on unrelated schemata.
    pub fn add_schema(&mut self, schema: &Arc<Schema>, model: &SchemaModel) -> Result<(), SchemaError> {
        self.schema = model.common_schema(&self.schema, schema)?;
        Ok(())
    }

    /// Add a value for a property the current schema declares.
    ///
    /// Returns the number of values stored after lookups and cleaning.
    pub fn add(&mut self, prop: &str, raw: &str, dataset: &Dataset) -> Result<usize, ValueError> {
        let schema = Arc::clone(&self.schema);
        self.add_with_schema(schema, prop, raw, dataset)
    }

    /// Add a value declared under `schema`, moving the entity to the more
    /// specific of its current schema and `schema` (e.g. a `Person` statement
    /// turns a `LegalEntity` into a `Person`).
    ///
    /// Values declared under an unrelated schema are refused. The schema only
    /// changes if at least one cleaned value is stored.
    pub fn add_cast(
        &mut self,
        model: &SchemaModel,
        schema: &str,
        prop: &str,
        raw: &str,
        dataset: &Dataset,
    ) -> Result<usize, ValueError> {
        let declared = model.require(schema)?;
        let target = model.common_schema(&self.schema, declared)?;
        self.add_with_schema(target, prop, raw, dataset)
    }

    fn add_with_schema(
        &mut self,
        target: Arc<Schema>,
        prop: &str,
        raw: &str,
        dataset: &Dataset,
    ) -> Result<usize, ValueError> {
        let Some(property) = target.property(prop) else {
            return Err(ValueError::UnknownProperty {
                schema: target.name.clone(),
                prop: prop.to_string(),
            });
        };

        let mut cleaned = Vec::new();
        for value in dataset.lookup_values(property.kind, raw) {
            match clean(property.kind, &value) {
                Some(value) => cleaned.push(value),
                None => warn!(
                    entity = %self.id,
                    prop = prop,
                    value = %value,
                    "Rejected property value"
                ),
            }
        }
        if cleaned.is_empty() {
            return Ok(0);
        }

        self.schema = target;
        let values = self.properties.entry(prop.to_string()).or_default();
        let mut stored = 0;
        for value in cleaned {
            if values.insert(value) {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Fold another entity's claims into this one.
    ///
    /// If the schemata are unrelated the current schema is kept and only
    /// properties it declares are copied.
    pub fn merge(&mut self, other: &Entity, model: &SchemaModel) {
        match model.common_schema(&self.schema, &other.schema) {
            Ok(schema) => self.schema = schema,
            Err(err) => warn!(
                entity = %self.id,
                other = %other.id,
                error = %err,
                "Merging entities with unrelated schemata"
            ),
        }
        for (prop, values) in &other.properties {
            if !self.schema.has_property(prop) {
                continue;
            }
            self.properties
                .entry(prop.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        self.datasets.extend(other.datasets.iter().cloned());
        self.referents.extend(other.referents.iter().cloned());
    }
}

/// Rebuild one entity from a non-empty run of statements sharing an ID.
pub fn reconstruct(
    run: &[Statement],
    dataset: &Dataset,
    model: &SchemaModel,
) -> Result<Entity, ReconstructError> {
    let first = run.first().ok_or(ReconstructError::EmptyRun)?;
    let entity_id = first.entity_id.as_str();
    if let Some(stray) = run.iter().find(|stmt| stmt.entity_id != entity_id) {
        return Err(ReconstructError::MixedRun {
            expected: entity_id.to_string(),
            found: stray.entity_id.clone(),
        });
    }

    let schema = run
        .iter()
        .find_map(|stmt| model.get(&stmt.schema))
        .ok_or_else(|| ReconstructError::UnknownSchema {
            entity_id: entity_id.to_string(),
        })?;

    let mut entity = Entity::new(entity_id, Arc::clone(schema));
    for stmt in run {
        entity.add_dataset(&stmt.dataset);
        if let Err(err) = entity.add_cast(model, &stmt.schema, &stmt.prop, &stmt.value, dataset) {
            warn!(
                entity = %entity_id,
                prop = %stmt.prop,
                value = %stmt.value,
                schema = %stmt.schema,
                error = %err,
                "Rejected property value"
            );
        }
    }
    Ok(entity)
}

/// Groups an ordered statement stream into entities, one per contiguous run.
pub struct EntityQuery<'a, I: Iterator<Item = Statement>> {
    statements: Peekable<I>,
    dataset: &'a Dataset,
    model: &'a SchemaModel,
}

impl<'a, I: Iterator<Item = Statement>> EntityQuery<'a, I> {
    pub fn new(
        statements: impl IntoIterator<Item = Statement, IntoIter = I>,
        dataset: &'a Dataset,
        model: &'a SchemaModel,
    ) -> Self {
        Self {
            statements: statements.into_iter().peekable(),
            dataset,
            model,
        }
    }
}

impl<'a, I: Iterator<Item = Statement>> Iterator for EntityQuery<'a, I> {
    type Item = Result<Entity, ReconstructError>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.statements.next()?;
        let entity_id = first.entity_id.clone();
        let mut run = vec![first];
        while let Some(next) = self.statements.next_if(|stmt| stmt.entity_id == entity_id) {
            run.push(next);
        }
        Some(reconstruct(&run, self.dataset, self.model))
    }
}
