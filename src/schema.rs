//! # Schema Module
//!
//! Defines the entity type lattice used during reconstruction and matching.
//! Schemata form a DAG through `extends`; a property belongs to the schema that
//! declares it and is inherited by every descendant.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by schema resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("schemata {left} and {right} are unrelated")]
    Unrelated { left: String, right: String },

    #[error("schema {schema} extends unknown schema {parent}")]
    UnknownParent { schema: String, parent: String },

    #[error("schema inheritance cycle through {0}")]
    Cycle(String),

    #[error("invalid schema definition: {0}")]
    Invalid(String),
}

/// The value type of a property. Drives cleaning and index tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Name,
    Text,
    Date,
    Identifier,
    Country,
    Email,
    Phone,
    Url,
    Entity,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PropertyType::Name => "name",
            PropertyType::Text => "text",
            PropertyType::Date => "date",
            PropertyType::Identifier => "identifier",
            PropertyType::Country => "country",
            PropertyType::Email => "email",
            PropertyType::Phone => "phone",
            PropertyType::Url => "url",
            PropertyType::Entity => "entity",
        };
        f.write_str(label)
    }
}

/// A property as declared in a schema definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PropertyType,
}

impl PropertySpec {
    pub fn new(name: &str, kind: PropertyType) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// A schema as written in a model definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub matchable: bool,
}

/// A resolved property, including the schema that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyType,
    pub owner: String,
}

/// A resolved schema with its inherited properties and ancestry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub extends: Vec<String>,
    pub matchable: bool,
    ancestors: BTreeSet<String>,
    properties: BTreeMap<String, Property>,
    matchable_schemata: BTreeSet<String>,
}

impl Schema {
    /// Property definition, own or inherited.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// True if this schema is `other` or descends from it.
    pub fn is_a(&self, other: &str) -> bool {
        self.ancestors.contains(other)
    }

    /// Every ancestor, including the schema itself.
    pub fn ancestors(&self) -> &BTreeSet<String> {
        &self.ancestors
    }

    /// Schemata whose entities may be compared against this one.
    pub fn matchable_schemata(&self) -> &BTreeSet<String> {
        &self.matchable_schemata
    }

    /// Symmetric matchability gate used before scoring a candidate pair.
    pub fn can_match(&self, other: &Schema) -> bool {
        self.matchable_schemata.contains(&other.name)
            || other.matchable_schemata.contains(&self.name)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The complete schema lattice.
#[derive(Debug, Clone)]
pub struct SchemaModel {
    schemata: BTreeMap<String, Arc<Schema>>,
}

impl SchemaModel {
    /// Resolve a set of schema definitions into a model.
    pub fn from_specs(specs: Vec<SchemaSpec>) -> Result<Self, SchemaError> {
        let mut by_name: BTreeMap<String, SchemaSpec> = BTreeMap::new();
        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(SchemaError::Invalid("schema without a name".to_string()));
            }
            if by_name.contains_key(&spec.name) {
                return Err(SchemaError::Invalid(format!(
                    "schema {} defined twice",
                    spec.name
                )));
            }
            by_name.insert(spec.name.clone(), spec);
        }

        for spec in by_name.values() {
            for parent in &spec.extends {
                if !by_name.contains_key(parent) {
                    return Err(SchemaError::UnknownParent {
                        schema: spec.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let mut ancestry: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in by_name.keys() {
            let mut visiting = BTreeSet::new();
            collect_ancestors(name, &by_name, &mut ancestry, &mut visiting)?;
        }

        let mut resolved: BTreeMap<String, Schema> = BTreeMap::new();
        for (name, spec) in &by_name {
            let ancestors = ancestry.get(name).cloned().unwrap_or_default();
            let mut properties = BTreeMap::new();
            for ancestor in &ancestors {
                for prop in &by_name[ancestor].properties {
                    let entry = properties
                        .entry(prop.name.clone())
                        .or_insert_with(|| Property {
                            name: prop.name.clone(),
                            kind: prop.kind,
                            owner: ancestor.clone(),
                        });
                    if entry.kind != prop.kind {
                        return Err(SchemaError::Invalid(format!(
                            "property {} redeclared with type {} on {}",
                            prop.name, prop.kind, ancestor
                        )));
                    }
                }
            }
            resolved.insert(
                name.clone(),
                Schema {
                    name: name.clone(),
                    extends: spec.extends.clone(),
                    matchable: spec.matchable,
                    ancestors,
                    properties,
                    matchable_schemata: BTreeSet::new(),
                },
            );
        }

        // A matchable schema matches its matchable ancestors and descendants.
        let names: Vec<String> = resolved.keys().cloned().collect();
        for name in &names {
            if !resolved[name].matchable {
                continue;
            }
            let mut matchable = BTreeSet::new();
            for other in &names {
                let candidate = &resolved[other];
                if !candidate.matchable {
                    continue;
                }
                if candidate.is_a(name) || resolved[name].is_a(other) {
                    matchable.insert(other.clone());
                }
            }
            if let Some(schema) = resolved.get_mut(name) {
                schema.matchable_schemata = matchable;
            }
        }

        Ok(Self {
            schemata: resolved
                .into_iter()
                .map(|(name, schema)| (name, Arc::new(schema)))
                .collect(),
        })
    }

    /// Load a model from a JSON array of schema definitions.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let specs: Vec<SchemaSpec> = serde_json::from_str(&raw)?;
        Ok(Self::from_specs(specs)?)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemata.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<Schema>, SchemaError> {
        self.schemata
            .get(name)
            .ok_or_else(|| SchemaError::UnknownSchema(name.to_string()))
    }

    pub fn schemata(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemata.values()
    }

    /// Join two schemata: the more specific one when they lie on one branch.
    ///
    /// Schemata on different branches (e.g. `Person` and `Company`) fail with
    /// [`SchemaError::Unrelated`]; no branch is ever picked arbitrarily.
    pub fn common_schema(
        &self,
        left: &Arc<Schema>,
        right: &Arc<Schema>,
    ) -> Result<Arc<Schema>, SchemaError> {
        if left.is_a(&right.name) {
            return Ok(Arc::clone(left));
        }
        if right.is_a(&left.name) {
            return Ok(Arc::clone(right));
        }
        Err(SchemaError::Unrelated {
            left: left.name.clone(),
            right: right.name.clone(),
        })
    }

    /// Name-based variant of [`SchemaModel::common_schema`].
    pub fn common_schema_by_name(
        &self,
        left: &str,
        right: &str,
    ) -> Result<Arc<Schema>, SchemaError> {
        let left = self.require(left)?;
        let right = self.require(right)?;
        self.common_schema(left, right)
    }
}

fn collect_ancestors(
    name: &str,
    specs: &BTreeMap<String, SchemaSpec>,
    ancestry: &mut BTreeMap<String, BTreeSet<String>>,
    visiting: &mut BTreeSet<String>,
) -> Result<BTreeSet<String>, SchemaError> {
    if let Some(done) = ancestry.get(name) {
        return Ok(done.clone());
    }
    if !visiting.insert(name.to_string()) {
        return Err(SchemaError::Cycle(name.to_string()));
    }
    let mut ancestors = BTreeSet::new();
    ancestors.insert(name.to_string());
    for parent in &specs[name].extends {
        ancestors.extend(collect_ancestors(parent, specs, ancestry, visiting)?);
    }
    visiting.remove(name);
    ancestry.insert(name.to_string(), ancestors.clone());
    Ok(ancestors)
}

impl Default for SchemaModel {
    /// Compact sanctions ontology covering people, organizations and vessels.
    fn default() -> Self {
        use PropertyType::*;

        fn schema(
            name: &str,
            extends: &[&str],
            matchable: bool,
            props: &[(&str, PropertyType)],
        ) -> SchemaSpec {
            SchemaSpec {
                name: name.to_string(),
                extends: extends.iter().map(|s| s.to_string()).collect(),
                properties: props
                    .iter()
                    .map(|(prop, kind)| PropertySpec::new(prop, *kind))
                    .collect(),
                matchable,
            }
        }

        let specs = vec![
            schema(
                "Thing",
                &[],
                false,
                &[
                    ("name", Name),
                    ("alias", Name),
                    ("previousName", Name),
                    ("weakAlias", Name),
                    ("country", Country),
                    ("notes", Text),
                    ("summary", Text),
                    ("topics", Text),
                    ("sourceUrl", Url),
                ],
            ),
            schema(
                "LegalEntity",
                &["Thing"],
                true,
                &[
                    ("email", Email),
                    ("phone", Phone),
                    ("website", Url),
                    ("address", Text),
                    ("registrationNumber", Identifier),
                    ("idNumber", Identifier),
                    ("taxNumber", Identifier),
                    ("jurisdiction", Country),
                    ("mainCountry", Country),
                    ("incorporationDate", Date),
                    ("dissolutionDate", Date),
                ],
            ),
            schema(
                "Person",
                &["LegalEntity"],
                true,
                &[
                    ("firstName", Name),
                    ("lastName", Name),
                    ("fatherName", Name),
                    ("birthDate", Date),
                    ("deathDate", Date),
                    ("birthPlace", Text),
                    ("nationality", Country),
                    ("gender", Text),
                    ("position", Text),
                    ("passportNumber", Identifier),
                ],
            ),
            schema("Organization", &["LegalEntity"], true, &[("sector", Text)]),
            schema(
                "Company",
                &["Organization"],
                true,
                &[("ogrnCode", Identifier), ("capital", Text)],
            ),
            schema("PublicBody", &["Organization"], true, &[]),
            schema(
                "Vessel",
                &["Thing"],
                true,
                &[
                    ("imoNumber", Identifier),
                    ("mmsi", Identifier),
                    ("flag", Country),
                    ("buildDate", Date),
                    ("owner", Entity),
                ],
            ),
            schema(
                "Address",
                &["Thing"],
                false,
                &[("full", Text), ("city", Text), ("postalCode", Identifier)],
            ),
        ];

        Self::from_specs(specs).expect("built-in schema model")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherited_properties_keep_owner() {
        let model = SchemaModel::default();
        let person = model.require("Person").unwrap();
        assert_eq!(person.property("name").unwrap().owner, "Thing");
        assert_eq!(person.property("birthDate").unwrap().owner, "Person");
        assert_eq!(person.property("birthDate").unwrap().kind, PropertyType::Date);
        assert!(!model.require("Company").unwrap().has_property("birthDate"));
    }

    #[test]
    fn test_common_schema_picks_more_specific() {
        let model = SchemaModel::default();
        let joined = model.common_schema_by_name("LegalEntity", "Person").unwrap();
        assert_eq!(joined.name, "Person");
        let joined = model.common_schema_by_name("Company", "LegalEntity").unwrap();
        assert_eq!(joined.name, "Company");
        let joined = model.common_schema_by_name("Person", "Person").unwrap();
        assert_eq!(joined.name, "Person");
    }

    #[test]
    fn test_common_schema_rejects_siblings() {
        let model = SchemaModel::default();
        let err = model.common_schema_by_name("Company", "Person").unwrap_err();
        assert!(matches!(err, SchemaError::Unrelated { .. }));
    }

    #[test]
    fn test_matchable_schemata() {
        let model = SchemaModel::default();
        let person = model.require("Person").unwrap();
        let company = model.require("Company").unwrap();
        let legal = model.require("LegalEntity").unwrap();
        let vessel = model.require("Vessel").unwrap();

        assert!(person.matchable_schemata().contains("LegalEntity"));
        assert!(!person.matchable_schemata().contains("Company"));
        assert!(person.can_match(legal));
        assert!(company.can_match(legal));
        assert!(!person.can_match(company));
        assert!(!vessel.can_match(person));
        assert!(model.require("Thing").unwrap().matchable_schemata().is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let specs = vec![
            SchemaSpec {
                name: "A".to_string(),
                extends: vec!["B".to_string()],
                properties: vec![],
                matchable: true,
            },
            SchemaSpec {
                name: "B".to_string(),
                extends: vec!["A".to_string()],
                properties: vec![],
                matchable: true,
            },
        ];
        assert!(matches!(
            SchemaModel::from_specs(specs),
            Err(SchemaError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_parent() {
        let specs = vec![SchemaSpec {
            name: "A".to_string(),
            extends: vec!["Missing".to_string()],
            properties: vec![],
            matchable: false,
        }];
        assert!(matches!(
            SchemaModel::from_specs(specs),
            Err(SchemaError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_spec_serde() {
        let raw = r#"[{"name": "Thing", "properties": [{"name": "name", "type": "name"}]},
                      {"name": "Person", "extends": ["Thing"], "matchable": true,
                       "properties": [{"name": "birthDate", "type": "date"}]}]"#;
        let specs: Vec<SchemaSpec> = serde_json::from_str(raw).unwrap();
        let model = SchemaModel::from_specs(specs).unwrap();
        assert!(model.require("Person").unwrap().has_property("name"));
    }
}
