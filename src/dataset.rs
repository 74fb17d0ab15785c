//! Source datasets and their value lookups.
//!
//! Lookups rewrite known aliases and variants of raw values before cleaning.
//! They are keyed by property type and compiled when configuration is loaded.

use crate::cleaning::{collapse_spaces, hash_id, slugify};
use crate::schema::PropertyType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One lookup rule: every `match` variant maps to the given replacement values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupOption {
    #[serde(rename = "match")]
    pub matches: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LookupOption {
    fn replacements(&self) -> Vec<String> {
        let mut out: Vec<String> = self.value.iter().cloned().collect();
        out.extend(self.values.iter().cloned());
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LookupSpec {
    #[serde(default)]
    options: Vec<LookupOption>,
}

/// Compiled lookup table from normalized raw value to replacement values.
///
/// An option without replacements drops the matched value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LookupSpec", into = "LookupSpec")]
pub struct Lookup {
    options: Vec<LookupOption>,
    table: HashMap<String, Vec<String>>,
}

impl From<LookupSpec> for Lookup {
    fn from(spec: LookupSpec) -> Self {
        Self::new(spec.options)
    }
}

impl From<Lookup> for LookupSpec {
    fn from(lookup: Lookup) -> Self {
        LookupSpec {
            options: lookup.options,
        }
    }
}

impl Lookup {
    pub fn new(options: Vec<LookupOption>) -> Self {
        let mut table = HashMap::new();
        for option in &options {
            let replacements = option.replacements();
            for variant in &option.matches {
                table.insert(normalize_key(variant), replacements.clone());
            }
        }
        Self { options, table }
    }

    /// Replacement values for a raw value, if the lookup knows it.
    pub fn get_values(&self, raw: &str) -> Option<&[String]> {
        self.table.get(&normalize_key(raw)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn normalize_key(raw: &str) -> String {
    collapse_spaces(raw).to_lowercase()
}

/// A source dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// ID prefix for entities produced by this dataset; defaults to the name.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub lookups: BTreeMap<PropertyType, Lookup>,
}

impl Dataset {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: None,
            lookups: BTreeMap::new(),
        }
    }

    pub fn with_lookup(mut self, kind: PropertyType, lookup: Lookup) -> Self {
        self.lookups.insert(kind, lookup);
        self
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.name)
    }

    /// Rewrite a raw value through the lookup for its property type.
    ///
    /// Unknown values pass through unchanged.
    pub fn lookup_values(&self, kind: PropertyType, raw: &str) -> Vec<String> {
        match self.lookups.get(&kind).and_then(|lookup| lookup.get_values(raw)) {
            Some(values) => values.to_vec(),
            None => vec![raw.to_string()],
        }
    }

    /// Readable entity ID: dataset prefix plus a slug of the parts.
    pub fn make_slug<S: AsRef<str>>(&self, parts: &[S]) -> Option<String> {
        let slug = slugify(parts)?;
        Some(format!("{}-{}", self.prefix(), slug))
    }

    /// Opaque entity ID: dataset prefix plus a hash of the parts.
    pub fn make_id<S: AsRef<str>>(&self, parts: &[S]) -> Option<String> {
        let hashed = hash_id(parts)?;
        Some(format!("{}-{}", self.prefix(), hashed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn country_lookup() -> Lookup {
        Lookup::new(vec![
            LookupOption {
                matches: vec!["Republic of Indonesia".to_string(), "RI".to_string()],
                value: Some("id".to_string()),
                values: vec![],
            },
            LookupOption {
                matches: vec!["n/a".to_string()],
                value: None,
                values: vec![],
            },
        ])
    }

    #[test]
    fn test_lookup_normalizes_keys() {
        let lookup = country_lookup();
        assert_eq!(
            lookup.get_values("  republic   of INDONESIA "),
            Some(&["id".to_string()][..])
        );
        assert_eq!(lookup.get_values("Germany"), None);
    }

    #[test]
    fn test_dataset_lookup_values() {
        let dataset = Dataset::new("id_dpr").with_lookup(PropertyType::Country, country_lookup());
        assert_eq!(dataset.lookup_values(PropertyType::Country, "RI"), vec!["id"]);
        assert!(dataset.lookup_values(PropertyType::Country, "N/A").is_empty());
        assert_eq!(
            dataset.lookup_values(PropertyType::Country, "Germany"),
            vec!["Germany"]
        );
        assert_eq!(dataset.lookup_values(PropertyType::Name, "RI"), vec!["RI"]);
    }

    #[test]
    fn test_make_ids() {
        let dataset = Dataset::new("id_dpr");
        assert_eq!(
            dataset.make_slug(&["Jane Doe"]),
            Some("id_dpr-jane-doe".to_string())
        );
        let id = dataset.make_id(&["Jane Doe"]).unwrap();
        assert!(id.starts_with("id_dpr-"));
        assert_eq!(dataset.make_id::<&str>(&[]), None);
    }

    #[test]
    fn test_lookup_deserialize() {
        let raw = r#"{"name": "id_dpr", "prefix": "id-dpr",
            "lookups": {"country": {"options": [{"match": ["RI"], "value": "id"}]}}}"#;
        let dataset: Dataset = serde_json::from_str(raw).unwrap();
        assert_eq!(dataset.prefix(), "id-dpr");
        assert_eq!(dataset.lookup_values(PropertyType::Country, "ri"), vec!["id"]);
    }
}
