//! # Statement Store
//!
//! Statements are the atomic, append-only claims entities are rebuilt from.
//! The storage engine is external; the core only relies on the query ordering:
//! every statement of one entity ID is returned contiguously.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// One property claim about one entity, as published by one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub dataset: String,
    pub entity_id: String,
    #[serde(alias = "property")]
    pub prop: String,
    pub value: String,
    pub schema: String,
}

impl Statement {
    pub fn new(dataset: &str, entity_id: &str, schema: &str, prop: &str, value: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            entity_id: entity_id.to_string(),
            prop: prop.to_string(),
            value: value.to_string(),
            schema: schema.to_string(),
        }
    }
}

/// Query interface over a statement table.
pub trait StatementSource: Send + Sync {
    /// All statements of a dataset, optionally restricted to one entity.
    ///
    /// Statements sharing an entity ID must be contiguous in the result.
    fn all_statements(&self, dataset: &str, entity_id: Option<&str>) -> Result<Vec<Statement>>;

    /// Names of the datasets present in the source.
    fn datasets(&self) -> Vec<String>;
}

/// In-memory statement table keyed by dataset and entity ID.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatementStore {
    tables: BTreeMap<String, BTreeMap<String, Vec<Statement>>>,
    count: usize,
}

impl MemoryStatementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement. Statements are never updated in place.
    pub fn add(&mut self, statement: Statement) {
        self.tables
            .entry(statement.dataset.clone())
            .or_default()
            .entry(statement.entity_id.clone())
            .or_default()
            .push(statement);
        self.count += 1;
    }

    pub fn extend(&mut self, statements: impl IntoIterator<Item = Statement>) {
        for statement in statements {
            self.add(statement);
        }
    }

    /// Load statements from JSON lines, one statement object per line.
    pub fn read_jsonl(reader: impl Read) -> Result<Self> {
        let mut store = Self::new();
        for (line_no, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let statement: Statement = serde_json::from_str(&line)
                .with_context(|| format!("invalid statement on line {}", line_no + 1))?;
            store.add(statement);
        }
        Ok(store)
    }

    pub fn open_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open statements file {}", path.display()))?;
        Self::read_jsonl(file)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl StatementSource for MemoryStatementStore {
    fn all_statements(&self, dataset: &str, entity_id: Option<&str>) -> Result<Vec<Statement>> {
        let Some(table) = self.tables.get(dataset) else {
            return Ok(Vec::new());
        };
        let statements = match entity_id {
            Some(entity_id) => table.get(entity_id).cloned().unwrap_or_default(),
            None => table.values().flatten().cloned().collect(),
        };
        Ok(statements)
    }

    fn datasets(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}
