//! # entity-xref
//!
//! Statement-based entity resolution for a sanctions and risk data graph.
//!
//! Entities are rebuilt from atomic statements, candidate duplicates are found
//! through a blocking index, and every merge decision lives in a persistent
//! resolver graph that maps raw entity IDs to canonical IDs.

pub mod cleaning;
pub mod config;
pub mod dataset;
pub mod dsu;
pub mod entity;
pub mod index;
pub mod persistence;
pub mod resolver;
pub mod schema;
pub mod statement;
pub mod test_support;
pub mod view;
pub mod xref;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, XrefConfig};
pub use dataset::{Dataset, Lookup, LookupOption};
pub use entity::{reconstruct, Entity, EntityQuery, ReconstructError};
pub use index::{BlockingIndex, CandidatePair, IndexOptions, PairScorer};
pub use persistence::{
    FileResolverStore, MemoryResolverStore, PersistenceError, ResolverStore, RocksResolverStore,
};
pub use resolver::{Edge, Judgement, PrunePolicy, Resolver, ResolverError};
pub use schema::{PropertyType, Schema, SchemaError, SchemaModel};
pub use statement::{MemoryStatementStore, Statement, StatementSource};
pub use view::{DatasetView, EntityLoader};
pub use xref::{XrefOptions, XrefSummary};
