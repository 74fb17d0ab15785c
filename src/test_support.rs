//! Builders for sample datasets used by tests and benches.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::dataset::Dataset;
use crate::entity::{reconstruct, Entity};
use crate::schema::SchemaModel;
use crate::statement::{MemoryStatementStore, Statement};

pub const SAMPLE_DATASET: &str = "test";

pub fn stmt(id: &str, schema: &str, prop: &str, value: &str) -> Statement {
    Statement::new(SAMPLE_DATASET, id, schema, prop, value)
}

/// Reconstruct one entity of the built-in model from `(prop, value)` pairs.
pub fn entity(id: &str, schema: &str, props: &[(&str, &str)]) -> Entity {
    let run: Vec<Statement> = props
        .iter()
        .map(|(prop, value)| stmt(id, schema, prop, value))
        .collect();
    let model = SchemaModel::default();
    if run.is_empty() {
        return Entity::new(id, Arc::clone(model.require(schema).expect("known schema")));
    }
    reconstruct(&run, &Dataset::new(SAMPLE_DATASET), &model).expect("valid sample entity")
}

fn sample_statements() -> Vec<Statement> {
    vec![
        stmt("e1", "Person", "name", "Jane Doe"),
        stmt("e1", "Person", "birthDate", "1967-12-21"),
        stmt("e2", "Person", "name", "Jane Doe"),
        stmt("e2", "Person", "birthDate", "1967-12-21"),
        stmt("e3", "Person", "name", "John Smith"),
    ]
}

/// Two identical records of Jane Doe (e1, e2) and one of John Smith (e3).
pub fn sample_store() -> MemoryStatementStore {
    let mut store = MemoryStatementStore::new();
    store.extend(sample_statements());
    store
}

pub fn sample_entities() -> Vec<Arc<Entity>> {
    vec![
        Arc::new(entity("e1", "Person", &[("name", "Jane Doe"), ("birthDate", "1967-12-21")])),
        Arc::new(entity("e2", "Person", &[("name", "Jane Doe"), ("birthDate", "1967-12-21")])),
        Arc::new(entity("e3", "Person", &[("name", "John Smith")])),
    ]
}

const FIRST_NAMES: &[&str] = &[
    "Anna", "Boris", "Carla", "Dmitri", "Elena", "Farid", "Gloria", "Hassan", "Irina", "Jorge",
    "Katya", "Luis", "Maria", "Nikolai", "Olga", "Pavel",
];

const LAST_NAMES: &[&str] = &[
    "Ivanova", "Petrov", "Garcia", "Okafor", "Nguyen", "Schmidt", "Haddad", "Kowalski", "Rossi",
    "Tanaka", "Silva", "Novak",
];

const COUNTRIES: &[&str] = &["ru", "ua", "de", "es", "ng", "vn", "it", "jp", "br", "pl"];

/// Random people across one dataset; about `duplicate_probability` of them
/// repeat an earlier person with a slightly different spelling.
pub fn generate_statements(count: usize, duplicate_probability: f64, seed: u64) -> Vec<Statement> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut people: Vec<(String, String, String)> = Vec::with_capacity(count);
    let mut statements = Vec::with_capacity(count * 3);

    for i in 0..count {
        let (name, birth_date, country) = if !people.is_empty() && rng.random_bool(duplicate_probability) {
            let (name, birth_date, country) = people[rng.random_range(0..people.len())].clone();
            (format!(" {}", name.to_uppercase()), birth_date, country)
        } else {
            let first = FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.random_range(0..LAST_NAMES.len())];
            let birth_date = format!(
                "{}-{:02}-{:02}",
                rng.random_range(1940..2000),
                rng.random_range(1..=12),
                rng.random_range(1..=28)
            );
            let country = COUNTRIES[rng.random_range(0..COUNTRIES.len())].to_string();
            (format!("{} {}", first, last), birth_date, country)
        };
        people.push((name.clone(), birth_date.clone(), country.clone()));

        let id = format!("p{:07}", i);
        statements.push(stmt(&id, "Person", "name", &name));
        statements.push(stmt(&id, "Person", "birthDate", &birth_date));
        statements.push(stmt(&id, "Person", "nationality", &country));
    }
    statements
}

pub fn generate_entities(count: usize, duplicate_probability: f64, seed: u64) -> Vec<Arc<Entity>> {
    let model = SchemaModel::default();
    let dataset = Dataset::new(SAMPLE_DATASET);
    let statements = generate_statements(count, duplicate_probability, seed);
    statements
        .chunks(3)
        .map(|run| Arc::new(reconstruct(run, &dataset, &model).expect("generated entity")))
        .collect()
}
