use std::collections::{BTreeMap, BTreeSet};

use entity_xref::{
    FileResolverStore, Judgement, Resolver, ResolverError, ResolverStore, RocksResolverStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn exercise(resolver: &mut Resolver) -> anyhow::Result<()> {
    resolver.decide("q1", "q2", Judgement::Confirmed, Some(0.97))?;
    resolver.decide("q2", "q3", Judgement::Confirmed, None)?;
    resolver.decide("q1", "q9", Judgement::Rejected, None)?;
    resolver.suggest("q4", "q5", 0.6)?;
    resolver.save()?;
    Ok(())
}

fn check_reloaded(mut resolver: Resolver) {
    assert_eq!(resolver.len(), 4);
    assert_eq!(resolver.canonicalize("q3"), "q1");
    assert_eq!(resolver.get_judgement("q9", "q1"), Some(Judgement::Rejected));
    assert!(!resolver.check_candidate("q3", "q9"));
    assert_eq!(resolver.get_edge("q5", "q4").and_then(|edge| edge.score), Some(0.6));
}

#[test]
fn file_store_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("resolver.json");
    let mut resolver = Resolver::load(Box::new(FileResolverStore::new(&path)))?;
    exercise(&mut resolver)?;
    check_reloaded(Resolver::load(Box::new(FileResolverStore::new(&path)))?);
    Ok(())
}

#[test]
fn rocks_store_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut resolver = Resolver::load(Box::new(RocksResolverStore::open(dir.path())?))?;
        exercise(&mut resolver)?;
    }
    check_reloaded(Resolver::load(Box::new(RocksResolverStore::open(dir.path())?))?);
    Ok(())
}

#[test]
fn failed_decision_is_not_saved() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("resolver.json");
    let mut resolver = Resolver::load(Box::new(FileResolverStore::new(&path)))?;
    exercise(&mut resolver)?;
    let err = resolver
        .decide("q3", "q9", Judgement::Confirmed, None)
        .unwrap_err();
    assert!(matches!(err, ResolverError::RejectedMerge { .. }));
    resolver.save()?;

    let store = FileResolverStore::new(&path);
    assert_eq!(store.load()?.len(), 4);
    Ok(())
}

/// Random decision sequences always leave a valid partition in which no
/// rejected pair shares a component.
#[test]
fn random_decisions_keep_partition_valid() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let ids: Vec<String> = (0..40).map(|i| format!("n{:02}", i)).collect();
    let mut resolver = Resolver::in_memory();
    let mut rejected: Vec<(String, String)> = Vec::new();

    for _ in 0..400 {
        let a = &ids[rng.random_range(0..ids.len())];
        let b = &ids[rng.random_range(0..ids.len())];
        if a == b {
            continue;
        }
        let judgement = if rng.random_bool(0.3) {
            Judgement::Rejected
        } else {
            Judgement::Confirmed
        };
        if resolver.decide(a, b, judgement, None).is_ok() && judgement == Judgement::Rejected {
            rejected.push((a.clone(), b.clone()));
        }
    }

    let components = resolver.components();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut owner: BTreeMap<String, String> = BTreeMap::new();
    for (canonical, members) in &components {
        assert_eq!(Some(canonical), members.iter().min());
        for member in members {
            assert!(seen.insert(member.clone()), "{} in two components", member);
            owner.insert(member.clone(), canonical.clone());
        }
    }
    for id in &ids {
        let canonical = resolver.canonicalize(id);
        assert_eq!(&canonical, owner.get(id).unwrap_or(id));
        assert_eq!(resolver.canonicalize(&canonical), canonical);
    }
    for (a, b) in &rejected {
        assert_ne!(resolver.canonicalize(a), resolver.canonicalize(b));
        assert!(!resolver.check_candidate(a, b));
        assert!(!resolver.check_candidate(b, a));
    }
    assert_eq!(
        resolver.canonical_ids(),
        components.iter().map(|(canonical, _)| canonical.clone()).collect::<Vec<_>>()
    );
    Ok(())
}
