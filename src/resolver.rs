//! # Resolver
//!
//! The persistent merge-decision graph. Nodes are raw entity IDs; edges record
//! pending suggestions and confirmed or rejected judgements. Confirmed edges
//! define the canonical identity of every ID via [`IdentityDsu`].
//!
//! Rejections are hard constraints: a confirmation that would place a rejected
//! pair into one component is refused with [`ResolverError::RejectedMerge`],
//! so no rejected pair is ever merged transitively.

use crate::dsu::IdentityDsu;
use crate::persistence::{MemoryResolverStore, PersistenceError, ResolverStore};
use hashbrown::HashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

/// The state of a judged relationship between two IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    Pending,
    Confirmed,
    Rejected,
}

impl Judgement {
    /// Confirmed and rejected edges are final.
    pub fn is_decided(self) -> bool {
        !matches!(self, Judgement::Pending)
    }
}

impl fmt::Display for Judgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Judgement::Pending => f.write_str("pending"),
            Judgement::Confirmed => f.write_str("confirmed"),
            Judgement::Rejected => f.write_str("rejected"),
        }
    }
}

/// Unordered pair identity: `(a, b)` and `(b, a)` share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub left: String,
    pub right: String,
}

impl EdgeKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                left: a.to_string(),
                right: b.to_string(),
            }
        } else {
            Self {
                left: b.to_string(),
                right: a.to_string(),
            }
        }
    }
}

/// A judged relationship between two entity IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub left: String,
    pub right: String,
    pub judgement: Judgement,
    /// Confidence for pending and confirmed edges.
    #[serde(default)]
    pub score: Option<f64>,
    /// Unix timestamp (seconds) of the last suggestion or decision.
    pub timestamp: i64,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.left, &self.right)
    }
}

/// Errors raised by the resolver.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("cannot judge an entity against itself: {0}")]
    SelfPair(String),

    #[error("edge {left} / {right} is already {judgement}")]
    AlreadyDecided {
        left: String,
        right: String,
        judgement: Judgement,
    },

    #[error("cannot merge {left} and {right}: {blocked_left} / {blocked_right} was rejected")]
    RejectedMerge {
        left: String,
        right: String,
        blocked_left: String,
        blocked_right: String,
    },

    #[error("cannot reject {left} / {right}: both are already merged into {canonical}")]
    AlreadyMerged {
        left: String,
        right: String,
        canonical: String,
    },

    #[error("inconsistent resolver state: {0}")]
    Inconsistent(String),

    #[error("failed to persist resolver state")]
    Persistence(#[from] PersistenceError),
}

/// Retention policy applied by [`Resolver::prune`] to pending edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrunePolicy {
    /// Pending edges scoring below this are dropped.
    pub min_score: f64,
    /// Pending edges not re-suggested within this horizon are dropped.
    pub retention: Option<Duration>,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            retention: None,
        }
    }
}

/// The merge-decision graph and its canonical identity index.
pub struct Resolver {
    edges: HashMap<EdgeKey, Edge>,
    /// Rejected counterparts per ID, for merge blocking
    rejections: FxHashMap<String, FxHashSet<String>>,
    dsu: IdentityDsu,
    policy: PrunePolicy,
    store: Box<dyn ResolverStore>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("edges", &self.edges.len())
            .field("policy", &self.policy)
            .field("store", &self.store.describe())
            .finish()
    }
}

impl Resolver {
    /// Resolver with a throwaway in-memory store.
    pub fn in_memory() -> Self {
        Self::empty(Box::new(MemoryResolverStore::new()))
    }

    fn empty(store: Box<dyn ResolverStore>) -> Self {
        Self {
            edges: HashMap::new(),
            rejections: FxHashMap::default(),
            dsu: IdentityDsu::new(),
            policy: PrunePolicy::default(),
            store,
        }
    }

    /// Load the last saved edge set from `store`.
    pub fn load(store: Box<dyn ResolverStore>) -> Result<Self, ResolverError> {
        let mut edges = store.load()?;
        let mut resolver = Self::empty(store);

        // Confirmed edges first and in key order, so rebuilt components do not
        // depend on the storage order.
        edges.sort_by(|a, b| {
            let rank = |edge: &Edge| match edge.judgement {
                Judgement::Confirmed => 0,
                Judgement::Rejected => 1,
                Judgement::Pending => 2,
            };
            rank(a).cmp(&rank(b)).then_with(|| a.key().cmp(&b.key()))
        });

        for edge in edges {
            if edge.left == edge.right {
                return Err(ResolverError::Inconsistent(format!(
                    "self edge on {}",
                    edge.left
                )));
            }
            match edge.judgement {
                Judgement::Confirmed => {
                    resolver.dsu.union(&edge.left, &edge.right);
                }
                Judgement::Rejected => {
                    if resolver.dsu.same_component(&edge.left, &edge.right) {
                        return Err(ResolverError::Inconsistent(format!(
                            "rejected pair {} / {} is connected by confirmed edges",
                            edge.left, edge.right
                        )));
                    }
                    resolver.index_rejection(&edge.left, &edge.right);
                }
                Judgement::Pending => {}
            }
            resolver.edges.insert(edge.key(), edge);
        }

        info!(
            edges = resolver.edges.len(),
            components = resolver.dsu.num_components(),
            store = %resolver.store.describe(),
            "Loaded resolver"
        );
        Ok(resolver)
    }

    pub fn with_policy(mut self, policy: PrunePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PrunePolicy {
        self.policy
    }

    /// Canonical ID of the confirmed component containing `id`.
    pub fn canonicalize(&mut self, id: &str) -> String {
        self.dsu.canonical(id)
    }

    /// All IDs known to be the same entity as `id`, including itself.
    pub fn connected(&mut self, id: &str) -> Vec<String> {
        self.dsu.members(id)
    }

    /// Canonical groups of every ID with a confirmed edge.
    pub fn components(&self) -> Vec<(String, Vec<String>)> {
        self.dsu.components()
    }

    /// Canonical ID of every component with at least one confirmed edge.
    pub fn canonical_ids(&self) -> Vec<String> {
        self.dsu
            .components()
            .into_iter()
            .map(|(canonical, _)| canonical)
            .collect()
    }

    pub fn get_edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    pub fn get_judgement(&self, a: &str, b: &str) -> Option<Judgement> {
        self.get_edge(a, b).map(|edge| edge.judgement)
    }

    /// Every edge, sorted by pair.
    pub fn edges(&self) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.values().collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether `(a, b)` is a new candidate worth scoring.
    ///
    /// False if any edge already joins the pair, if both are already the same
    /// entity, or if a rejection separates their components.
    pub fn check_candidate(&mut self, a: &str, b: &str) -> bool {
        if a == b || self.edges.contains_key(&EdgeKey::new(a, b)) {
            return false;
        }
        if self.dsu.same_component(a, b) {
            return false;
        }
        self.find_rejection_between(a, b).is_none()
    }

    /// Record a merge suggestion as a pending edge, keeping the higher score.
    ///
    /// Decided edges are left untouched. Returns the edge as stored.
    pub fn suggest(&mut self, a: &str, b: &str, score: f64) -> Result<Edge, ResolverError> {
        if a == b {
            return Err(ResolverError::SelfPair(a.to_string()));
        }
        let now = unix_now();
        let key = EdgeKey::new(a, b);
        let edge = self.edges.entry(key).or_insert_with_key(|key| Edge {
            left: key.left.clone(),
            right: key.right.clone(),
            judgement: Judgement::Pending,
            score: None,
            timestamp: now,
        });
        if edge.judgement.is_decided() {
            debug!(left = %edge.left, right = %edge.right, judgement = %edge.judgement, "Suggestion for decided pair ignored");
        } else {
            edge.score = Some(edge.score.map_or(score, |old| old.max(score)));
            edge.timestamp = now;
        }
        Ok(edge.clone())
    }

    /// Record an external decision on a pair.
    ///
    /// Confirmed and rejected edges are final; repeating the same decision
    /// is a no-op, changing it is an error.
    pub fn decide(
        &mut self,
        a: &str,
        b: &str,
        judgement: Judgement,
        score: Option<f64>,
    ) -> Result<(), ResolverError> {
        if a == b {
            return Err(ResolverError::SelfPair(a.to_string()));
        }
        let key = EdgeKey::new(a, b);
        if let Some(existing) = self.edges.get(&key) {
            if existing.judgement.is_decided() {
                if existing.judgement == judgement {
                    return Ok(());
                }
                return Err(ResolverError::AlreadyDecided {
                    left: key.left,
                    right: key.right,
                    judgement: existing.judgement,
                });
            }
        }

        match judgement {
            Judgement::Pending => return self.suggest(a, b, score.unwrap_or(0.0)).map(|_| ()),
            Judgement::Confirmed => {
                if let Some((blocked_left, blocked_right)) = self.find_rejection_between(a, b) {
                    return Err(ResolverError::RejectedMerge {
                        left: key.left,
                        right: key.right,
                        blocked_left,
                        blocked_right,
                    });
                }
                let canonical = self.dsu.union(a, b);
                debug!(left = %key.left, right = %key.right, canonical = %canonical, "Confirmed merge");
            }
            Judgement::Rejected => {
                if self.dsu.same_component(a, b) {
                    return Err(ResolverError::AlreadyMerged {
                        left: key.left,
                        right: key.right,
                        canonical: self.dsu.canonical(a),
                    });
                }
                self.index_rejection(a, b);
            }
        }

        let score = match judgement {
            Judgement::Rejected => None,
            _ => score.or_else(|| self.edges.get(&key).and_then(|edge| edge.score)),
        };
        let edge = Edge {
            left: key.left.clone(),
            right: key.right.clone(),
            judgement,
            score,
            timestamp: unix_now(),
        };
        self.edges.insert(key, edge);
        Ok(())
    }

    /// Drop pending edges that fail the retention policy.
    ///
    /// Returns the number of edges removed.
    pub fn prune(&mut self) -> usize {
        self.prune_at(unix_now())
    }

    /// [`Resolver::prune`] against an explicit clock.
    pub fn prune_at(&mut self, now: i64) -> usize {
        let policy = self.policy;
        let horizon = policy
            .retention
            .map(|retention| now.saturating_sub(retention.as_secs() as i64));
        let before = self.edges.len();
        self.edges.retain(|_, edge| {
            if edge.judgement.is_decided() {
                return true;
            }
            if edge.score.unwrap_or(0.0) < policy.min_score {
                return false;
            }
            match horizon {
                Some(horizon) => edge.timestamp >= horizon,
                None => true,
            }
        });
        let removed = before - self.edges.len();
        if removed > 0 {
            info!(removed, remaining = self.edges.len(), "Pruned pending edges");
        }
        removed
    }

    /// Persist the full edge set. Either everything is written or nothing is.
    pub fn save(&self) -> Result<(), ResolverError> {
        let mut edges: Vec<Edge> = self.edges.values().cloned().collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        self.store.save(&edges)?;
        info!(edges = edges.len(), store = %self.store.describe(), "Saved resolver");
        Ok(())
    }

    fn index_rejection(&mut self, a: &str, b: &str) {
        self.rejections
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.rejections
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    /// A rejected pair with one member in each of the components of `a` and `b`.
    fn find_rejection_between(&mut self, a: &str, b: &str) -> Option<(String, String)> {
        if self.rejections.is_empty() {
            return None;
        }
        let members_a = self.dsu.members(a);
        let members_b = self.dsu.members(b);
        let (smaller, other) = if members_a.len() <= members_b.len() {
            (members_a, b)
        } else {
            (members_b, a)
        };
        let other_canonical = self.dsu.canonical(other);
        for member in smaller {
            let Some(rejected) = self.rejections.get(&member).cloned() else {
                continue;
            };
            for counterpart in rejected {
                if self.dsu.canonical(&counterpart) == other_canonical {
                    return Some((member.clone(), counterpart));
                }
            }
        }
        None
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
