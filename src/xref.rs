//! # Cross-referencing
//!
//! Drives the blocking index over a dataset view and records merge
//! suggestions in the resolver.
//!
//! Entity fetches for upcoming pairs run concurrently as tokio tasks. Their
//! handles travel through a bounded channel in score order to a single
//! evaluation stage, the only code touching the resolver. The channel
//! capacity bounds the number of fetches in flight.

use crate::config::{
    DEFAULT_FETCH_CONCURRENCY, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_PROGRESS_EVERY, DEFAULT_XREF_LIMIT,
};
use crate::dataset::Dataset;
use crate::entity::Entity;
use crate::index::{BlockingIndex, CandidatePair, IndexOptions};
use crate::resolver::Resolver;
use crate::schema::SchemaModel;
use crate::statement::StatementSource;
use crate::view::{DatasetView, EntityLoader};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct XrefOptions {
    /// Suggestion budget; the run stops once it is exceeded.
    pub limit: usize,
    pub index: IndexOptions,
    /// Entity fetches allowed in flight ahead of evaluation.
    pub fetch_concurrency: usize,
    /// Time allowed to fetch both sides of a pair.
    pub fetch_timeout: Duration,
    /// Log progress every this many evaluated pairs.
    pub progress_every: usize,
}

impl Default for XrefOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_XREF_LIMIT,
            index: IndexOptions::default(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrefSummary {
    /// Candidate pairs produced by the index.
    pub candidates: usize,
    /// Pairs taken off the pipeline.
    pub evaluated: usize,
    pub suggested: usize,
    /// Pending edges removed before the run.
    pub pruned: usize,
    pub skipped_missing: usize,
    pub skipped_timeout: usize,
    pub skipped_schema: usize,
    /// Already judged, already merged, or blocked by a rejection.
    pub skipped_judged: usize,
    pub cancelled: bool,
}

enum Fetched {
    Loaded {
        pair: CandidatePair,
        left: Option<Arc<Entity>>,
        right: Option<Arc<Entity>>,
    },
    TimedOut(CandidatePair),
}

/// Cross-reference every entity of `loader` and record suggestions.
///
/// The resolver is saved exactly once at the end, also when the run stops on
/// the limit or on `cancel`. A save failure fails the run.
pub async fn run<L>(
    resolver: &mut Resolver,
    loader: Arc<L>,
    options: &XrefOptions,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<XrefSummary>
where
    L: EntityLoader + 'static,
{
    let started = Instant::now();
    let mut summary = XrefSummary {
        pruned: resolver.prune(),
        ..XrefSummary::default()
    };

    let entities = loader.entities();
    let index = BlockingIndex::build(&entities, options.index.clone());
    let pairs: Vec<CandidatePair> = index.pairs().collect();
    summary.candidates = pairs.len();
    drop(index);

    let (tx, mut rx) = mpsc::channel(options.fetch_concurrency.max(1));
    let producer = spawn_fetches(pairs, loader, options.fetch_timeout, tx);

    let mut cancel = cancel;
    let progress_every = options.progress_every.max(1);
    loop {
        let mut handle = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                summary.cancelled = true;
                break;
            }
            handle = rx.recv() => match handle {
                Some(handle) => handle,
                None => break,
            },
        };
        let joined = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                handle.abort();
                summary.cancelled = true;
                break;
            }
            joined = &mut handle => joined,
        };
        let fetched = match joined {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(error = %err, "Entity fetch task failed");
                summary.skipped_missing += 1;
                continue;
            }
        };

        summary.evaluated += 1;
        if summary.evaluated % progress_every == 0 {
            info!(
                evaluated = summary.evaluated,
                suggested = summary.suggested,
                "Evaluating pairs"
            );
        }

        let (pair, left, right) = match fetched {
            Fetched::TimedOut(pair) => {
                warn!(left = %pair.left, right = %pair.right, "Entity fetch timed out");
                summary.skipped_timeout += 1;
                continue;
            }
            Fetched::Loaded {
                pair,
                left: Some(left),
                right: Some(right),
            } => (pair, left, right),
            Fetched::Loaded { .. } => {
                summary.skipped_missing += 1;
                continue;
            }
        };

        if !left.schema().can_match(right.schema()) {
            summary.skipped_schema += 1;
            continue;
        }
        if !resolver.check_candidate(&left.id, &right.id) {
            summary.skipped_judged += 1;
            continue;
        }
        resolver.suggest(&left.id, &right.id, pair.score)?;
        summary.suggested += 1;
        if summary.suggested > options.limit {
            break;
        }
    }
    // Fetches still queued or being spawned are aborted, not detached.
    rx.close();
    while let Some(handle) = rx.recv().await {
        handle.abort();
    }
    if let Err(err) = producer.await {
        warn!(error = %err, "Fetch producer failed");
    }

    resolver.save().context("failed to save resolver")?;
    info!(
        candidates = summary.candidates,
        evaluated = summary.evaluated,
        suggested = summary.suggested,
        cancelled = summary.cancelled,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Xref complete"
    );
    Ok(summary)
}

/// Build the view of `dataset` and cross-reference it.
pub async fn run_dataset(
    source: &dyn StatementSource,
    dataset: &Dataset,
    resolver: &mut Resolver,
    model: &SchemaModel,
    options: &XrefOptions,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<XrefSummary> {
    let view = DatasetView::build(source, dataset, resolver, model)?;
    run(resolver, Arc::new(view), options, cancel).await
}

/// Spawn one fetch task per pair, feeding handles to `tx` in pair order.
fn spawn_fetches<L>(
    pairs: Vec<CandidatePair>,
    loader: Arc<L>,
    fetch_timeout: Duration,
    tx: mpsc::Sender<JoinHandle<Fetched>>,
) -> JoinHandle<()>
where
    L: EntityLoader + 'static,
{
    tokio::spawn(async move {
        for pair in pairs {
            let loader = Arc::clone(&loader);
            let handle = tokio::spawn(async move {
                let fetch = async {
                    let left = loader.get_entity(&pair.left).await;
                    let right = loader.get_entity(&pair.right).await;
                    (left, right)
                };
                let result = tokio::time::timeout(fetch_timeout, fetch).await;
                match result {
                    Ok((left, right)) => Fetched::Loaded { pair, left, right },
                    Err(_) => Fetched::TimedOut(pair),
                }
            });
            if let Err(unsent) = tx.send(handle).await {
                unsent.0.abort();
                break;
            }
        }
    })
}

/// Resolves once the cancel flag is set; never without a receiver.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
