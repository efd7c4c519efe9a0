//! Intent Dispatcher: the single funnel every producer submits into.
//!
//! `submit` computes the intent's fingerprint and consults the dedupe cache
//! first.  An unexpired entry yields [`DispatchResult::Suppressed`] without
//! touching the catalog or the executor.  Otherwise the entry is recorded,
//! the intent name is resolved through the [`IntentCatalog`], the recipe is
//! loaded (and cached) and a run is queued on the single-lane [`Executor`].
//! File-sourced intents are archived whatever the outcome.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use intentd_kernel::{DedupeCache, DedupeDecision, Event, Executor, Fingerprint, IpcBus, RunId, RunReport};
use intentd_runner::{RecipeCache, RecipeRunner};

use crate::catalog::IntentCatalog;
use crate::files::IntentArchive;
use crate::intent::{Intent, IntentSource};

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// What happened to a submitted intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Queued for execution.
    Accepted { run_id: RunId },
    /// An identical intent was admitted within the dedupe window.
    Suppressed { fingerprint: Fingerprint },
    /// No catalog entry for this intent name.
    UnknownIntent { name: String },
    /// The recipe could not be loaded or the executor refused the run.
    Rejected { reason: String },
    /// Written to the intents directory for the watcher to pick up.
    Deferred { path: PathBuf },
}

impl DispatchResult {
    /// Whether the intent was queued (or handed on) rather than dropped.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Deferred { .. })
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { run_id } => write!(f, "accepted as run {run_id}"),
            Self::Suppressed { fingerprint } => write!(f, "suppressed duplicate {fingerprint}"),
            Self::UnknownIntent { name } => write!(f, "unknown intent `{name}`"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::Deferred { path } => write!(f, "deferred to {}", path.display()),
        }
    }
}

/// Anything intents can be submitted to.
pub trait IntentSink: Send + Sync {
    fn submit(&self, intent: Intent) -> DispatchResult;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Inner {
    catalog: Arc<IntentCatalog>,
    recipes: RecipeCache,
    runner: RecipeRunner,
    executor: Executor,
    dedupe: Arc<DedupeCache>,
    bus: IpcBus,
    archive: Option<IntentArchive>,
}

/// Resolves intents to recipes and queues them on the executor.
///
/// Cheaply cloneable; clones share the dedupe cache and executor.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<IntentCatalog>,
        recipes: RecipeCache,
        runner: RecipeRunner,
        executor: Executor,
        dedupe: DedupeCache,
        bus: IpcBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                recipes,
                runner,
                executor,
                dedupe: Arc::new(dedupe),
                bus,
                archive: None,
            }),
        }
    }

    /// Archive file-sourced intents after dispatch.
    pub fn with_archive(mut self, archive: IntentArchive) -> Self {
        Arc::make_mut(&mut self.inner).archive = Some(archive);
        self
    }

    pub fn catalog(&self) -> &Arc<IntentCatalog> {
        &self.inner.catalog
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn runner(&self) -> &RecipeRunner {
        &self.inner.runner
    }

    /// Submit one intent.  Never panics and never blocks on a run.
    pub fn dispatch(&self, intent: Intent) -> DispatchResult {
        let result = self.route(&intent);
        if intent.source == IntentSource::File {
            self.archive_origin(&intent);
        }
        result
    }

    fn route(&self, intent: &Intent) -> DispatchResult {
        let inner = &self.inner;
        let fingerprint = intent.fingerprint();

        if let DedupeDecision::Duplicate { expires_in } = inner.dedupe.check_and_record(&fingerprint) {
            tracing::info!(
                fingerprint = %fingerprint,
                source = %intent.source,
                expires_in_ms = expires_in.as_millis() as u64,
                "duplicate intent suppressed"
            );
            inner.bus.publish(Event::IntentSuppressed {
                intent: intent.name.clone(),
                fingerprint: fingerprint.to_string(),
                source: intent.source.to_string(),
                timestamp: Utc::now(),
            });
            return DispatchResult::Suppressed { fingerprint };
        }

        let Some(recipe_id) = inner.catalog.recipe_for(&intent.name) else {
            tracing::warn!(intent = %intent.name, source = %intent.source, "unknown intent");
            self.publish_rejection(intent, "unknown intent");
            return DispatchResult::UnknownIntent {
                name: intent.name.clone(),
            };
        };

        let recipe = match inner.recipes.get(recipe_id) {
            Ok(recipe) => recipe,
            Err(e) => {
                tracing::warn!(intent = %intent.name, recipe = recipe_id, error = %e, "recipe unavailable");
                let reason = e.to_string();
                self.publish_rejection(intent, &reason);
                return DispatchResult::Rejected { reason };
            }
        };

        let label = intent.to_string();
        let args = intent.args_as_variables();
        let runner = inner.runner.clone();
        let run_label = label.clone();
        let work = Box::new(move || -> RunReport {
            let outcome = runner.run_labeled(&recipe, args, &run_label);
            RunReport::from(&outcome)
        });

        match inner.executor.submit(label, work) {
            Ok(run_id) => {
                tracing::info!(
                    intent = %intent.name,
                    source = %intent.source,
                    run_id = %run_id,
                    recipe = recipe_id,
                    "intent dispatched"
                );
                inner.bus.publish(Event::IntentReceived {
                    run_id,
                    intent: intent.name.clone(),
                    fingerprint: fingerprint.to_string(),
                    source: intent.source.to_string(),
                    timestamp: Utc::now(),
                });
                DispatchResult::Accepted { run_id }
            }
            Err(e) => {
                tracing::warn!(intent = %intent.name, error = %e, "executor refused run");
                let reason = e.to_string();
                self.publish_rejection(intent, &reason);
                DispatchResult::Rejected { reason }
            }
        }
    }

    fn publish_rejection(&self, intent: &Intent, reason: &str) {
        self.inner.bus.publish(Event::IntentRejected {
            intent: intent.name.clone(),
            source: intent.source.to_string(),
            reason: reason.to_owned(),
            timestamp: Utc::now(),
        });
    }

    fn archive_origin(&self, intent: &Intent) {
        let (Some(archive), Some(origin)) = (self.inner.archive.as_ref(), intent.origin.as_ref()) else {
            return;
        };
        if let Err(e) = archive.archive(origin) {
            tracing::warn!(path = %origin.display(), error = %e, "failed to archive intent file");
        }
    }
}

impl IntentSink for Dispatcher {
    fn submit(&self, intent: Intent) -> DispatchResult {
        self.dispatch(intent)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
