//! Recipe step state machine.
//!
//! A run moves `Pending -> Running -> {Completed, Failed, Cancelled}`.  Steps
//! execute strictly in order and the interrupt signal is checked before
//! every step.  The first failing step ends the run; later steps never run.
//!
//! The run works on an [`ExecutionContext`] forked from the global
//! [`ContextStore`].  Its variables are merged back only when the run
//! completes.  A failed or cancelled run leaves the store untouched, although
//! side effects already applied to the desktop are not rolled back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use intentd_kernel::{ContextStore, InterruptSignal, RunReport, Variables};

use crate::click::ClickEngine;
use crate::error::StepError;
use crate::handlers::HandlerRegistry;
use crate::recipe::Recipe;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Terminal result of one recipe run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        steps_executed: usize,
    },
    Failed {
        step_index: usize,
        error: StepError,
    },
    Cancelled {
        /// Steps that finished before the interrupt was observed.
        steps_executed: usize,
        reason: Option<String>,
    },
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            Self::Completed { .. } => RunState::Completed,
            Self::Failed { .. } => RunState::Failed,
            Self::Cancelled { .. } => RunState::Cancelled,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { steps_executed } => write!(f, "completed {steps_executed} steps"),
            Self::Failed { step_index, error } => write!(f, "step {step_index} failed: {error}"),
            Self::Cancelled {
                steps_executed,
                reason,
            } => write!(
                f,
                "cancelled after {steps_executed} steps ({})",
                reason.as_deref().unwrap_or("interrupt")
            ),
        }
    }
}

impl From<&RunOutcome> for RunReport {
    fn from(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed { .. } => RunReport::completed(),
            RunOutcome::Failed { .. } => RunReport::failed(outcome.to_string()),
            RunOutcome::Cancelled { .. } => RunReport::cancelled(outcome.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes recipes against the shared context store.
///
/// Cheaply cloneable.  Runs are blocking and meant to be executed one at a
/// time on the executor's lane.
#[derive(Clone)]
pub struct RecipeRunner {
    store: ContextStore,
    handlers: HandlerRegistry,
    clicks: ClickEngine,
    interrupt: InterruptSignal,
}

impl RecipeRunner {
    pub fn new(
        store: ContextStore,
        handlers: HandlerRegistry,
        clicks: ClickEngine,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            store,
            handlers,
            clicks,
            interrupt,
        }
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn run(&self, recipe: &Recipe, args: Variables) -> RunOutcome {
        self.run_labeled(recipe, args, &recipe.id)
    }

    /// Run `recipe` with `args` layered over the store.  `label` tags the
    /// activity records of this run.
    pub fn run_labeled(&self, recipe: &Recipe, args: Variables, label: &str) -> RunOutcome {
        let mut ctx = self.store.fork(args);
        info!(recipe = %recipe.id, run = label, steps = recipe.steps.len(), "run started");

        for (index, step) in recipe.steps.iter().enumerate() {
            if self.interrupt.is_triggered() {
                let outcome = RunOutcome::Cancelled {
                    steps_executed: index,
                    reason: self.interrupt.reason(),
                };
                warn!(recipe = %recipe.id, run = label, step = index, "run cancelled before step");
                return outcome;
            }

            let name = step.display_name(index);
            let missing = ctx.missing(&step.requires);
            if !missing.is_empty() {
                return self.fail(recipe, label, index, StepError::MissingContext { missing });
            }

            let kind = step.action.kind();
            let Some(handler) = self.handlers.get(kind) else {
                return self.fail(
                    recipe,
                    label,
                    index,
                    StepError::execution(format!("no handler registered for {kind} steps")),
                );
            };

            let metadata = BTreeMap::from([
                ("recipe".to_string(), recipe.id.clone()),
                ("run".to_string(), label.to_owned()),
                ("step_index".to_string(), index.to_string()),
            ]);
            self.store.begin_activity(&name, metadata);
            debug!(recipe = %recipe.id, step = index, name = %name, kind = %kind, "step started");

            match handler.execute(&step.action, &ctx, &self.clicks) {
                Ok(outcome) if outcome.success => {
                    ctx.apply(outcome.updates);
                    self.store.finish_activity(true, None);
                    let unmet = ctx.missing(&step.produces);
                    if !unmet.is_empty() {
                        warn!(
                            recipe = %recipe.id,
                            step = index,
                            unmet = ?unmet,
                            "step did not produce declared variables"
                        );
                    }
                }
                Ok(_) => {
                    let error = StepError::execution("handler reported failure");
                    self.store.finish_activity(false, Some(error.to_string()));
                    return self.fail(recipe, label, index, error);
                }
                Err(StepError::Interrupted) => {
                    self.store
                        .finish_activity(false, Some(StepError::Interrupted.to_string()));
                    warn!(recipe = %recipe.id, run = label, step = index, "run cancelled mid-step");
                    return RunOutcome::Cancelled {
                        steps_executed: index,
                        reason: self.interrupt.reason(),
                    };
                }
                Err(error) => {
                    self.store.finish_activity(false, Some(error.to_string()));
                    return self.fail(recipe, label, index, error);
                }
            }
        }

        let steps_executed = recipe.steps.len();
        self.store.merge(ctx.into_variables());
        info!(recipe = %recipe.id, run = label, steps_executed, "run completed");
        RunOutcome::Completed { steps_executed }
    }

    fn fail(&self, recipe: &Recipe, label: &str, step_index: usize, error: StepError) -> RunOutcome {
        error!(
            recipe = %recipe.id,
            run = label,
            step = step_index,
            error = %error,
            "run failed"
        );
        RunOutcome::Failed { step_index, error }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
