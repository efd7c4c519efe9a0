//! Process-wide context store and per-run execution context.
//!
//! The [`ContextStore`] is the single owner of state shared between the
//! executor and the producers: session variables and the activity log.  All
//! access goes through one mutex with short critical sections; nothing holds
//! the lock across a blocking UI call.
//!
//! Recipe runs never mutate the store directly.  A run works on an
//! [`ExecutionContext`] forked from the store and merged back only when the
//! run completes successfully.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KernelError, Result};

/// Named variables, ordered by key.
pub type Variables = BTreeMap<String, Value>;

/// Default number of finished activities kept in the history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    Succeeded,
    Failed,
}

/// One unit of work (usually a recipe step) recorded in the activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub name: String,
    pub status: ActivityStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

/// Shared, mutex-guarded session state.
///
/// Cheaply cloneable (`Arc`-backed); every clone sees the same state.
#[derive(Clone)]
pub struct ContextStore {
    inner: Arc<Mutex<StoreState>>,
}

struct StoreState {
    vars: Variables,
    current: Option<ActivityRecord>,
    history: VecDeque<ActivityRecord>,
    history_limit: usize,
}

impl ContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    #[must_use]
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreState {
                vars: Variables::new(),
                current: None,
                history: VecDeque::new(),
                history_limit,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state().vars.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state().vars.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.state().vars.remove(key)
    }

    /// Copy of every variable currently in the store.
    pub fn snapshot(&self) -> Variables {
        self.state().vars.clone()
    }

    /// Merge `vars` into the store.  Existing keys are overwritten
    /// (last write wins).
    pub fn merge(&self, vars: Variables) {
        let count = vars.len();
        self.state().vars.extend(vars);
        tracing::debug!(count, "context merged into store");
    }

    /// Start a run-scoped context seeded from the current store contents,
    /// with `args` layered on top.
    pub fn fork(&self, args: Variables) -> ExecutionContext {
        let mut vars = self.snapshot();
        vars.extend(args);
        ExecutionContext::new(vars)
    }

    // -- Activity log -------------------------------------------------------

    /// Mark `name` as the current activity.  An activity still marked
    /// running is moved to the history as failed.
    pub fn begin_activity(&self, name: impl Into<String>, metadata: BTreeMap<String, String>) {
        let mut state = self.state();
        if let Some(mut stale) = state.current.take() {
            stale.status = ActivityStatus::Failed;
            stale.finished_at = Some(Utc::now());
            stale.error = Some("superseded before finishing".into());
            push_history(&mut state, stale);
        }
        state.current = Some(ActivityRecord {
            name: name.into(),
            status: ActivityStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            metadata,
            error: None,
        });
    }

    /// Close the current activity.  Does nothing when none is running.
    pub fn finish_activity(&self, succeeded: bool, error: Option<String>) {
        let mut state = self.state();
        if let Some(mut record) = state.current.take() {
            record.status = if succeeded {
                ActivityStatus::Succeeded
            } else {
                ActivityStatus::Failed
            };
            record.finished_at = Some(Utc::now());
            record.error = error;
            push_history(&mut state, record);
        }
    }

    pub fn current_activity(&self) -> Option<ActivityRecord> {
        self.state().current.clone()
    }

    /// Finished activities, oldest first.
    pub fn history(&self) -> Vec<ActivityRecord> {
        self.state().history.iter().cloned().collect()
    }
}

fn push_history(state: &mut StoreState, record: ActivityRecord) {
    state.history.push_back(record);
    while state.history.len() > state.history_limit {
        state.history.pop_front();
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-run variable scope.  Owned by exactly one run; never shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    vars: Variables,
}

impl ExecutionContext {
    pub fn new(vars: Variables) -> Self {
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Deserialize a variable into `T`.  `Ok(None)` when it is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.vars
            .get(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| KernelError::InvalidValue {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// The subset of `keys` not present in this context.
    pub fn missing<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .filter(|k| !self.vars.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Apply a step's variable updates.
    pub fn apply(&mut self, updates: Variables) {
        self.vars.extend(updates);
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    pub fn into_variables(self) -> Variables {
        self.vars
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
