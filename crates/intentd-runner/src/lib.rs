//! Recipe execution for intentd.
//!
//! - **[`recipe`]** -- the [`Recipe`]/[`Step`] model, TOML loading through a
//!   [`RecipeSource`], and the process-lifetime [`RecipeCache`].
//! - **[`click`]** -- the [`ClickEngine`] fallback chain over the platform's
//!   UI automation backend.
//! - **[`handlers`]** -- the [`StepHandler`] trait, the [`HandlerRegistry`]
//!   and the default handler for every step kind.
//! - **[`machine`]** -- the [`RecipeRunner`] state machine.
//! - **[`error`]** -- [`RunnerError`], [`StepError`] and [`ClickError`].

pub mod click;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod recipe;

pub use click::{AttemptOutcome, ClickAttempt, ClickEngine, ClickOptions, ClickResult};
pub use error::{ClickError, Result, RunnerError, StepError};
pub use handlers::{HandlerRegistry, StepHandler, StepOutcome};
pub use machine::{RecipeRunner, RunOutcome, RunState};
pub use recipe::{
    DirectoryRecipeSource, MemoryRecipeSource, Recipe, RecipeCache, RecipeSource, Step,
    StepAction, StepKind, interpolate,
};
