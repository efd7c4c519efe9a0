//! Recipe model, loading and caching.
//!
//! A recipe is an ordered list of [`Step`]s stored as a TOML file named after
//! its identifier:
//!
//! ```toml
//! description = "Open the browser home page"
//!
//! [[steps]]
//! kind = "app_action"
//! app = "chrome"
//! action = "start"
//!
//! [[steps]]
//! kind = "ui_click"
//! target = { window_title = "Chrome", name = "Home" }
//! requires = ["last_app"]
//! ```
//!
//! Step kinds form a closed set.  Unknown kinds and invalid parameters are
//! rejected when the recipe is loaded, never at run time.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use intentd_kernel::Variables;
use intentd_platform::ClickTarget;

use crate::error::{Result, RunnerError};

// ---------------------------------------------------------------------------
// Step parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppOperation {
    Start,
    Focus,
    Close,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppActionParams {
    pub app: String,
    pub action: AppOperation,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiClickParams {
    pub target: ClickTarget,
    /// Narrow the active profile's focus-tap permission for this step.
    #[serde(default)]
    pub allow_focus_tap: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserOperation {
    Launch,
    Goto,
    Click,
    Type,
    Minimize,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserActionParams {
    pub action: BrowserOperation,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl BrowserActionParams {
    fn validate(&self) -> std::result::Result<(), String> {
        let need = |field: &Option<String>, name: &str| {
            if field.as_deref().is_some_and(|v| !v.trim().is_empty()) {
                Ok(())
            } else {
                Err(format!("browser `{:?}` requires `{name}`", self.action).to_lowercase())
            }
        };
        match self.action {
            BrowserOperation::Goto => need(&self.url, "url"),
            BrowserOperation::Click => need(&self.selector, "selector"),
            BrowserOperation::Type => {
                need(&self.selector, "selector")?;
                need(&self.text, "text")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertOperation {
    Exists,
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertParams {
    pub var: String,
    pub op: AssertOperation,
    #[serde(default)]
    pub value: Option<Value>,
}

impl AssertParams {
    fn validate(&self) -> std::result::Result<(), String> {
        match (self.op, &self.value) {
            (AssertOperation::Exists, _) => Ok(()),
            (AssertOperation::GreaterThan | AssertOperation::LessThan, Some(v)) if v.is_number() => {
                Ok(())
            }
            (AssertOperation::GreaterThan | AssertOperation::LessThan, _) => {
                Err(format!("assert on `{}` needs a numeric `value`", self.var))
            }
            (_, Some(_)) => Ok(()),
            (_, None) => Err(format!("assert on `{}` needs a `value`", self.var)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportParams {
    /// Message with `${var}` placeholders.
    pub message: String,
    /// Also copy the rendered message to the clipboard.
    #[serde(default)]
    pub clipboard: bool,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The closed set of step kinds, each with its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    AppAction(AppActionParams),
    UiClick(UiClickParams),
    BrowserAction(BrowserActionParams),
    Assert(AssertParams),
    Report(ReportParams),
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::AppAction(_) => StepKind::AppAction,
            Self::UiClick(_) => StepKind::UiClick,
            Self::BrowserAction(_) => StepKind::BrowserAction,
            Self::Assert(_) => StepKind::Assert,
            Self::Report(_) => StepKind::Report,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::AppAction(p) if p.app.trim().is_empty() => Err("app_action needs an `app`".into()),
            Self::UiClick(p) if p.target.window_title.trim().is_empty() => {
                Err("ui_click target needs a `window_title`".into())
            }
            Self::BrowserAction(p) => p.validate(),
            Self::Assert(p) => p.validate(),
            _ => Ok(()),
        }
    }
}

/// Discriminant of [`StepAction`], used to key the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    AppAction,
    UiClick,
    BrowserAction,
    Assert,
    Report,
}

impl StepKind {
    pub const ALL: [StepKind; 5] = [
        StepKind::AppAction,
        StepKind::UiClick,
        StepKind::BrowserAction,
        StepKind::Assert,
        StepKind::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppAction => "app_action",
            Self::UiClick => "ui_click",
            Self::BrowserAction => "browser_action",
            Self::Assert => "assert",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: StepAction,
    /// Variables that must exist before the step runs.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Variables the step is expected to set.
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            requires: Vec::new(),
            produces: Vec::new(),
            label: None,
        }
    }

    pub fn requires<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn produces<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Name used in logs and the activity history.
    pub fn display_name(&self, index: usize) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{}#{index}", self.action.kind()),
        }
    }
}

// ---------------------------------------------------------------------------
// Recipe
// ---------------------------------------------------------------------------

/// An immutable, validated list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Recipe {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            description: None,
            steps,
        }
    }

    /// Parse and validate a recipe from TOML.  The identifier comes from the
    /// caller, not the document.
    pub fn from_toml(id: &str, text: &str) -> Result<Self> {
        let mut recipe: Recipe = toml::from_str(text).map_err(|e| RunnerError::RecipeInvalid {
            recipe: id.to_owned(),
            reason: e.to_string(),
        })?;
        recipe.id = id.to_owned();
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn validate(&self) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            step.action
                .validate()
                .map_err(|reason| RunnerError::RecipeInvalid {
                    recipe: self.id.clone(),
                    reason: format!("step {index}: {reason}"),
                })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Resolves a recipe identifier to a recipe.
pub trait RecipeSource: Send + Sync {
    fn load(&self, recipe_id: &str) -> Result<Recipe>;
}

/// Reads `<dir>/<recipe_id>.toml`.
#[derive(Debug, Clone)]
pub struct DirectoryRecipeSource {
    dir: PathBuf,
}

impl DirectoryRecipeSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecipeSource for DirectoryRecipeSource {
    fn load(&self, recipe_id: &str) -> Result<Recipe> {
        let valid_id = !recipe_id.is_empty()
            && recipe_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !recipe_id.starts_with('.');
        if !valid_id {
            return Err(RunnerError::RecipeInvalid {
                recipe: recipe_id.to_owned(),
                reason: "identifier must be a plain file stem".into(),
            });
        }

        let path = self.dir.join(format!("{recipe_id}.toml"));
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RunnerError::RecipeNotFound {
                    recipe: recipe_id.to_owned(),
                });
            }
            Err(source) => return Err(RunnerError::Io { path, source }),
        };
        tracing::debug!(recipe = recipe_id, path = %path.display(), "recipe loaded from disk");
        Recipe::from_toml(recipe_id, &text)
    }
}

/// Recipes held in memory, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecipeSource {
    recipes: HashMap<String, Recipe>,
}

impl MemoryRecipeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, recipe: Recipe) -> Self {
        self.recipes.insert(recipe.id.clone(), recipe);
        self
    }
}

impl RecipeSource for MemoryRecipeSource {
    fn load(&self, recipe_id: &str) -> Result<Recipe> {
        let recipe = self
            .recipes
            .get(recipe_id)
            .cloned()
            .ok_or_else(|| RunnerError::RecipeNotFound {
                recipe: recipe_id.to_owned(),
            })?;
        recipe.validate()?;
        Ok(recipe)
    }
}

/// Lazily loads recipes on first reference and keeps them for the life of
/// the process.
#[derive(Clone)]
pub struct RecipeCache {
    source: Arc<dyn RecipeSource>,
    loaded: Arc<DashMap<String, Arc<Recipe>>>,
}

impl RecipeCache {
    pub fn new(source: Arc<dyn RecipeSource>) -> Self {
        Self {
            source,
            loaded: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, recipe_id: &str) -> Result<Arc<Recipe>> {
        if let Some(recipe) = self.loaded.get(recipe_id) {
            return Ok(Arc::clone(recipe.value()));
        }
        let recipe = Arc::new(self.source.load(recipe_id)?);
        tracing::info!(recipe = recipe_id, steps = recipe.steps.len(), "recipe cached");
        // A concurrent loader may have won; keep whichever landed first.
        let entry = self
            .loaded
            .entry(recipe_id.to_owned())
            .or_insert(recipe);
        Ok(Arc::clone(entry.value()))
    }

    /// Drop a cached recipe so the next reference reloads it.  Runs already
    /// holding the old `Arc` keep executing the old steps.
    pub fn invalidate(&self, recipe_id: &str) -> bool {
        self.loaded.remove(recipe_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_.-]+)\}").expect("placeholder regex is valid"));

/// Replace `${name}` placeholders with variable values.  Unknown names are
/// left untouched.
pub fn interpolate(template: &str, vars: &Variables) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| match vars.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_owned(),
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
