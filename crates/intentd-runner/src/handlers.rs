//! Step handlers and their registry.
//!
//! Every [`StepKind`] is served by one [`StepHandler`].  The runner invokes
//! it with the step parameters, a read-only view of the run's
//! [`ExecutionContext`] and the [`ClickEngine`], and applies the returned
//! variable updates itself.  Handlers never touch the global context store.
//!
//! The defaults registered by [`HandlerRegistry::with_defaults`] keep the
//! domain logic thin; deployments replace them with [`HandlerRegistry::register`].

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, info};

use intentd_kernel::{ExecutionContext, Variables};
use intentd_platform::Clipboard;

use crate::click::ClickEngine;
use crate::error::StepError;
use crate::recipe::{
    AppActionParams, AssertOperation, AssertParams, BrowserActionParams, BrowserOperation,
    ReportParams, StepAction, StepKind, UiClickParams, interpolate,
};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// What a handler reports after running a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub success: bool,
    /// Variables to write into the execution context.
    pub updates: Variables,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            updates: Variables::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates.insert(key.into(), value.into());
        self
    }
}

/// Executes one kind of step.
pub trait StepHandler: Send + Sync {
    fn execute(
        &self,
        step: &StepAction,
        ctx: &ExecutionContext,
        clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError>;
}

impl<F> StepHandler for F
where
    F: Fn(&StepAction, &ExecutionContext, &ClickEngine) -> Result<StepOutcome, StepError>
        + Send
        + Sync,
{
    fn execute(
        &self,
        step: &StepAction,
        ctx: &ExecutionContext,
        clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError> {
        self(step, ctx, clicks)
    }
}

fn mismatch(expected: StepKind, got: &StepAction) -> StepError {
    StepError::execution(format!(
        "{expected} handler received a {} step",
        got.kind()
    ))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent handler registry backed by [`DashMap`].
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<DashMap<StepKind, Arc<dyn StepHandler>>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a default handler for every step kind.  `report`
    /// steps can copy to `clipboard` when one is given.
    #[must_use]
    pub fn with_defaults(clipboard: Option<Arc<dyn Clipboard>>) -> Self {
        let registry = Self::new();
        registry.register(StepKind::AppAction, AppActionHandler);
        registry.register(StepKind::UiClick, UiClickHandler);
        registry.register(StepKind::BrowserAction, BrowserActionHandler);
        registry.register(StepKind::Assert, AssertHandler);
        registry.register(StepKind::Report, ReportHandler { clipboard });
        registry
    }

    /// Register the handler for `kind`, replacing any existing one.
    pub fn register(&self, kind: StepKind, handler: impl StepHandler + 'static) {
        debug!(kind = %kind, "step handler registered");
        self.inner.insert(kind, Arc::new(handler));
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepHandler>> {
        self.inner.get(&kind).map(|entry| Arc::clone(entry.value()))
    }

    /// Step kinds that have no handler.
    pub fn missing_kinds(&self) -> Vec<StepKind> {
        StepKind::ALL
            .into_iter()
            .filter(|kind| !self.inner.contains_key(kind))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Default handlers
// ---------------------------------------------------------------------------

/// Records the requested application lifecycle change.
pub struct AppActionHandler;

impl StepHandler for AppActionHandler {
    fn execute(
        &self,
        step: &StepAction,
        _ctx: &ExecutionContext,
        _clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError> {
        let StepAction::AppAction(AppActionParams { app, action, args }) = step else {
            return Err(mismatch(StepKind::AppAction, step));
        };
        info!(app = %app, action = ?action, args = ?args, "app action");
        Ok(StepOutcome::ok()
            .set("last_app", app.clone())
            .set("last_app_action", json!(action)))
    }
}

/// Runs the click engine with the engine's default options, narrowed by the
/// step.
pub struct UiClickHandler;

impl StepHandler for UiClickHandler {
    fn execute(
        &self,
        step: &StepAction,
        _ctx: &ExecutionContext,
        clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError> {
        let StepAction::UiClick(UiClickParams {
            target,
            allow_focus_tap,
        }) = step
        else {
            return Err(mismatch(StepKind::UiClick, step));
        };

        let options = clicks.defaults().narrowed(*allow_focus_tap);
        let result = clicks.click(target, &options)?;
        match result.method_used {
            Some(method) if result.success => Ok(StepOutcome::ok()
                .set("last_click_method", method.as_str())
                .set("last_click_target", target.to_string())),
            _ => Err(StepError::ClickFailed {
                target: target.to_string(),
                attempts: result.attempts.len(),
            }),
        }
    }
}

/// Records browser navigation state.  Parameters were validated at load.
pub struct BrowserActionHandler;

impl StepHandler for BrowserActionHandler {
    fn execute(
        &self,
        step: &StepAction,
        ctx: &ExecutionContext,
        _clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError> {
        let StepAction::BrowserAction(BrowserActionParams {
            action,
            url,
            selector,
            text,
        }) = step
        else {
            return Err(mismatch(StepKind::BrowserAction, step));
        };

        let vars = ctx.variables();
        let url = url.as_deref().map(|u| interpolate(u, vars));
        let text = text.as_deref().map(|t| interpolate(t, vars));
        info!(action = ?action, url = ?url, selector = ?selector, "browser action");

        let mut outcome = StepOutcome::ok().set("browser_last_action", json!(action));
        match action {
            BrowserOperation::Goto => {
                if let Some(url) = url {
                    outcome = outcome.set("browser_url", url);
                }
            }
            BrowserOperation::Type => {
                if let Some(text) = text {
                    outcome = outcome.set("browser_last_text", text);
                }
            }
            BrowserOperation::Close => {
                outcome = outcome.set("browser_url", Value::Null);
            }
            _ => {}
        }
        Ok(outcome)
    }
}

/// Evaluates a typed check against a context variable.
pub struct AssertHandler;

impl StepHandler for AssertHandler {
    fn execute(
        &self,
        step: &StepAction,
        ctx: &ExecutionContext,
        _clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError> {
        let StepAction::Assert(params) = step else {
            return Err(mismatch(StepKind::Assert, step));
        };
        evaluate_assert(params, ctx)?;
        Ok(StepOutcome::ok())
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) if actual.is_number() || expected.is_number() => a == b,
        _ => as_text(actual) == as_text(expected),
    }
}

fn evaluate_assert(params: &AssertParams, ctx: &ExecutionContext) -> Result<(), StepError> {
    let fail = |reason: String| Err(StepError::AssertionFailed { reason });
    let actual = ctx.get(&params.var);

    if params.op == AssertOperation::Exists {
        return match actual {
            Some(v) if !v.is_null() => Ok(()),
            _ => fail(format!("`{}` is not set", params.var)),
        };
    }

    let Some(actual) = actual else {
        return fail(format!("`{}` is not set", params.var));
    };
    let Some(expected) = params.value.as_ref() else {
        return fail(format!("assert on `{}` has no value", params.var));
    };

    let passed = match params.op {
        AssertOperation::Equals => values_equal(actual, expected),
        AssertOperation::NotEquals => !values_equal(actual, expected),
        AssertOperation::Contains => match actual {
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            other => as_text(other).contains(&as_text(expected)),
        },
        AssertOperation::GreaterThan | AssertOperation::LessThan => {
            let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) else {
                return fail(format!("`{}` = {actual} is not numeric", params.var));
            };
            if params.op == AssertOperation::GreaterThan {
                a > b
            } else {
                a < b
            }
        }
        AssertOperation::Exists => true,
    };

    if passed {
        Ok(())
    } else {
        fail(format!(
            "`{}` = {actual} failed {:?} {expected}",
            params.var, params.op
        ))
    }
}

/// Renders a message from the context, logs it and optionally copies it to
/// the clipboard.
pub struct ReportHandler {
    clipboard: Option<Arc<dyn Clipboard>>,
}

impl ReportHandler {
    pub fn new(clipboard: Option<Arc<dyn Clipboard>>) -> Self {
        Self { clipboard }
    }
}

impl StepHandler for ReportHandler {
    fn execute(
        &self,
        step: &StepAction,
        ctx: &ExecutionContext,
        _clicks: &ClickEngine,
    ) -> Result<StepOutcome, StepError> {
        let StepAction::Report(ReportParams { message, clipboard }) = step else {
            return Err(mismatch(StepKind::Report, step));
        };

        let rendered = interpolate(message, ctx.variables());
        info!(report = %rendered, "report");

        if *clipboard {
            match &self.clipboard {
                Some(cb) => cb
                    .write(&rendered)
                    .map_err(|e| StepError::execution(format!("clipboard write failed: {e}")))?,
                None => debug!("report asked for clipboard but none is available"),
            }
        }
        Ok(StepOutcome::ok().set("last_report", rendered))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use intentd_kernel::InterruptSignal;
    use intentd_platform::simulated::{MemoryClipboard, MethodOutcome, SimulatedDesktop, SimulatedElement};
    use intentd_platform::{ClickMethod, ClickTarget, UiAutomation};

    fn engine_with(desktop: Arc<SimulatedDesktop>) -> ClickEngine {
        let ui: Arc<dyn UiAutomation> = desktop;
        ClickEngine::new(ui, InterruptSignal::new())
    }

    fn ctx(pairs: &[(&str, Value)]) -> ExecutionContext {
        ExecutionContext::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn assert_step(var: &str, op: AssertOperation, value: Option<Value>) -> StepAction {
        StepAction::Assert(AssertParams {
            var: var.into(),
            op,
            value,
        })
    }

    #[test]
    fn defaults_cover_every_kind() {
        let registry = HandlerRegistry::with_defaults(None);
        assert!(registry.missing_kinds().is_empty());
        assert_eq!(HandlerRegistry::new().missing_kinds().len(), 5);
    }

    #[test]
    fn register_replaces_handler() {
        let registry = HandlerRegistry::with_defaults(None);
        registry.register(
            StepKind::Report,
            |_: &StepAction,
             _: &ExecutionContext,
             _: &ClickEngine|
             -> Result<StepOutcome, StepError> { Ok(StepOutcome::ok().set("custom", true)) },
        );
        let engine = engine_with(Arc::new(SimulatedDesktop::new()));
        let step = StepAction::Report(ReportParams {
            message: "x".into(),
            clipboard: false,
        });
        let outcome = registry
            .get(StepKind::Report)
            .expect("handler")
            .execute(&step, &ExecutionContext::default(), &engine)
            .expect("runs");
        assert_eq!(outcome.updates.get("custom"), Some(&json!(true)));
    }

    #[test]
    fn ui_click_records_method_and_maps_unreachable() {
        let desktop = Arc::new(SimulatedDesktop::new());
        desktop.add(
            SimulatedElement::new("Chrome")
                .name("Home")
                .on(ClickMethod::Invoke, MethodOutcome::Succeed),
        );
        desktop.add(SimulatedElement::new("Chrome").name("Stop").disabled());
        let engine = engine_with(desktop);

        let click = |name: &str| {
            StepAction::UiClick(UiClickParams {
                target: ClickTarget::window("Chrome").with_name(name),
                allow_focus_tap: None,
            })
        };

        let outcome = UiClickHandler
            .execute(&click("Home"), &ExecutionContext::default(), &engine)
            .expect("click succeeds");
        assert_eq!(outcome.updates.get("last_click_method"), Some(&json!("invoke")));

        let err = UiClickHandler
            .execute(&click("Stop"), &ExecutionContext::default(), &engine)
            .expect_err("disabled");
        assert!(matches!(err, StepError::Unreachable { enabled: false, .. }));

        let err = UiClickHandler
            .execute(&click("Missing"), &ExecutionContext::default(), &engine)
            .expect_err("missing");
        assert!(matches!(err, StepError::TargetNotFound { .. }));
    }

    #[test]
    fn ui_click_all_methods_failing_is_click_failed() {
        let desktop = Arc::new(SimulatedDesktop::new());
        desktop.add(SimulatedElement::new("Inert"));
        let engine = engine_with(desktop);
        let step = StepAction::UiClick(UiClickParams {
            target: ClickTarget::window("Inert"),
            allow_focus_tap: Some(true),
        });
        let err = UiClickHandler
            .execute(&step, &ExecutionContext::default(), &engine)
            .expect_err("nothing reacts");
        // Focus tap stays off: the step cannot widen the engine defaults.
        assert_eq!(
            err,
            StepError::ClickFailed {
                target: ClickTarget::window("Inert").to_string(),
                attempts: 3
            }
        );
    }

    #[test]
    fn browser_goto_records_interpolated_url() {
        let engine = engine_with(Arc::new(SimulatedDesktop::new()));
        let step = StepAction::BrowserAction(BrowserActionParams {
            action: BrowserOperation::Goto,
            url: Some("https://example.com/${page}".into()),
            selector: None,
            text: None,
        });
        let outcome = BrowserActionHandler
            .execute(&step, &ctx(&[("page", json!("home"))]), &engine)
            .expect("goto");
        assert_eq!(
            outcome.updates.get("browser_url"),
            Some(&json!("https://example.com/home"))
        );
        assert_eq!(outcome.updates.get("browser_last_action"), Some(&json!("goto")));
    }

    #[test]
    fn assert_operations() {
        let c = ctx(&[
            ("action_id", json!(203)),
            ("title", json!("Quotes - Chrome")),
            ("tags", json!(["a", "b"])),
            ("count", json!("7")),
        ]);
        let pass = [
            assert_step("action_id", AssertOperation::Exists, None),
            assert_step("action_id", AssertOperation::Equals, Some(json!("203"))),
            assert_step("action_id", AssertOperation::NotEquals, Some(json!(204))),
            assert_step("title", AssertOperation::Contains, Some(json!("Chrome"))),
            assert_step("tags", AssertOperation::Contains, Some(json!("b"))),
            assert_step("count", AssertOperation::GreaterThan, Some(json!(5))),
            assert_step("count", AssertOperation::LessThan, Some(json!(10.5))),
        ];
        for step in &pass {
            let StepAction::Assert(params) = step else {
                unreachable!()
            };
            assert!(evaluate_assert(params, &c).is_ok(), "expected pass: {params:?}");
        }

        let failing = [
            assert_step("missing", AssertOperation::Exists, None),
            assert_step("missing", AssertOperation::Equals, Some(json!(1))),
            assert_step("title", AssertOperation::Equals, Some(json!("Other"))),
            assert_step("title", AssertOperation::GreaterThan, Some(json!(1))),
        ];
        for step in &failing {
            let StepAction::Assert(params) = step else {
                unreachable!()
            };
            assert!(
                matches!(evaluate_assert(params, &c), Err(StepError::AssertionFailed { .. })),
                "expected failure: {params:?}"
            );
        }
    }

    #[test]
    fn report_renders_and_copies_to_clipboard() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let shared: Arc<dyn Clipboard> = clipboard.clone();
        let handler = ReportHandler::new(Some(shared));
        let engine = engine_with(Arc::new(SimulatedDesktop::new()));
        let step = StepAction::Report(ReportParams {
            message: "exported ${count} quotes".into(),
            clipboard: true,
        });

        let outcome = handler
            .execute(&step, &ctx(&[("count", json!(12))]), &engine)
            .expect("report");
        assert_eq!(outcome.updates.get("last_report"), Some(&json!("exported 12 quotes")));
        assert_eq!(clipboard.read().expect("read"), "exported 12 quotes");
    }

    #[test]
    fn mismatched_step_is_rejected() {
        let engine = engine_with(Arc::new(SimulatedDesktop::new()));
        let step = StepAction::Report(ReportParams {
            message: "x".into(),
            clipboard: false,
        });
        let err = AssertHandler
            .execute(&step, &ExecutionContext::default(), &engine)
            .expect_err("wrong kind");
        assert!(matches!(err, StepError::Execution { .. }));
    }
}
