//! Integration tests for the intentd-runner crate.
//!
//! Recipes are loaded from disk and run end to end against the simulated
//! desktop with the default handlers.

use std::sync::Arc;

use serde_json::json;

use intentd_kernel::{ContextStore, InterruptSignal, Variables};
use intentd_platform::simulated::{MemoryClipboard, MethodOutcome, SimulatedDesktop, SimulatedElement};
use intentd_platform::{ClickMethod, Clipboard, UiAutomation};
use intentd_runner::{
    ClickEngine, ClickOptions, DirectoryRecipeSource, HandlerRegistry, RecipeCache, RecipeRunner,
    RunOutcome, StepError,
};

const MINIMIZE: &str = r#"
description = "Minimize the browser"

[[steps]]
kind = "app_action"
app = "chrome"
action = "focus"

[[steps]]
kind = "ui_click"
target = { window_title = "Chrome", role = "button", name = "Minimize" }
requires = ["last_app"]
produces = ["last_click_method"]

[[steps]]
kind = "report"
message = "minimized via ${last_click_method} for action ${action_id}"
clipboard = true
"#;

const STOP_DOWNLOAD: &str = r#"
[[steps]]
kind = "ui_click"
target = { window_title = "Chrome", name = "Stop" }

[[steps]]
kind = "report"
message = "never reached"
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    desktop: Arc<SimulatedDesktop>,
    clipboard: Arc<MemoryClipboard>,
    cache: RecipeCache,
    runner: RecipeRunner,
}

fn fixture(options: ClickOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("browser_minimize.toml"), MINIMIZE).unwrap();
    std::fs::write(dir.path().join("stop_download.toml"), STOP_DOWNLOAD).unwrap();

    let desktop = Arc::new(SimulatedDesktop::new());
    desktop.add(
        SimulatedElement::new("Quotes - Google Chrome")
            .role("button")
            .name("Minimize")
            .on(ClickMethod::Invoke, MethodOutcome::Ignore)
            .on(ClickMethod::AccessibleClick, MethodOutcome::Error("offscreen".into()))
            .on(ClickMethod::ClickMessage, MethodOutcome::Succeed),
    );
    desktop.add(SimulatedElement::new("Quotes - Google Chrome").name("Stop").disabled());

    let clipboard = Arc::new(MemoryClipboard::new());
    let signal = InterruptSignal::new();
    let ui: Arc<dyn UiAutomation> = desktop.clone();
    let clicks = ClickEngine::new(ui, signal.clone()).with_defaults(options);
    let shared_clipboard: Arc<dyn Clipboard> = clipboard.clone();
    let runner = RecipeRunner::new(
        ContextStore::new(),
        HandlerRegistry::with_defaults(Some(shared_clipboard)),
        clicks,
        signal,
    );
    let cache = RecipeCache::new(Arc::new(DirectoryRecipeSource::new(dir.path())));

    Fixture {
        _dir: dir,
        desktop,
        clipboard,
        cache,
        runner,
    }
}

#[test]
fn recipe_from_disk_runs_through_click_fallback_chain() {
    let fx = fixture(ClickOptions::default());
    let recipe = fx.cache.get("browser_minimize").unwrap();

    let outcome = fx.runner.run(
        &recipe,
        Variables::from([("action_id".to_string(), json!(203))]),
    );
    assert_eq!(outcome, RunOutcome::Completed { steps_executed: 3 });

    assert_eq!(
        fx.desktop.methods_attempted(),
        vec![
            ClickMethod::Invoke,
            ClickMethod::AccessibleClick,
            ClickMethod::ClickMessage
        ]
    );

    let store = fx.runner.store();
    assert_eq!(store.get("last_click_method"), Some(json!("click_message")));
    assert_eq!(store.get("last_app"), Some(json!("chrome")));
    assert_eq!(
        fx.clipboard.read().unwrap(),
        "minimized via click_message for action 203"
    );
}

#[test]
fn disabled_control_fails_run_as_unreachable_without_input() {
    let fx = fixture(ClickOptions {
        allow_focus_tap: true,
        ..ClickOptions::default()
    });
    let recipe = fx.cache.get("stop_download").unwrap();

    match fx.runner.run(&recipe, Variables::new()) {
        RunOutcome::Failed {
            step_index: 0,
            error: StepError::Unreachable { enabled, .. },
        } => assert!(!enabled),
        other => panic!("expected Unreachable at step 0, got {other:?}"),
    }
    assert!(fx.desktop.events().is_empty());
    assert!(fx.runner.store().get("last_report").is_none());
}

#[test]
fn recipes_are_cached_after_first_load() {
    let fx = fixture(ClickOptions::default());
    assert!(fx.cache.is_empty());
    let first = fx.cache.get("browser_minimize").unwrap();
    let second = fx.cache.get("browser_minimize").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.cache.len(), 1);
}
