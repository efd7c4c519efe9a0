//! Runtime wiring for `intentd run`.
//!
//! [`Runtime::build`] loads the catalog, constructs the kernel, runner and
//! dispatcher from configuration.  [`Runtime::serve`] starts the producers
//! around them and blocks until the session ends: chat `quit`/`exit`, end
//! of chat input, or an emergency stop (hotkey or Ctrl-C).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use intentd_intent::{
    ChatBridge, Dispatcher, EmergencyCoordinator, IntentArchive, IntentCatalog, IntentFileWriter, IntentSink,
    IntentWatcher, KeywordMatcher, OcrScanner,
};
use intentd_kernel::{ContextStore, DedupeCache, Event, Executor, InterruptSignal, IpcBus};
use intentd_platform::Platform;
use intentd_runner::{ClickEngine, ClickOptions, DirectoryRecipeSource, HandlerRegistry, RecipeCache, RecipeRunner};

use crate::config::Config;
use crate::reporter::{Reporter, SourceTally};

/// Which producers to start.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub chat: bool,
    pub ocr: bool,
}

/// What happened during a session.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub tallies: BTreeMap<String, SourceTally>,
    /// Reason of the emergency stop that ended the session, if any.
    pub emergency: Option<String>,
}

pub struct Runtime {
    config: Config,
    platform: Platform,
    catalog: Arc<IntentCatalog>,
    recipes: RecipeCache,
    bus: IpcBus,
    executor: Executor,
    dispatcher: Dispatcher,
    archive: IntentArchive,
    coordinator: EmergencyCoordinator,
}

impl Runtime {
    pub fn build(config: Config, clicks: ClickOptions, platform: Platform) -> Result<Self> {
        let paths = &config.paths;
        let catalog = Arc::new(
            IntentCatalog::load(&paths.catalog)
                .with_context(|| format!("failed to load catalog {}", paths.catalog.display()))?,
        );
        info!(intents = catalog.len(), path = %paths.catalog.display(), "catalog loaded");

        let recipes = RecipeCache::new(Arc::new(DirectoryRecipeSource::new(paths.recipes_dir.clone())));

        let bus = IpcBus::new(config.dispatch.event_capacity);
        let executor = Executor::with_bus(bus.clone()).with_history_limit(config.dispatch.run_history);
        let signal = InterruptSignal::new();

        let engine = ClickEngine::new(Arc::clone(&platform.ui), signal.clone()).with_defaults(clicks);
        let handlers = HandlerRegistry::with_defaults(Some(Arc::clone(&platform.clipboard)));
        let runner = RecipeRunner::new(ContextStore::new(), handlers, engine, signal.clone());

        let archive = IntentArchive::new(paths.archive_dir.clone(), paths.rejected_dir.clone());
        let dispatcher = Dispatcher::new(
            Arc::clone(&catalog),
            recipes.clone(),
            runner,
            executor.clone(),
            DedupeCache::new(config.dispatch.dedupe_window()),
            bus.clone(),
        )
        .with_archive(archive.clone());

        let coordinator = EmergencyCoordinator::new(config.safety.combo()?, signal, executor.clone(), bus.clone());

        Ok(Self {
            config,
            platform,
            catalog,
            recipes,
            bus,
            executor,
            dispatcher,
            archive,
            coordinator,
        })
    }

    pub fn catalog(&self) -> &IntentCatalog {
        &self.catalog
    }

    pub fn coordinator(&self) -> &EmergencyCoordinator {
        &self.coordinator
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn bus(&self) -> &IpcBus {
        &self.bus
    }

    /// Load every recipe the catalog references.  Returns one message per
    /// intent whose recipe is missing or invalid.
    pub fn check_recipes(&self) -> Vec<String> {
        self.catalog
            .entries()
            .iter()
            .filter_map(|def| {
                self.recipes
                    .get(&def.recipe)
                    .err()
                    .map(|e| format!("intent `{}`: {e}", def.intent))
            })
            .collect()
    }

    /// Run the session.  `input`/`output` carry the chat bridge.
    pub async fn serve<R, W>(self, features: Features, input: R, output: W) -> Result<SessionSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let config = &self.config;
        let matcher = if features.chat && config.chat.enabled {
            Some(KeywordMatcher::new(&self.catalog, config.chat.min_score, config.chat.top_n)?)
        } else {
            None
        };

        let session = CancellationToken::new();
        let sink: Arc<dyn IntentSink> = Arc::new(self.dispatcher.clone());
        let watcher = IntentWatcher::new(config.paths.intents_dir.clone(), Arc::clone(&sink), self.archive.clone())
            .with_settle(config.dispatch.watch_settle())
            .spawn(session.clone())
            .context("failed to start the intent watcher")?;
        if let Err(e) = self.coordinator.register(&*self.platform.hotkeys) {
            session.cancel();
            return Err(e).context("failed to register the emergency hotkey");
        }

        let reporter = Reporter::new();
        let reporter_stop = CancellationToken::new();
        let reporter_task = reporter.spawn(&self.bus, reporter_stop.clone());
        let worker = self.executor.start();
        let ctrl_c = self.coordinator.spawn_ctrl_c(session.clone());
        // Cancelled by the emergency stop or at the end of the session.
        let producers = self.coordinator.producer_token().child_token();
        let scanner = self.spawn_scanner(features, &sink, producers.clone());

        self.bus.publish(Event::SystemEvent {
            kind: "startup".into(),
            message: format!("intentd ready with {} intents", self.catalog.len()),
        });

        let chat_result = if let Some(matcher) = matcher {
            ChatBridge::new(Arc::clone(&self.catalog), matcher, Arc::clone(&sink))
                .run(input, output, producers.clone())
                .await
                .context("chat bridge failed")
        } else {
            info!(combo = %self.coordinator.combo(), "chat disabled; waiting for an emergency stop or Ctrl-C");
            producers.cancelled().await;
            Ok(())
        };

        let emergency = self.coordinator.signal().reason().filter(|_| self.coordinator.is_triggered());
        if let Some(reason) = &emergency {
            warn!(reason = %reason, "session ended by emergency stop");
        }

        producers.cancel();
        session.cancel();
        join("OCR scanner", scanner).await;
        join("intent watcher", Some(watcher)).await;
        join("interrupt listener", Some(ctrl_c)).await;

        // Runs already queued still drain unless the emergency cancelled them.
        self.executor.shutdown();
        join("executor", Some(worker)).await;

        if let Err(e) = self.coordinator.unregister(&*self.platform.hotkeys) {
            warn!(error = %e, "failed to unregister the emergency hotkey");
        }
        self.bus.publish(Event::SystemEvent {
            kind: "shutdown".into(),
            message: "intentd stopped".into(),
        });
        reporter_stop.cancel();
        join("reporter", Some(reporter_task)).await;

        chat_result?;
        Ok(SessionSummary {
            tallies: reporter.summary(),
            emergency,
        })
    }

    fn spawn_scanner(
        &self,
        features: Features,
        sink: &Arc<dyn IntentSink>,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let ocr = &self.config.ocr;
        if !features.ocr || !ocr.enabled {
            info!("OCR scanner disabled");
            return None;
        }
        let (Some(capture), Some(recognizer)) = (self.platform.capture.clone(), self.platform.recognizer.clone())
        else {
            info!("no screen capture backend on this host; OCR scanner not started");
            return None;
        };

        let sink: Arc<dyn IntentSink> = if ocr.submit_via_files {
            Arc::new(IntentFileWriter::new(self.config.paths.intents_dir.clone()))
        } else {
            Arc::clone(sink)
        };
        Some(OcrScanner::new(capture, recognizer, sink, ocr.settings()).spawn(token))
    }
}

async fn join(task: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle
        && let Err(e) = handle.await
    {
        warn!(task, error = %e, "background task ended abnormally");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use intentd_platform::simulated::{ManualHotkeys, MemoryClipboard, ScriptedScreen, TextFrameRecognizer};
    use intentd_platform::Clipboard;

    use super::*;

    const CATALOG: &str = r#"
[[intents]]
intent = "say_hello"
description = "Greet somebody through the clipboard"
args = ["name", "action_id"]
synonyms = ["greet"]

[[intents]]
intent = "broken"
recipe = "does_not_exist"
"#;

    const SAY_HELLO: &str = r#"
[[steps]]
kind = "report"
message = "hello ${name}"
clipboard = true
"#;

    fn config_in(root: &Path) -> Config {
        std::fs::create_dir_all(root.join("recipes")).expect("recipes dir");
        std::fs::write(root.join("catalog.toml"), CATALOG).expect("catalog");
        std::fs::write(root.join("recipes/say_hello.toml"), SAY_HELLO).expect("recipe");

        let mut config = Config::default();
        config.paths.intents_dir = root.join("intents");
        config.paths.archive_dir = root.join("archive");
        config.paths.rejected_dir = root.join("rejected");
        config.paths.recipes_dir = root.join("recipes");
        config.paths.catalog = root.join("catalog.toml");
        config
    }

    #[test]
    fn check_recipes_reports_missing_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Runtime::build(config_in(dir.path()), ClickOptions::default(), Platform::headless())
            .expect("builds");
        let problems = runtime.check_recipes();
        assert_eq!(problems.len(), 1, "{problems:?}");
        assert!(problems[0].contains("broken"));
    }

    #[test]
    fn missing_catalog_fails_the_build() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(dir.path());
        config.paths.catalog = dir.path().join("nope.toml");
        assert!(Runtime::build(config, ClickOptions::default(), Platform::headless()).is_err());
    }

    #[tokio::test]
    async fn chat_macro_runs_and_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clipboard = Arc::new(MemoryClipboard::new());
        let platform = Platform {
            clipboard: clipboard.clone(),
            ..Platform::headless()
        };
        let runtime = Runtime::build(config_in(dir.path()), ClickOptions::default(), platform).expect("builds");

        let mut output = Vec::new();
        let summary = runtime
            .serve(
                Features { chat: true, ocr: true },
                &b"[macro:say_hello name=ada]\nquit\n"[..],
                &mut output,
            )
            .await
            .expect("session ends cleanly");

        let output = String::from_utf8(output).expect("utf8");
        assert!(output.contains("say_hello"), "{output}");
        assert_eq!(clipboard.read().expect("clipboard"), "hello ada");
        assert_eq!(summary.tallies["chat"].completed, 1);
        assert!(summary.emergency.is_none());
    }

    #[tokio::test]
    async fn ocr_markers_can_be_written_as_intent_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let screen = Arc::new(ScriptedScreen::new());
        screen.push_frame(["#intent# + 7 + [say_hello name=bob]"]);
        let clipboard = Arc::new(MemoryClipboard::new());
        let platform = Platform {
            capture: Some(screen.clone()),
            recognizer: Some(Arc::new(TextFrameRecognizer)),
            clipboard: clipboard.clone(),
            ..Platform::headless()
        };
        let mut config = config_in(dir.path());
        config.ocr.poll_interval_ms = 100;
        config.ocr.submit_via_files = true;
        let archive = config.paths.archive_dir.clone();
        let runtime = Runtime::build(config, ClickOptions::default(), platform).expect("builds");
        let coordinator = runtime.coordinator().clone();
        let mut events = runtime.bus().subscribe();

        let session = tokio::spawn(runtime.serve(
            Features { chat: false, ocr: true },
            tokio::io::empty(),
            tokio::io::sink(),
        ));

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.expect("bus open");
                if matches!(*event, Event::RunFinished { .. }) {
                    break;
                }
            }
        })
        .await
        .expect("run finishes");
        coordinator.trigger("test over");

        let summary = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session ends")
            .expect("task joins")
            .expect("session ok");
        assert_eq!(clipboard.read().expect("clipboard"), "hello bob");
        assert_eq!(summary.tallies["file"].completed, 1);
        assert_eq!(summary.emergency.as_deref(), Some("test over"));
        let archived = std::fs::read_dir(&archive).expect("archive dir").count();
        assert_eq!(archived, 1);
    }

    #[tokio::test]
    async fn hotkey_ends_a_session_without_chat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hotkeys = Arc::new(ManualHotkeys::new());
        let platform = Platform {
            hotkeys: hotkeys.clone(),
            ..Platform::headless()
        };
        let runtime = Runtime::build(config_in(dir.path()), ClickOptions::default(), platform).expect("builds");
        let combo = runtime.coordinator().combo();

        let session = tokio::spawn(runtime.serve(
            Features { chat: false, ocr: false },
            tokio::io::empty(),
            tokio::io::sink(),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !hotkeys.is_registered(combo) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hotkeys.press(combo));

        let summary = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session ends")
            .expect("task joins")
            .expect("session ok");
        assert!(summary.emergency.expect("emergency reason").starts_with("hotkey"));
        assert!(!hotkeys.is_registered(combo));
    }
}
