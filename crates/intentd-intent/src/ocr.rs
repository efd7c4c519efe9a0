//! OCR Scanner: fires intents from markers rendered on screen.
//!
//! Each polling cycle captures the screen (or a configured region), runs the
//! recognizer and scans the text for `#intent# + <id> + [<command>]`
//! markers.  A marker stays on screen across many cycles but must fire only
//! once, so the scanner keeps a one-shot set keyed by `(id, fingerprint)`.
//! Entries never expire on a timer: an entry is dropped only when its marker
//! is absent from a later capture, after which the same marker fires again if
//! it is re-rendered.
//!
//! Capture or recognition failures are logged and the cycle is skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use intentd_kernel::Fingerprint;
use intentd_platform::{PlatformError, RecognizedText, Region, ScreenCapture, TextRecognizer};

use crate::dispatcher::{DispatchResult, IntentSink};
use crate::macros::find_markers;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Scanner timing and capture area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcrSettings {
    pub poll_interval: Duration,
    /// Upper bound on one capture plus recognition.
    pub capture_timeout: Duration,
    pub region: Option<Region>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            region: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FiredKey {
    id: Option<u64>,
    fingerprint: Fingerprint,
}

/// Screen-marker scanner.  Owns its one-shot cache; nothing else reads it.
pub struct OcrScanner {
    capture: Arc<dyn ScreenCapture>,
    recognizer: Arc<dyn TextRecognizer>,
    sink: Arc<dyn IntentSink>,
    settings: OcrSettings,
    fired: HashSet<FiredKey>,
}

impl OcrScanner {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        recognizer: Arc<dyn TextRecognizer>,
        sink: Arc<dyn IntentSink>,
        mut settings: OcrSettings,
    ) -> Self {
        settings.poll_interval = settings.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            capture,
            recognizer,
            sink,
            settings,
            fired: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &OcrSettings {
        &self.settings
    }

    /// Number of markers currently held in the one-shot cache.
    pub fn fired_len(&self) -> usize {
        self.fired.len()
    }

    /// Scan recognized fragments, submitting every newly visible marker.
    /// Returns the dispatch results of the markers that fired this cycle.
    pub fn process_fragments(&mut self, fragments: &[RecognizedText]) -> Vec<DispatchResult> {
        let text = fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.process_text(&text)
    }

    pub fn process_text(&mut self, text: &str) -> Vec<DispatchResult> {
        let mut visible = HashSet::new();
        let mut results = Vec::new();

        for marker in find_markers(text) {
            let Some(intent) = marker.to_intent() else {
                tracing::debug!(command = %marker.command, "marker produced no parsable macro");
                continue;
            };
            let key = FiredKey {
                id: marker.id,
                fingerprint: intent.fingerprint(),
            };
            visible.insert(key.clone());
            if self.fired.contains(&key) {
                continue;
            }

            tracing::info!(marker_id = ?marker.id, intent = %intent.name, "screen marker detected");
            let result = self.sink.submit(intent);
            // A sink failure leaves the marker eligible on the next cycle.
            if !matches!(result, DispatchResult::Rejected { .. }) {
                self.fired.insert(key);
            }
            results.push(result);
        }

        self.fired.retain(|key| visible.contains(key));
        results
    }

    /// One blocking capture, recognize and scan cycle.
    pub fn scan_once(&mut self) -> Result<Vec<DispatchResult>, PlatformError> {
        let fragments = capture_text(&*self.capture, &*self.recognizer, self.settings.region)?;
        Ok(self.process_fragments(&fragments))
    }

    /// Run the polling loop until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut this = self;
            tracing::info!(
                interval_ms = this.settings.poll_interval.as_millis() as u64,
                "OCR scanner started"
            );
            let mut ticker = tokio::time::interval(this.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let capture = Arc::clone(&this.capture);
                let recognizer = Arc::clone(&this.recognizer);
                let region = this.settings.region;
                let job = tokio::task::spawn_blocking(move || capture_text(&*capture, &*recognizer, region));

                let fragments = tokio::select! {
                    _ = token.cancelled() => break,
                    outcome = tokio::time::timeout(this.settings.capture_timeout, job) => outcome,
                };
                match fragments {
                    Ok(Ok(Ok(fragments))) => {
                        // Submitting loads recipes and may write intent files.
                        let dispatch = tokio::task::spawn_blocking(move || {
                            let fired = this.process_fragments(&fragments);
                            (this, fired)
                        });
                        match dispatch.await {
                            Ok((scanner, fired)) => {
                                this = scanner;
                                if !fired.is_empty() {
                                    tracing::debug!(count = fired.len(), "OCR cycle fired markers");
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "OCR dispatch panicked, scanner stopping");
                                break;
                            }
                        }
                    }
                    Ok(Ok(Err(e))) => tracing::warn!(error = %e, "OCR cycle failed"),
                    Ok(Err(e)) => tracing::error!(error = %e, "OCR capture task panicked"),
                    Err(_) => tracing::warn!(
                        timeout_ms = this.settings.capture_timeout.as_millis() as u64,
                        "OCR capture timed out"
                    ),
                }
            }
            tracing::info!("OCR scanner stopped");
        })
    }
}

fn capture_text(
    capture: &dyn ScreenCapture,
    recognizer: &dyn TextRecognizer,
    region: Option<Region>,
) -> Result<Vec<RecognizedText>, PlatformError> {
    let bitmap = capture.capture(region)?;
    recognizer.recognize(&bitmap)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use intentd_platform::simulated::{ScriptedScreen, TextFrameRecognizer};

    use super::*;
    use crate::intent::{ArgValue, Intent};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Intent>>,
        fail: bool,
    }

    impl IntentSink for Recorder {
        fn submit(&self, intent: Intent) -> DispatchResult {
            // Panics when called on an async worker thread.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.block_on(async {});
            }
            self.seen.lock().unwrap().push(intent);
            if self.fail {
                DispatchResult::Rejected { reason: "disk full".into() }
            } else {
                DispatchResult::Deferred { path: "x.json".into() }
            }
        }
    }

    fn scanner(recorder: Arc<Recorder>) -> (OcrScanner, Arc<ScriptedScreen>) {
        let screen = Arc::new(ScriptedScreen::new());
        let scanner = OcrScanner::new(
            screen.clone(),
            Arc::new(TextFrameRecognizer),
            recorder,
            OcrSettings::default(),
        );
        (scanner, screen)
    }

    #[test]
    fn marker_fires_once_while_visible_and_again_after_reappearing() {
        let recorder = Arc::new(Recorder::default());
        let (mut scanner, screen) = scanner(recorder.clone());

        screen.push_frame(["Quotes", "#intent# + 401 + [browser_open_home]"]);
        assert_eq!(scanner.scan_once().unwrap().len(), 1);
        for _ in 0..10 {
            assert!(scanner.scan_once().unwrap().is_empty());
        }
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);

        screen.push_frame(["Quotes"]);
        assert!(scanner.scan_once().unwrap().is_empty());
        assert_eq!(scanner.fired_len(), 0);

        screen.push_frame(["#intent# + 401 + [browser_open_home]"]);
        assert_eq!(scanner.scan_once().unwrap().len(), 1);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name, "browser_open_home");
        assert_eq!(seen[0].args["action_id"], ArgValue::Int(401));
    }

    #[test]
    fn different_ids_are_distinct_markers() {
        let recorder = Arc::new(Recorder::default());
        let (mut scanner, _) = scanner(recorder.clone());
        let fired = scanner.process_text("#intent# 1 [close_tab] #intent# 2 [close_tab]");
        assert_eq!(fired.len(), 2);
        assert_eq!(scanner.fired_len(), 2);
    }

    #[test]
    fn capture_failure_is_reported_and_keeps_cache() {
        let recorder = Arc::new(Recorder::default());
        let (mut scanner, screen) = scanner(recorder.clone());
        screen.push_frame(["#intent# 3 [report_status]"]);
        scanner.scan_once().unwrap();
        screen.push_failure("display asleep");
        assert!(matches!(scanner.scan_once(), Err(PlatformError::CaptureFailed { .. })));
        // the marker is still remembered: a failed cycle is not "absent"
        assert!(scanner.scan_once().unwrap().is_empty());
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejected_submission_retries_next_cycle() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let (mut scanner, _) = scanner(recorder.clone());
        scanner.process_text("#intent# 3 [report_status]");
        scanner.process_text("#intent# 3 [report_status]");
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
        assert_eq!(scanner.fired_len(), 0);
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let recorder = Arc::new(Recorder::default());
        let scanner = OcrScanner::new(
            Arc::new(ScriptedScreen::new()),
            Arc::new(TextFrameRecognizer),
            recorder,
            OcrSettings {
                poll_interval: Duration::from_millis(1),
                ..OcrSettings::default()
            },
        );
        assert_eq!(scanner.settings().poll_interval, MIN_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn loop_survives_failures_and_stops_on_cancel() {
        let recorder = Arc::new(Recorder::default());
        let screen = Arc::new(ScriptedScreen::new());
        screen.push_failure("boom");
        screen.push_frame(["#intent# 9 [browser_minimize]"]);
        let scanner = OcrScanner::new(
            screen.clone(),
            Arc::new(TextFrameRecognizer),
            recorder.clone(),
            OcrSettings {
                poll_interval: MIN_POLL_INTERVAL,
                ..OcrSettings::default()
            },
        );

        let token = CancellationToken::new();
        let handle = scanner.spawn(token.clone());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while screen.captures() < 4 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scanner stops")
            .expect("task joins");

        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
