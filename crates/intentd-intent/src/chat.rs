//! Chat Bridge: line-oriented input to intents.
//!
//! Each line takes one of two paths:
//!
//! 1. **Macros.**  `[macro:<intent> key=value ...]` occurrences are parsed
//!    and dispatched in order.  The built-in `list_intents` macro filters the
//!    catalog by `topic` and answers with a table; it never reaches the
//!    dispatcher.
//! 2. **Free text.**  The line is scored against the catalog by keyword.  A
//!    confident match is dispatched; otherwise the optional suggester is
//!    consulted, and failing that the top keyword candidates are returned to
//!    the user instead of guessing.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::catalog::IntentCatalog;
use crate::dispatcher::{DispatchResult, IntentSink};
use crate::error::{IntentError, Result};
use crate::intent::{Intent, IntentSource};
use crate::keywords::{Candidate, KeywordMatch, KeywordMatcher};
use crate::macros::{looks_like_macro, parse_macros};
use crate::suggest::IntentSuggester;

/// Name of the built-in catalog listing macro.
pub const LIST_INTENTS: &str = "list_intents";

const GREETING: &str =
    "Chat bridge ready. Enter commands like [macro:export_quotes symbol=AAPL]; type 'quit' to exit.";

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// How a free-text line was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVia {
    Keywords,
    Suggestion,
}

/// Result of one macro on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroReply {
    Dispatched { intent: String, result: DispatchResult },
    Listed { topic: String, table: String },
}

/// The bridge's answer to one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    Empty,
    Quit,
    Macros(Vec<MacroReply>),
    Dispatched {
        intent: String,
        via: MatchVia,
        result: DispatchResult,
    },
    /// No confident match.  Empty when nothing matched at all.
    Candidates(Vec<Candidate>),
    Malformed { reason: String },
}

impl fmt::Display for ChatReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Quit => f.write_str("bye"),
            Self::Macros(replies) => {
                for (i, reply) in replies.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    match reply {
                        MacroReply::Dispatched { intent, result } => write!(f, "{intent}: {result}")?,
                        MacroReply::Listed { topic, table } if topic.is_empty() => write!(f, "{table}")?,
                        MacroReply::Listed { topic, table } => write!(f, "intents matching `{topic}`:\n{table}")?,
                    }
                }
                Ok(())
            }
            Self::Dispatched { intent, via, result } => {
                let via = match via {
                    MatchVia::Keywords => "keywords",
                    MatchVia::Suggestion => "suggestion",
                };
                write!(f, "{intent} (matched by {via}): {result}")
            }
            Self::Candidates(candidates) if candidates.is_empty() => f.write_str(
                "No intent matched. Embed commands with the form [macro:name key=value ...] or try [macro:list_intents].",
            ),
            Self::Candidates(candidates) => {
                let names: Vec<String> = candidates
                    .iter()
                    .map(|c| format!("{} (score {})", c.intent, c.score))
                    .collect();
                write!(f, "Not sure which intent you meant. Candidates: {}", names.join(", "))
            }
            Self::Malformed { reason } => write!(f, "Could not parse macro: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Turns chat lines into intents.
#[derive(Clone)]
pub struct ChatBridge {
    catalog: Arc<IntentCatalog>,
    matcher: Arc<KeywordMatcher>,
    sink: Arc<dyn IntentSink>,
    suggester: Option<Arc<dyn IntentSuggester>>,
}

impl ChatBridge {
    pub fn new(catalog: Arc<IntentCatalog>, matcher: KeywordMatcher, sink: Arc<dyn IntentSink>) -> Self {
        Self {
            catalog,
            matcher: Arc::new(matcher),
            sink,
            suggester: None,
        }
    }

    /// Consult `suggester` when keyword matching is inconclusive.
    pub fn with_suggester(mut self, suggester: Arc<dyn IntentSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn handle_line(&self, line: &str) -> ChatReply {
        let line = line.trim();
        if line.is_empty() {
            return ChatReply::Empty;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            return ChatReply::Quit;
        }

        let macros = parse_macros(line);
        if !macros.is_empty() {
            let replies = macros
                .into_iter()
                .map(|m| {
                    if m.name == LIST_INTENTS {
                        let topic = m.args.get("topic").map(|v| v.canonical()).unwrap_or_default();
                        let table = IntentCatalog::render_table(self.catalog.filter_by_topic(&topic));
                        return MacroReply::Listed { topic, table };
                    }
                    let intent = m.to_intent(IntentSource::Chat);
                    let name = intent.name.clone();
                    let result = self.sink.submit(intent);
                    tracing::info!(intent = %name, result = %result, "chat macro handled");
                    MacroReply::Dispatched { intent: name, result }
                })
                .collect();
            return ChatReply::Macros(replies);
        }

        if looks_like_macro(line) {
            tracing::warn!(line, "malformed chat macro");
            return ChatReply::Malformed {
                reason: "expected [macro:<intent> key=value ...]".into(),
            };
        }

        self.handle_free_text(line)
    }

    fn handle_free_text(&self, text: &str) -> ChatReply {
        let candidates = match self.matcher.match_text(text) {
            KeywordMatch::Confident { intent, args, .. } => {
                let result = self.sink.submit(Intent::new(&intent, IntentSource::Chat).with_args(args));
                return ChatReply::Dispatched {
                    intent,
                    via: MatchVia::Keywords,
                    result,
                };
            }
            KeywordMatch::Candidates(candidates) => candidates,
        };

        if let Some(suggester) = &self.suggester
            && let Some(suggestion) = suggester.suggest(&self.catalog, text)
        {
            if self.catalog.contains(&suggestion.intent) {
                let intent = Intent::new(&suggestion.intent, IntentSource::Chat).with_args(suggestion.args);
                let name = intent.name.clone();
                let result = self.sink.submit(intent);
                return ChatReply::Dispatched {
                    intent: name,
                    via: MatchVia::Suggestion,
                    result,
                };
            }
            tracing::warn!(intent = %suggestion.intent, "discarding suggestion for unknown intent");
        }

        tracing::debug!(candidates = candidates.len(), "no confident intent for chat text");
        ChatReply::Candidates(candidates)
    }

    /// Serve lines from `reader` until end of input, `quit`/`exit`, or
    /// cancellation of `token`.  Replies are written to `writer`.
    pub async fn run<R, W>(&self, reader: R, mut writer: W, token: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let io_err = |e| IntentError::io("<chat>", e);
        writer
            .write_all(format!("{GREETING}\n").as_bytes())
            .await
            .map_err(io_err)?;
        writer.flush().await.map_err(io_err)?;
        tracing::info!("chat bridge started");

        // Raw bytes so a line that is not UTF-8 is decoded lossily instead
        // of ending the loop.
        let mut reader = reader;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read.map_err(io_err)?,
            };
            if read == 0 {
                tracing::info!("chat input closed");
                break;
            }

            let line = match String::from_utf8_lossy(&buf) {
                Cow::Borrowed(text) => text.to_owned(),
                Cow::Owned(text) => {
                    tracing::warn!(bytes = buf.len(), "chat line is not valid UTF-8, decoded lossily");
                    text
                }
            };
            // Dispatch loads recipes from disk.
            let bridge = self.clone();
            let reply = match tokio::task::spawn_blocking(move || bridge.handle_line(&line)).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, "chat line handler panicked");
                    continue;
                }
            };
            if reply == ChatReply::Quit {
                break;
            }
            if reply != ChatReply::Empty {
                writer
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .map_err(io_err)?;
                writer.flush().await.map_err(io_err)?;
            }
        }
        tracing::info!("chat bridge stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::IntentDefinition;
    use crate::intent::ArgValue;
    use crate::suggest::Suggestion;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Intent>>,
    }

    impl IntentSink for Recorder {
        fn submit(&self, intent: Intent) -> DispatchResult {
            // Panics when called on an async worker thread.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.block_on(async {});
            }
            self.seen.lock().unwrap().push(intent);
            DispatchResult::Deferred { path: "i.json".into() }
        }
    }

    fn bridge() -> (ChatBridge, Arc<Recorder>) {
        let catalog = Arc::new(
            IntentCatalog::from_definitions([
                IntentDefinition::new("browser_minimize", "browser_minimize")
                    .describe("Minimize the browser")
                    .with_synonyms(["minimize"])
                    .with_topics(["browser"]),
                IntentDefinition::new("export_quotes", "export_quotes")
                    .describe("Export quotes")
                    .with_args(["symbol"])
                    .with_synonyms(["export quotes"])
                    .with_topics(["finance"]),
                IntentDefinition::new("browser_open_home", "browser_home").with_synonyms(["open browser"]),
            ])
            .expect("valid catalog"),
        );
        let matcher = KeywordMatcher::new(&catalog, 2, 3).expect("matcher builds");
        let recorder = Arc::new(Recorder::default());
        (ChatBridge::new(catalog, matcher, recorder.clone()), recorder)
    }

    #[test]
    fn macro_dispatches_typed_args() {
        let (b, rec) = bridge();
        let reply = b.handle_line("[macro:browser_minimize action_id=203]");
        assert!(matches!(&reply, ChatReply::Macros(r) if r.len() == 1), "got {reply:?}");

        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen[0].name, "browser_minimize");
        assert_eq!(seen[0].args.len(), 1);
        assert_eq!(seen[0].args["action_id"], ArgValue::Int(203));
        assert_eq!(seen[0].source, IntentSource::Chat);
    }

    #[test]
    fn list_intents_filters_without_dispatching() {
        let (b, rec) = bridge();
        match b.handle_line("[macro:list_intents topic=finance]") {
            ChatReply::Macros(replies) => match &replies[0] {
                MacroReply::Listed { topic, table } => {
                    assert_eq!(topic, "finance");
                    assert!(table.contains("export_quotes"));
                    assert!(!table.contains("browser_minimize"));
                }
                other => panic!("expected Listed, got {other:?}"),
            },
            other => panic!("expected Macros, got {other:?}"),
        }
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn free_text_confident_match() {
        let (b, rec) = bridge();
        let reply = b.handle_line("please export quotes symbol=TSLA");
        assert!(
            matches!(reply, ChatReply::Dispatched { via: MatchVia::Keywords, ref intent, .. } if intent == "export_quotes"),
            "got {reply:?}"
        );
        assert_eq!(rec.seen.lock().unwrap()[0].args["symbol"], ArgValue::Str("TSLA".into()));
    }

    #[test]
    fn inconclusive_text_returns_candidates_without_dispatch() {
        let (b, rec) = bridge();
        match b.handle_line("open browser then minimize") {
            ChatReply::Candidates(c) => assert_eq!(c.len(), 2),
            other => panic!("expected Candidates, got {other:?}"),
        }
        assert_eq!(b.handle_line("tell me a joke"), ChatReply::Candidates(vec![]));
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn suggester_used_only_when_inconclusive_and_known() {
        let (b, rec) = bridge();
        let b = b.with_suggester(Arc::new(|_: &IntentCatalog, text: &str| {
            let intent = if text.contains("joke") { "tell_joke" } else { "browser_open_home" };
            Some(Suggestion {
                intent: intent.into(),
                args: Default::default(),
            })
        }));

        let reply = b.handle_line("take me to the start page");
        assert!(matches!(reply, ChatReply::Dispatched { via: MatchVia::Suggestion, .. }), "got {reply:?}");

        // unknown suggestions are discarded
        assert!(matches!(b.handle_line("tell me a joke"), ChatReply::Candidates(_)));
        assert_eq!(rec.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_macro_is_reported() {
        let (b, rec) = bridge();
        assert!(matches!(b.handle_line("[macro: oops]"), ChatReply::Malformed { .. }));
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_loop_stops_on_quit() {
        let (b, rec) = bridge();
        let input: &[u8] = b"[macro:browser_minimize]\n\nquit\n[macro:export_quotes]\n";
        let mut output = Vec::new();
        b.run(tokio::io::BufReader::new(input), &mut output, CancellationToken::new())
            .await
            .expect("loop runs");

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Chat bridge ready."));
        assert!(text.contains("browser_minimize: deferred to i.json"));
        assert_eq!(rec.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_loop() {
        let (b, rec) = bridge();
        let input: &[u8] = b"\xff\xfe garbage\n[macro:browser_minimize action_id=203]\n";
        let mut output = Vec::new();
        b.run(tokio::io::BufReader::new(input), &mut output, CancellationToken::new())
            .await
            .expect("loop survives bad bytes");

        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name, "browser_minimize");
        assert_eq!(seen[0].args["action_id"], ArgValue::Int(203));
        assert!(String::from_utf8_lossy(&output).contains("browser_minimize: deferred to i.json"));
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancel() {
        let (b, _) = bridge();
        let (client, server) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        token.cancel();
        b.run(tokio::io::BufReader::new(server), tokio::io::sink(), token)
            .await
            .expect("loop exits");
        drop(client);
    }
}
