//! Intent producers and dispatch for intentd.
//!
//! Every producer builds an [`Intent`] and submits it to an [`IntentSink`],
//! normally the [`Dispatcher`]:
//!
//! - **[`watcher`]** -- [`IntentWatcher`] picks up intent files dropped into
//!   a directory and archives or rejects them.
//! - **[`ocr`]** -- [`OcrScanner`] fires on-screen `#intent#` markers once
//!   per appearance.
//! - **[`chat`]** -- [`ChatBridge`] handles `[macro:...]` lines and free
//!   text, with keyword matching ([`keywords`]) and an optional
//!   [`IntentSuggester`] ([`suggest`]).
//!
//! The [`dispatcher`] dedupes by fingerprint, resolves names through the
//! [`IntentCatalog`] and queues recipe runs on the single-lane executor.
//! The [`emergency`] coordinator cancels all of it at once.

pub mod catalog;
pub mod chat;
pub mod dispatcher;
pub mod emergency;
pub mod error;
pub mod files;
pub mod intent;
pub mod keywords;
pub mod macros;
pub mod ocr;
pub mod suggest;
pub mod watcher;

pub use catalog::{IntentCatalog, IntentDefinition};
pub use chat::{ChatBridge, ChatReply, MacroReply, MatchVia};
pub use dispatcher::{DispatchResult, Dispatcher, IntentSink};
pub use emergency::EmergencyCoordinator;
pub use error::{IntentError, Result};
pub use files::{IntentArchive, IntentFileWriter};
pub use intent::{ArgValue, Args, Intent, IntentDocument, IntentSource};
pub use keywords::{Candidate, KeywordMatch, KeywordMatcher};
pub use macros::{Marker, MacroInvocation, find_markers, parse_macros};
pub use ocr::{OcrScanner, OcrSettings};
pub use suggest::{IntentSuggester, PromptSuggester, Suggestion};
pub use watcher::{FileOutcome, IntentWatcher};
