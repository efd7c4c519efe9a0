//! Time-windowed dedupe cache.
//!
//! OCR and chat triggers are noisy: the same marker can be read on several
//! consecutive capture cycles.  The dispatcher records every admitted
//! [`Fingerprint`] here and suppresses identical ones until the window has
//! elapsed, regardless of which producer submitted them.
//!
//! Expired entries are pruned lazily on every check; there is no background
//! sweeper.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Canonical `(name, args)` identity of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self(canonical.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DedupeEntry {
    pub fingerprint: Fingerprint,
    pub first_seen: Instant,
    /// `None` when the window reaches past what the clock can represent.
    pub expiry: Option<Instant>,
}

impl DedupeEntry {
    fn live_at(&self, now: Instant) -> bool {
        self.expiry.is_none_or(|expiry| expiry > now)
    }
}

/// Outcome of [`DedupeCache::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeDecision {
    /// Not seen within the window; an entry has now been recorded.
    Fresh,
    /// An unexpired entry exists.
    Duplicate { expires_in: Duration },
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct DedupeCache {
    window: Duration,
    entries: Mutex<HashMap<Fingerprint, DedupeEntry>>,
}

impl DedupeCache {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check_and_record(&self, fingerprint: &Fingerprint) -> DedupeDecision {
        self.check_and_record_at(fingerprint, Instant::now())
    }

    /// Same as [`check_and_record`](Self::check_and_record) with an explicit
    /// clock reading.
    pub fn check_and_record_at(&self, fingerprint: &Fingerprint, now: Instant) -> DedupeDecision {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.live_at(now));
        let pruned = before - entries.len();
        if pruned > 0 {
            tracing::trace!(pruned, "expired dedupe entries pruned");
        }

        if let Some(entry) = entries.get(fingerprint) {
            return DedupeDecision::Duplicate {
                expires_in: entry
                    .expiry
                    .map_or(Duration::MAX, |expiry| expiry.saturating_duration_since(now)),
            };
        }

        entries.insert(
            fingerprint.clone(),
            DedupeEntry {
                fingerprint: fingerprint.clone(),
                first_seen: now,
                expiry: now.checked_add(self.window),
            },
        );
        DedupeDecision::Fresh
    }

    /// Number of entries currently held, including expired ones not yet
    /// pruned.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
