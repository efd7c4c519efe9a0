//! Keyword matching of free-form chat text against the Intent Catalog.
//!
//! All intent names (plus their space-separated form) and synonyms are
//! compiled into a single [`aho_corasick`] automaton.  One overlapping scan
//! of the lowercased utterance yields every keyword hit, which is then scored
//! per intent:
//!
//! | Hit | Score |
//! |-----|-------|
//! | intent name or its spaced form | +3 (once) |
//! | each distinct synonym | +2 |
//!
//! A match is confident when the best score reaches `min_score` and is
//! strictly greater than the runner-up; otherwise the top-N positive
//! candidates are surfaced instead of guessing.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::Regex;

use crate::catalog::IntentCatalog;
use crate::error::{IntentError, Result};
use crate::intent::{ArgValue, Args};

pub const DEFAULT_MIN_SCORE: u32 = 2;
pub const DEFAULT_TOP_N: usize = 3;

const NAME_WEIGHT: u32 = 3;
const SYNONYM_WEIGHT: u32 = 2;

static PARAM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*[:=]\s*([\w./:-]+)").expect("param pattern is valid"));

static TOPIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:for|about)\s+([\w.-]+)").expect("topic pattern is valid"));

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A scored intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub intent: String,
    pub score: u32,
}

/// Outcome of matching one utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordMatch {
    /// A single intent clearly won; `args` were extracted from the text.
    Confident { intent: String, score: u32, args: Args },
    /// No clear winner.  Holds up to `top_n` candidates with a positive
    /// score, best first; empty when nothing matched at all.
    Candidates(Vec<Candidate>),
}

#[derive(Debug, Clone, Copy)]
enum Hit {
    Name,
    Synonym,
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Scores utterances against a catalog snapshot.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    automaton: Option<AhoCorasick>,
    /// For each automaton pattern, the intents it counts towards.
    targets: Vec<Vec<(usize, Hit)>>,
    intents: Vec<String>,
    declared_args: Vec<Vec<String>>,
    min_score: u32,
    top_n: usize,
}

impl KeywordMatcher {
    pub fn new(catalog: &IntentCatalog, min_score: u32, top_n: usize) -> Result<Self> {
        let mut patterns: Vec<String> = Vec::new();
        let mut pattern_ids: HashMap<String, usize> = HashMap::new();
        let mut targets: Vec<Vec<(usize, Hit)>> = Vec::new();

        let mut add = |keyword: String, intent_idx: usize, hit: Hit| {
            if keyword.is_empty() {
                return;
            }
            let id = *pattern_ids.entry(keyword.clone()).or_insert_with(|| {
                patterns.push(keyword);
                targets.push(Vec::new());
                patterns.len() - 1
            });
            targets[id].push((intent_idx, hit));
        };

        for (idx, def) in catalog.entries().iter().enumerate() {
            add(def.intent.clone(), idx, Hit::Name);
            let spaced = def.intent.replace(['_', '-', '.'], " ");
            if spaced != def.intent {
                add(spaced, idx, Hit::Name);
            }
            for synonym in &def.synonyms {
                add(synonym.to_lowercase(), idx, Hit::Synonym);
            }
        }

        let automaton = if patterns.is_empty() {
            None
        } else {
            let ac = AhoCorasick::new(&patterns).map_err(|e| IntentError::MatcherBuild {
                reason: e.to_string(),
            })?;
            tracing::trace!(count = patterns.len(), "keyword automaton built");
            Some(ac)
        };

        Ok(Self {
            automaton,
            targets,
            intents: catalog.entries().iter().map(|d| d.intent.clone()).collect(),
            declared_args: catalog.entries().iter().map(|d| d.args.clone()).collect(),
            min_score,
            top_n,
        })
    }

    /// Every intent with a positive score, best first.  Ties keep catalog
    /// order.
    pub fn rank(&self, text: &str) -> Vec<Candidate> {
        let lowered = text.trim().to_lowercase();
        let Some(ac) = self.automaton.as_ref() else {
            return Vec::new();
        };
        if lowered.is_empty() {
            return Vec::new();
        }

        let mut seen_patterns = HashSet::new();
        let mut name_hit = vec![false; self.intents.len()];
        let mut scores = vec![0u32; self.intents.len()];

        for mat in ac.find_overlapping_iter(&lowered) {
            let pid = mat.pattern().as_usize();
            if !seen_patterns.insert(pid) {
                continue;
            }
            for &(idx, hit) in &self.targets[pid] {
                match hit {
                    Hit::Name if !name_hit[idx] => {
                        name_hit[idx] = true;
                        scores[idx] += NAME_WEIGHT;
                    }
                    Hit::Name => {}
                    Hit::Synonym => scores[idx] += SYNONYM_WEIGHT,
                }
            }
        }

        let mut ranked: Vec<(usize, u32)> = scores
            .into_iter()
            .enumerate()
            .filter(|&(_, score)| score > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .map(|(idx, score)| Candidate {
                intent: self.intents[idx].clone(),
                score,
            })
            .collect()
    }

    pub fn match_text(&self, text: &str) -> KeywordMatch {
        let mut ranked = self.rank(text);
        let best = ranked.first().map_or(0, |c| c.score);
        let runner_up = ranked.get(1).map_or(0, |c| c.score);

        if best >= self.min_score && best > runner_up {
            let winner = ranked.swap_remove(0);
            let args = self.extract_for(&winner.intent, text);
            tracing::debug!(intent = %winner.intent, score = winner.score, "confident keyword match");
            return KeywordMatch::Confident {
                intent: winner.intent,
                score: winner.score,
                args,
            };
        }

        ranked.truncate(self.top_n);
        tracing::debug!(candidates = ranked.len(), best, "keyword match inconclusive");
        KeywordMatch::Candidates(ranked)
    }

    fn extract_for(&self, intent: &str, text: &str) -> Args {
        let mut args = extract_args(text);
        if let Some(idx) = self.intents.iter().position(|i| i == intent) {
            let declared = &self.declared_args[idx];
            if !declared.is_empty() {
                args.retain(|key, _| declared.contains(key));
            }
        }
        args
    }
}

/// Pull `key=value` / `key: value` pairs from free text, plus
/// `for|about <word>` as `topic` when no explicit topic was given.
pub fn extract_args(text: &str) -> Args {
    let mut args: Args = PARAM_PATTERN
        .captures_iter(text)
        .map(|caps| (caps[1].to_lowercase(), ArgValue::from_unquoted(&caps[2])))
        .collect();
    if !args.contains_key("topic")
        && let Some(caps) = TOPIC_PATTERN.captures(text)
    {
        args.insert("topic".into(), ArgValue::Str(caps[1].to_owned()));
    }
    args
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IntentDefinition;

    fn catalog() -> IntentCatalog {
        IntentCatalog::from_definitions([
            IntentDefinition::new("browser_open_home", "browser_home")
                .with_synonyms(["open browser", "home page"]),
            IntentDefinition::new("export_quotes", "export_quotes")
                .with_args(["symbol", "topic"])
                .with_synonyms(["export quotes", "quotes"]),
            IntentDefinition::new("browser_minimize", "browser_minimize").with_synonyms(["minimize"]),
        ])
        .expect("valid catalog")
    }

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::new(&catalog(), DEFAULT_MIN_SCORE, DEFAULT_TOP_N).expect("matcher builds")
    }

    #[test]
    fn spaced_name_and_synonyms_score() {
        let ranked = matcher().rank("Please export quotes for AAPL");
        assert_eq!(
            ranked[0],
            Candidate {
                intent: "export_quotes".into(),
                // spaced name (+3), "export quotes" and "quotes" synonyms (+2 each)
                score: 7
            }
        );
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn confident_match_extracts_declared_args() {
        match matcher().match_text("export quotes symbol=MSFT about tech window: main") {
            KeywordMatch::Confident { intent, args, .. } => {
                assert_eq!(intent, "export_quotes");
                assert_eq!(args["symbol"], ArgValue::Str("MSFT".into()));
                assert_eq!(args["topic"], ArgValue::Str("tech".into()));
                // undeclared keys are dropped
                assert!(!args.contains_key("window"));
            }
            other => panic!("expected Confident, got {other:?}"),
        }
    }

    #[test]
    fn tie_yields_candidates() {
        // "open browser" (+2) vs "minimize" (+2)
        match matcher().match_text("open browser and minimize") {
            KeywordMatch::Candidates(c) => {
                assert_eq!(c.len(), 2);
                assert_eq!(c[0].intent, "browser_open_home");
                assert_eq!(c[1].intent, "browser_minimize");
            }
            other => panic!("expected Candidates, got {other:?}"),
        }
    }

    #[test]
    fn no_match_yields_empty_candidates() {
        assert_eq!(matcher().match_text("what is the weather"), KeywordMatch::Candidates(vec![]));
        assert_eq!(matcher().match_text("   "), KeywordMatch::Candidates(vec![]));
    }

    #[test]
    fn below_threshold_is_not_confident() {
        let strict = KeywordMatcher::new(&catalog(), 5, 1).expect("matcher builds");
        match strict.match_text("minimize") {
            KeywordMatch::Candidates(c) => assert_eq!(c.len(), 1),
            other => panic!("expected Candidates, got {other:?}"),
        }
    }

    #[test]
    fn empty_catalog_matches_nothing() {
        let empty = KeywordMatcher::new(&IntentCatalog::default(), 2, 3).expect("matcher builds");
        assert!(empty.rank("anything").is_empty());
    }

    #[test]
    fn topic_extraction_needs_word_boundary() {
        assert!(!extract_args("platform x").contains_key("topic"));
        assert_eq!(extract_args("news about rust")["topic"], ArgValue::Str("rust".into()));
        assert_eq!(extract_args("topic=go for rust")["topic"], ArgValue::Str("go".into()));
    }
}
