//! Intent Catalog: the read-only mapping from intent name to recipe.
//!
//! The catalog is loaded once from a TOML manifest of `[[intents]]` rows and
//! treated as an immutable snapshot.  Besides resolving names for the
//! dispatcher it feeds the keyword matcher, the suggestion strategy, the
//! `list_intents` macro and the `catalog` subcommand.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result};

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDefinition {
    pub intent: String,
    /// Recipe identifier.  Defaults to the intent name when omitted.
    #[serde(default)]
    pub recipe: String,
    #[serde(default)]
    pub description: String,
    /// Declared argument names.  When non-empty, free-text argument
    /// extraction keeps only these keys.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl IntentDefinition {
    pub fn new(intent: impl Into<String>, recipe: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            recipe: recipe.into(),
            description: String::new(),
            args: Vec::new(),
            synonyms: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms = synonyms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    fn matches_topic(&self, topic: &str) -> bool {
        self.intent.to_lowercase().contains(topic)
            || self.description.to_lowercase().contains(topic)
            || self.synonyms.iter().any(|s| s.to_lowercase().contains(topic))
            || self.topics.iter().any(|t| t.to_lowercase().contains(topic))
    }

    fn normalize(&mut self) {
        self.intent = self.intent.trim().to_lowercase();
        self.recipe = self.recipe.trim().to_owned();
        if self.recipe.is_empty() {
            self.recipe = self.intent.clone();
        }
        self.args = self.args.iter().map(|a| a.trim().to_lowercase()).filter(|a| !a.is_empty()).collect();
        self.synonyms = self
            .synonyms
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    intents: Vec<IntentDefinition>,
}

/// Immutable intent catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct IntentCatalog {
    entries: Vec<IntentDefinition>,
    index: HashMap<String, usize>,
}

impl IntentCatalog {
    /// Build a catalog from definitions.  Names are lowercased; a repeated
    /// name is an error.
    pub fn from_definitions(definitions: impl IntoIterator<Item = IntentDefinition>) -> Result<Self> {
        let mut entries = Vec::new();
        let mut index = HashMap::new();
        for mut def in definitions {
            def.normalize();
            if def.intent.is_empty() {
                tracing::warn!("skipping catalog row without an intent name");
                continue;
            }
            if index.insert(def.intent.clone(), entries.len()).is_some() {
                return Err(IntentError::DuplicateIntent { intent: def.intent });
            }
            entries.push(def);
        }
        Ok(Self { entries, index })
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(text).map_err(|e| IntentError::CatalogInvalid {
            reason: e.to_string(),
        })?;
        Self::from_definitions(manifest.intents)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IntentError::io(path, e))?;
        let catalog = Self::from_toml(&text).map_err(|e| match e {
            IntentError::CatalogInvalid { reason } => IntentError::CatalogInvalid {
                reason: format!("{}: {reason}", path.display()),
            },
            other => other,
        })?;
        tracing::info!(path = %path.display(), intents = catalog.len(), "intent catalog loaded");
        Ok(catalog)
    }

    pub fn resolve(&self, name: &str) -> Option<&IntentDefinition> {
        self.index
            .get(&name.trim().to_lowercase())
            .map(|&idx| &self.entries[idx])
    }

    /// Recipe identifier for an intent name.
    pub fn recipe_for(&self, name: &str) -> Option<&str> {
        self.resolve(name).map(|def| def.recipe.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Entries in manifest order.
    pub fn entries(&self) -> &[IntentDefinition] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose name, description, synonyms or topics contain `topic`
    /// (case-insensitive).  An empty topic returns everything.
    pub fn filter_by_topic(&self, topic: &str) -> Vec<&IntentDefinition> {
        let topic = topic.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|def| topic.is_empty() || def.matches_topic(&topic))
            .collect()
    }

    /// Render an aligned `Intent | Recipe | Description` table.
    pub fn render_table<'a>(entries: impl IntoIterator<Item = &'a IntentDefinition>) -> String {
        const HEADERS: [&str; 3] = ["Intent", "Recipe", "Description"];

        let rows: Vec<[&str; 3]> = entries
            .into_iter()
            .map(|e| [e.intent.as_str(), e.recipe.as_str(), e.description.as_str()])
            .collect();

        let mut widths = HEADERS.map(|h| h.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let format_row = |cells: [&str; 3]| {
            let padded: Vec<String> = cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect();
            format!("| {} |", padded.join(" | "))
        };

        let separator: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
        let mut lines = vec![format_row(HEADERS), format!("| {} |", separator.join(" | "))];
        lines.extend(rows.into_iter().map(format_row));
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[[intents]]
intent = "browser_open_home"
recipe = "browser_home"
description = "Open the browser home page"
synonyms = ["open browser", "home page"]
topics = ["browser"]

[[intents]]
intent = "Export_Quotes"
description = "Export quotes to CSV"
args = ["symbol", "topic"]
synonyms = ["export quotes"]
topics = ["finance"]
"#;

    #[test]
    fn load_and_resolve() {
        let catalog = IntentCatalog::from_toml(MANIFEST).expect("manifest should parse");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.recipe_for("browser_open_home"), Some("browser_home"));
        // recipe defaults to the (lowercased) intent name
        assert_eq!(catalog.recipe_for("EXPORT_QUOTES"), Some("export_quotes"));
        assert!(catalog.resolve("nope").is_none());
    }

    #[test]
    fn duplicate_intent_is_rejected() {
        let err = IntentCatalog::from_definitions([
            IntentDefinition::new("a", "r1"),
            IntentDefinition::new("A", "r2"),
        ])
        .unwrap_err();
        assert!(matches!(err, IntentError::DuplicateIntent { ref intent } if intent == "a"));
    }

    #[test]
    fn invalid_manifest() {
        let err = IntentCatalog::from_toml("[[intents]]\nintent = 5").unwrap_err();
        assert!(matches!(err, IntentError::CatalogInvalid { .. }));
    }

    #[test]
    fn filter_by_topic_searches_all_fields() {
        let catalog = IntentCatalog::from_toml(MANIFEST).expect("manifest should parse");
        let names = |topic: &str| -> Vec<String> {
            catalog
                .filter_by_topic(topic)
                .into_iter()
                .map(|d| d.intent.clone())
                .collect()
        };
        assert_eq!(names("FINANCE"), ["export_quotes"]);
        assert_eq!(names("home page"), ["browser_open_home"]);
        assert_eq!(names("csv"), ["export_quotes"]);
        assert_eq!(names("").len(), 2);
        assert!(names("weather").is_empty());
    }

    #[test]
    fn table_is_aligned() {
        let catalog = IntentCatalog::from_definitions([
            IntentDefinition::new("a", "recipe_a").describe("first"),
            IntentDefinition::new("longer_name", "b"),
        ])
        .expect("valid definitions");
        let table = IntentCatalog::render_table(catalog.entries());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| Intent      | Recipe   | Description |");
        assert_eq!(lines[1], "| ----------- | -------- | ----------- |");
        assert_eq!(lines[2], "| a           | recipe_a | first       |");
        assert_eq!(lines[3], "| longer_name | b        |             |");
    }
}
