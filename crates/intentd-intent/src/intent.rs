//! The intent model: a named, parameterized automation request.
//!
//! Every producer (intent files, the OCR scanner, the chat bridge) builds an
//! [`Intent`] and hands it to the dispatcher.  Dedupe identity is the
//! [`Fingerprint`] computed by [`Intent::fingerprint`]: the lowercased name
//! plus the arguments sorted by key, each rendered in canonical text so that
//! `203` and `"203"` collapse to the same identity.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use intentd_kernel::{Fingerprint, Variables};

use crate::error::{IntentError, Result};

// ---------------------------------------------------------------------------
// Argument values
// ---------------------------------------------------------------------------

/// A single intent argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    /// Infer the type of an unquoted macro value.
    pub fn from_unquoted(raw: &str) -> Self {
        match raw {
            "true" | "True" | "TRUE" => return Self::Bool(true),
            "false" | "False" | "FALSE" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(int) = raw.parse::<i64>() {
            return Self::Int(int);
        }
        if raw.contains(['.', 'e', 'E'])
            && let Ok(float) = raw.parse::<f64>()
            && float.is_finite()
        {
            return Self::Float(float);
        }
        Self::Str(raw.to_owned())
    }

    /// Canonical text used in fingerprints.
    pub fn canonical(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    /// Convert a JSON scalar into an argument.  Arrays and objects are
    /// rejected; `null` is not a valid argument value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for ArgValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Intent arguments, ordered by key.
pub type Args = BTreeMap<String, ArgValue>;

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// Which producer created an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    File,
    Ocr,
    Chat,
}

impl IntentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Ocr => "ocr",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for IntentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, parameterized request to perform an automation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub args: Args,
    pub source: IntentSource,
    pub received_at: DateTime<Utc>,
    /// The intent file this intent was read from, for file-sourced intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<PathBuf>,
}

impl Intent {
    /// Create an intent with no arguments.  The name is trimmed and
    /// lowercased.
    pub fn new(name: impl AsRef<str>, source: IntentSource) -> Self {
        Self {
            name: name.as_ref().trim().to_lowercase(),
            args: Args::new(),
            source,
            received_at: Utc::now(),
            origin: None,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.insert(key.into().to_lowercase(), value.into());
        self
    }

    pub fn with_args(mut self, args: Args) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_origin(mut self, path: impl Into<PathBuf>) -> Self {
        self.origin = Some(path.into());
        self
    }

    /// Dedupe identity: `name(k1=v1,k2=v2)` with keys in sorted order.
    /// Separators inside names, keys and values are backslash-escaped so
    /// distinct argument sets never share a fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        let args = self
            .args
            .iter()
            .map(|(k, v)| format!("{}={}", escape_fingerprint(k), escape_fingerprint(&v.canonical())))
            .collect::<Vec<_>>()
            .join(",");
        Fingerprint::new(format!("{}({args})", escape_fingerprint(&self.name)))
    }

    /// Arguments as run variables for the recipe runner.
    pub fn args_as_variables(&self) -> Variables {
        self.args
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

fn escape_fingerprint(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | ',' | '=' | '(' | ')') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.fingerprint(), self.source)
    }
}

// ---------------------------------------------------------------------------
// Intent documents (on-disk form)
// ---------------------------------------------------------------------------

/// The on-disk representation of an intent file:
/// `{ "intent": "...", "args": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDocument {
    pub intent: String,
    #[serde(default)]
    pub args: Args,
}

/// File formats the watcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

impl IntentDocument {
    pub fn from_intent(intent: &Intent) -> Self {
        Self {
            intent: intent.name.clone(),
            args: intent.args.clone(),
        }
    }

    /// Parse a document, choosing the format by the file extension.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| IntentError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let doc: Self = match format {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| IntentError::InvalidIntent {
                reason: format!("invalid JSON: {e}"),
            })?,
            DocumentFormat::Toml => toml::from_str(text).map_err(|e| IntentError::InvalidIntent {
                reason: format!("invalid TOML: {e}"),
            })?,
        };
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        let name = self.intent.trim();
        if name.is_empty() {
            return Err(IntentError::InvalidIntent {
                reason: "missing intent name".into(),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(IntentError::InvalidIntent {
                reason: format!("invalid intent name `{name}`"),
            });
        }
        Ok(())
    }

    pub fn into_intent(self, source: IntentSource) -> Intent {
        let args = self
            .args
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Intent::new(&self.intent, source).with_args(args)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquoted_values_are_inferred() {
        assert_eq!(ArgValue::from_unquoted("203"), ArgValue::Int(203));
        assert_eq!(ArgValue::from_unquoted("true"), ArgValue::Bool(true));
        assert_eq!(ArgValue::from_unquoted("1.5"), ArgValue::Float(1.5));
        assert_eq!(ArgValue::from_unquoted("AAPL"), ArgValue::Str("AAPL".into()));
        assert_eq!(ArgValue::from_unquoted("inf"), ArgValue::Str("inf".into()));
    }

    #[test]
    fn fingerprint_sorts_args_and_ignores_value_type() {
        let a = Intent::new("Export_Quotes", IntentSource::Chat)
            .with_arg("symbol", "AAPL")
            .with_arg("action_id", 203);
        let b = Intent::new("export_quotes", IntentSource::Ocr)
            .with_arg("action_id", "203")
            .with_arg("symbol", "AAPL");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str(), "export_quotes(action_id=203,symbol=AAPL)");
    }

    #[test]
    fn fingerprint_escapes_separators_in_values() {
        let packed = Intent::new("export_quotes", IntentSource::Chat).with_arg("a", "1,b=2");
        let split = Intent::new("export_quotes", IntentSource::Chat)
            .with_arg("a", 1)
            .with_arg("b", 2);
        assert_ne!(packed.fingerprint(), split.fingerprint());
        assert_eq!(packed.fingerprint().as_str(), r"export_quotes(a=1\,b\=2)");
        assert_eq!(split.fingerprint().as_str(), "export_quotes(a=1,b=2)");

        let paren = Intent::new("x", IntentSource::Chat).with_arg("k", "v)");
        let slash = Intent::new("x", IntentSource::Chat).with_arg("k", r"v\");
        assert_ne!(paren.fingerprint(), slash.fingerprint());
    }

    #[test]
    fn fingerprint_without_args() {
        let intent = Intent::new("browser_open_home", IntentSource::File);
        assert_eq!(intent.fingerprint().as_str(), "browser_open_home()");
    }

    #[test]
    fn args_become_json_variables() {
        let intent = Intent::new("x", IntentSource::Chat)
            .with_arg("n", 3)
            .with_arg("flag", true);
        let vars = intent.args_as_variables();
        assert_eq!(vars["n"], serde_json::json!(3));
        assert_eq!(vars["flag"], serde_json::json!(true));
    }

    #[test]
    fn parse_json_and_toml_documents() {
        let json = IntentDocument::parse(
            Path::new("a.json"),
            r#"{"intent": "Browser_Minimize", "args": {"action_id": 203}}"#,
        )
        .expect("json should parse");
        let intent = json.into_intent(IntentSource::File);
        assert_eq!(intent.name, "browser_minimize");
        assert_eq!(intent.args["action_id"], ArgValue::Int(203));

        let toml = IntentDocument::parse(
            Path::new("b.toml"),
            "intent = \"export_quotes\"\n[args]\nsymbol = \"MSFT\"\n",
        )
        .expect("toml should parse");
        assert_eq!(toml.args["symbol"], ArgValue::Str("MSFT".into()));
    }

    #[test]
    fn parse_rejects_bad_documents() {
        let err = IntentDocument::parse(Path::new("a.yaml"), "intent: x").unwrap_err();
        assert!(matches!(err, IntentError::UnsupportedFormat { .. }));

        let err = IntentDocument::parse(Path::new("a.json"), "{not json").unwrap_err();
        assert!(matches!(err, IntentError::InvalidIntent { .. }));

        let err = IntentDocument::parse(Path::new("a.json"), r#"{"intent": "  "}"#).unwrap_err();
        assert!(matches!(err, IntentError::InvalidIntent { .. }));

        let err = IntentDocument::parse(Path::new("a.json"), r#"{"intent": "a b"}"#).unwrap_err();
        assert!(matches!(err, IntentError::InvalidIntent { .. }));
    }
}
