//! Macro and marker parsing.
//!
//! Two textual encodings of an intent are recognised:
//!
//! - **Macros** typed into chat: `[macro:<intent> key=value ...]`, with
//!   `[agent:<intent> ...]` accepted as an alias.  Several macros may appear
//!   on one line and are returned in order of appearance.
//! - **Markers** rendered on screen and read back through OCR:
//!   `#intent# + <id> + [<command> key=value ...]`.  A marker is converted to
//!   the equivalent macro text, with the marker id appended as `action_id`
//!   unless the command already carries one.

use std::sync::LazyLock;

use regex::Regex;

use crate::intent::{ArgValue, Args, Intent, IntentSource};

static MACRO_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(?P<prefix>agent|macro)\s*:(?P<name>[a-zA-Z0-9_.-]+)(?P<args>[^\]]*)\]")
        .expect("macro pattern is valid")
});

static ARG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>[a-zA-Z0-9_.-]+)\s*=\s*(?P<value>"[^"]*"|'[^']*'|[^\s]+)"#)
        .expect("arg pattern is valid")
});

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\*#intent#\*|#intent#)[\s+:-]*(?:(?P<id>\d+)[\s+:-]*)?\[(?P<command>[^\]]+)\]")
        .expect("marker pattern is valid")
});

static MACRO_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:macro|agent)\s*:").expect("prefix pattern is valid"));

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// One parsed `[macro:...]` occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroInvocation {
    /// Lowercased intent name.
    pub name: String,
    pub args: Args,
    /// The exact source text of the macro, brackets included.
    pub raw: String,
}

impl MacroInvocation {
    pub fn to_intent(&self, source: IntentSource) -> Intent {
        Intent::new(&self.name, source).with_args(self.args.clone())
    }
}

/// Extract every macro in `text`, preserving order of appearance.
pub fn parse_macros(text: &str) -> Vec<MacroInvocation> {
    MACRO_PATTERN
        .captures_iter(text)
        .map(|caps| {
            let invocation = MacroInvocation {
                name: caps["name"].to_lowercase(),
                args: parse_args(caps.name("args").map_or("", |m| m.as_str())),
                raw: caps[0].to_owned(),
            };
            tracing::debug!(intent = %invocation.name, raw = %invocation.raw, "parsed macro");
            invocation
        })
        .collect()
}

/// Parse `key=value` pairs.  Keys are lowercased; later duplicates win.
pub fn parse_args(raw: &str) -> Args {
    ARG_PATTERN
        .captures_iter(raw)
        .map(|caps| (caps["key"].to_lowercase(), parse_value(&caps["value"])))
        .collect()
}

/// Quoted values stay strings with the quotes removed; unquoted values are
/// type-inferred.
pub fn parse_value(raw: &str) -> ArgValue {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"')) || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        ArgValue::Str(raw[1..raw.len() - 1].to_owned())
    } else {
        ArgValue::from_unquoted(raw)
    }
}

/// Whether `text` appears to contain a macro opener, even if it fails to
/// parse.  Used to report malformed macros instead of treating the line as
/// free text.
pub fn looks_like_macro(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    ["[macro", "[agent"].iter().any(|opener| {
        lowered.match_indices(opener).any(|(idx, _)| {
            lowered[idx + opener.len()..].trim_start().starts_with(':')
        })
    })
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

/// An on-screen intent marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker {
    pub id: Option<u64>,
    /// The bracketed command text, trimmed.
    pub command: String,
}

impl Marker {
    /// The equivalent macro text for this marker.
    pub fn to_macro_text(&self) -> String {
        let command = MACRO_PREFIX.replace(&self.command, "");
        let command = command.trim();
        match self.id {
            Some(id) if !command.to_ascii_lowercase().contains("action_id=") => {
                format!("[macro:{command} action_id={id}]")
            }
            _ => format!("[macro:{command}]"),
        }
    }

    /// Convert to an OCR-sourced intent.  Returns `None` if the command does
    /// not form a valid macro.
    pub fn to_intent(&self) -> Option<Intent> {
        parse_macros(&self.to_macro_text())
            .into_iter()
            .next()
            .map(|m| m.to_intent(IntentSource::Ocr))
    }
}

/// Find every marker in `text`.  Markers with an empty command are skipped.
pub fn find_markers(text: &str) -> Vec<Marker> {
    MARKER_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let command = caps["command"].trim();
            if command.is_empty() {
                return None;
            }
            Some(Marker {
                id: caps.name("id").and_then(|m| m.as_str().parse().ok()),
                command: command.to_owned(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_with_numeric_arg() {
        let macros = parse_macros("please [macro:browser_minimize action_id=203] now");
        assert_eq!(macros.len(), 1);
        assert_eq!(macros[0].name, "browser_minimize");
        assert_eq!(macros[0].args["action_id"], ArgValue::Int(203));
        assert_eq!(macros[0].raw, "[macro:browser_minimize action_id=203]");
    }

    #[test]
    fn agent_alias_case_and_quotes() {
        let macros = parse_macros(r#"[AGENT :Export_Quotes Symbol="AAPL" note='two words' dry=false]"#);
        assert_eq!(macros.len(), 1);
        let m = &macros[0];
        assert_eq!(m.name, "export_quotes");
        assert_eq!(m.args["symbol"], ArgValue::Str("AAPL".into()));
        assert_eq!(m.args["note"], ArgValue::Str("two words".into()));
        assert_eq!(m.args["dry"], ArgValue::Bool(false));
    }

    #[test]
    fn quoted_numbers_stay_strings() {
        let args = parse_args(r#"id="203""#);
        assert_eq!(args["id"], ArgValue::Str("203".into()));
    }

    #[test]
    fn multiple_macros_in_order() {
        let names: Vec<_> = parse_macros("[macro:a] and [macro:b x=1] then [macro:c]")
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn malformed_macro_detection() {
        assert!(parse_macros("[macro: ]").is_empty());
        assert!(looks_like_macro("[macro: ]"));
        assert!(looks_like_macro("[agent :x"));
        assert!(!looks_like_macro("open the macro editor"));
    }

    #[test]
    fn marker_appends_action_id() {
        let markers = find_markers("Toolbar #intent# + 401 + [browser_open_home] more text");
        assert_eq!(
            markers,
            vec![Marker {
                id: Some(401),
                command: "browser_open_home".into()
            }]
        );
        assert_eq!(markers[0].to_macro_text(), "[macro:browser_open_home action_id=401]");
        let intent = markers[0].to_intent().expect("marker forms a macro");
        assert_eq!(intent.name, "browser_open_home");
        assert_eq!(intent.args["action_id"], ArgValue::Int(401));
        assert_eq!(intent.source, IntentSource::Ocr);
    }

    #[test]
    fn marker_variants() {
        let markers = find_markers("*#INTENT#*:7:[macro:export_quotes symbol=MSFT] #intent#[report_status]");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].id, Some(7));
        assert_eq!(markers[0].to_macro_text(), "[macro:export_quotes symbol=MSFT action_id=7]");
        assert_eq!(markers[1].id, None);
        assert_eq!(markers[1].to_macro_text(), "[macro:report_status]");
    }

    #[test]
    fn marker_keeps_explicit_action_id() {
        let markers = find_markers("#intent# 9 [close_tab action_id=12]");
        assert_eq!(markers[0].to_macro_text(), "[macro:close_tab action_id=12]");
    }

    #[test]
    fn marker_with_invalid_command_yields_no_intent() {
        let markers = find_markers("#intent# 5 [???]");
        assert_eq!(markers.len(), 1);
        assert!(markers[0].to_intent().is_none());
    }
}
