//! Configuration file loading.
//!
//! `intentd.toml` is optional and every section has defaults, so a partial
//! file only needs the values it changes.  Path values may reference
//! environment variables as `${NAME}`; `.env` is loaded before parsing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use intentd_intent::OcrSettings;
use intentd_platform::{KeyCombo, Region};

use crate::profiles::{DEFAULT_PROFILE, ProfileDefinition, ProfileManager};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub dispatch: DispatchConfig,
    pub ocr: OcrConfig,
    pub chat: ChatConfig,
    pub click: ClickConfig,
    pub safety: SafetyConfig,
    pub profiles: ProfilesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub intents_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub rejected_dir: PathBuf,
    pub recipes_dir: PathBuf,
    pub catalog: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            intents_dir: PathBuf::from("data/intents"),
            archive_dir: PathBuf::from("data/archive"),
            rejected_dir: PathBuf::from("data/rejected"),
            recipes_dir: PathBuf::from("recipes"),
            catalog: PathBuf::from("catalog.toml"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub dedupe_window_ms: u64,
    /// Capacity of the event bus ring buffer.
    pub event_capacity: usize,
    /// Finished runs whose status is kept in memory.
    pub run_history: usize,
    /// Quiet period before a changed intent file is read.
    pub watch_settle_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dedupe_window_ms: 5000,
            event_capacity: 256,
            run_history: 1024,
            watch_settle_ms: 500,
        }
    }
}

impl DispatchConfig {
    /// One day.
    pub const MAX_DEDUPE_WINDOW_MS: u64 = 86_400_000;
    pub const MAX_WATCH_SETTLE_MS: u64 = 60_000;

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }

    pub fn watch_settle(&self) -> Duration {
        Duration::from_millis(self.watch_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub capture_timeout_ms: u64,
    pub region: Option<Region>,
    /// Write detected markers as intent files instead of submitting them.
    pub submit_via_files: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2000,
            capture_timeout_ms: 5000,
            region: None,
            submit_via_files: false,
        }
    }
}

impl OcrConfig {
    pub const MIN_POLL_INTERVAL_MS: u64 = 100;

    pub fn settings(&self) -> OcrSettings {
        OcrSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
            region: self.region,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    pub enabled: bool,
    pub min_score: u32,
    pub top_n: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_score: 2,
            top_n: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClickConfig {
    pub attempt_timeout_ms: u64,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 1500,
        }
    }
}

impl ClickConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    pub panic_hotkey: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            panic_hotkey: "ctrl+alt+shift+esc".into(),
        }
    }
}

impl SafetyConfig {
    pub fn combo(&self) -> Result<KeyCombo> {
        let text = self.panic_hotkey.trim();
        if text.is_empty() {
            bail!("safety.panic_hotkey must not be empty");
        }
        KeyCombo::parse(text).context("safety.panic_hotkey is not a valid key combo")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilesConfig {
    pub default: String,
    pub definitions: BTreeMap<String, ProfileDefinition>,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_PROFILE.into(),
            definitions: BTreeMap::new(),
        }
    }
}

impl ProfilesConfig {
    pub fn manager(&self) -> Result<ProfileManager> {
        ProfileManager::new(&self.definitions, &self.default)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Read `path` (defaults when the file does not exist), expand
    /// environment references and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };
        config.expand_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Expand `${NAME}` in every path value through `lookup`.
    pub fn expand_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let paths = &mut self.paths;
        for path in [
            &mut paths.intents_dir,
            &mut paths.archive_dir,
            &mut paths.rejected_dir,
            &mut paths.recipes_dir,
            &mut paths.catalog,
        ] {
            let expanded = expand_vars(&path.to_string_lossy(), &lookup);
            *path = PathBuf::from(expanded);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.safety.combo()?;
        self.profiles.manager()?;
        if self.dispatch.event_capacity == 0 {
            bail!("dispatch.event_capacity must be greater than zero");
        }
        if self.dispatch.dedupe_window_ms > DispatchConfig::MAX_DEDUPE_WINDOW_MS {
            bail!(
                "dispatch.dedupe_window_ms must be at most {}",
                DispatchConfig::MAX_DEDUPE_WINDOW_MS
            );
        }
        let settle = self.dispatch.watch_settle_ms;
        if settle == 0 || settle > DispatchConfig::MAX_WATCH_SETTLE_MS {
            bail!(
                "dispatch.watch_settle_ms must be between 1 and {}",
                DispatchConfig::MAX_WATCH_SETTLE_MS
            );
        }
        if self.dispatch.run_history == 0 {
            bail!("dispatch.run_history must be at least 1");
        }
        if self.ocr.poll_interval_ms < OcrConfig::MIN_POLL_INTERVAL_MS {
            bail!(
                "ocr.poll_interval_ms must be at least {}",
                OcrConfig::MIN_POLL_INTERVAL_MS
            );
        }
        if self.ocr.capture_timeout_ms == 0 {
            bail!("ocr.capture_timeout_ms must be greater than zero");
        }
        if self.chat.top_n == 0 {
            bail!("chat.top_n must be at least 1");
        }
        if self.click.attempt_timeout_ms == 0 {
            bail!("click.attempt_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Replace `${NAME}` with `lookup(NAME)`.  Unknown names and unterminated
/// references are kept verbatim.
pub fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        let value = if name.is_empty() { None } else { lookup(name) };
        match value {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + end + 3]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ada".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn expands_known_and_keeps_unknown() {
        assert_eq!(expand_vars("${HOME}/intents", env), "/home/ada/intents");
        assert_eq!(expand_vars("${NOPE}/x", env), "${NOPE}/x");
        assert_eq!(expand_vars("a${EMPTY}b", env), "ab");
        assert_eq!(expand_vars("${}", env), "${}");
        assert_eq!(expand_vars("tail ${HOME", env), "tail ${HOME");
        assert_eq!(expand_vars("$HOME/${HOME}", env), "$HOME//home/ada");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [paths]
            intents_dir = "${HOME}/inbox"

            [ocr]
            poll_interval_ms = 500
            region = { x = 0, y = 0, width = 800, height = 600 }

            [profiles]
            default = "kiosk"
            [profiles.definitions.kiosk]
            coordinate_clicks = false
            "#,
        )
        .expect("parses");

        assert_eq!(config.dispatch.dedupe_window(), Duration::from_secs(5));
        assert_eq!(config.dispatch.watch_settle(), Duration::from_millis(500));
        assert_eq!(config.dispatch.run_history, 1024);
        assert_eq!(config.chat.min_score, 2);
        assert_eq!(config.chat.top_n, 3);
        assert_eq!(config.click.attempt_timeout(), Duration::from_millis(1500));
        assert_eq!(config.paths.catalog, PathBuf::from("catalog.toml"));
        assert_eq!(config.ocr.settings().poll_interval, Duration::from_millis(500));
        assert_eq!(config.ocr.region.map(|r| r.width), Some(800));
        config.validate().expect("valid");

        let pm = config.profiles.manager().expect("kiosk defined");
        assert_eq!(pm.active(), "kiosk");
        assert!(!pm.current().coordinate_clicks);

        let mut config = config;
        config.expand_env(env);
        assert_eq!(config.paths.intents_dir, PathBuf::from("/home/ada/inbox"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let empty_hotkey = Config::from_toml_str("[safety]\npanic_hotkey = \"  \"").expect("parses");
        assert!(empty_hotkey.validate().is_err());

        let bad_hotkey = Config::from_toml_str("[safety]\npanic_hotkey = \"ctrl+alt\"").expect("parses");
        assert!(bad_hotkey.validate().is_err());

        let fast = Config::from_toml_str("[ocr]\npoll_interval_ms = 10").expect("parses");
        assert!(fast.validate().is_err());

        let forever = Config::from_toml_str("[dispatch]\ndedupe_window_ms = 18446744073709551615").expect("parses");
        assert!(forever.validate().is_err());

        let no_settle = Config::from_toml_str("[dispatch]\nwatch_settle_ms = 0").expect("parses");
        assert!(no_settle.validate().is_err());

        let missing_profile = Config::from_toml_str("[profiles]\ndefault = \"ghost\"").expect("parses");
        assert!(missing_profile.validate().is_err());

        assert!(Config::from_toml_str("[paths]\nintent_dir = \"typo\"").is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(config.safety.panic_hotkey, "ctrl+alt+shift+esc");
        assert_eq!(config.profiles.default, "balanced");
    }

    #[test]
    fn load_reports_the_file_on_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("intentd.toml");
        std::fs::write(&path, "[dispatch]\ndedupe_window_ms = \"soon\"").expect("write");
        let err = Config::load(&path).expect_err("bad type");
        assert!(format!("{err:#}").contains("intentd.toml"));
    }
}
