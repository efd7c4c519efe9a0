//! Runtime profiles.
//!
//! A profile is a named set of click-permission toggles.  Three profiles are
//! always present (`safe`, `balanced`, `unrestricted`); the configuration can
//! add more or redefine a built-in one.  Individual toggles can be overridden
//! on top of the active profile; switching profiles drops the overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use intentd_runner::ClickOptions;

/// Definition of a single profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileDefinition {
    pub description: String,
    /// Permit the keyboard focus-tap click fallback.
    pub focus_tap: bool,
    /// Permit the accessibility-tree pointer click.
    pub coordinate_clicks: bool,
}

impl Default for ProfileDefinition {
    fn default() -> Self {
        Self {
            description: String::new(),
            focus_tap: false,
            coordinate_clicks: true,
        }
    }
}

impl ProfileDefinition {
    fn builtin(description: &str, focus_tap: bool, coordinate_clicks: bool) -> Self {
        Self {
            description: description.to_owned(),
            focus_tap,
            coordinate_clicks,
        }
    }

    pub fn toggles(&self) -> Toggles {
        Toggles {
            focus_tap: self.focus_tap,
            coordinate_clicks: self.coordinate_clicks,
        }
    }
}

/// Effective toggle values after overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggles {
    pub focus_tap: bool,
    pub coordinate_clicks: bool,
}

impl Toggles {
    pub fn click_options(&self, attempt_timeout: Duration) -> ClickOptions {
        ClickOptions {
            allow_focus_tap: self.focus_tap,
            allow_coordinate_click: self.coordinate_clicks,
            attempt_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Toggle {
    FocusTap,
    CoordinateClicks,
}

pub const DEFAULT_PROFILE: &str = "balanced";

fn builtins() -> BTreeMap<String, ProfileDefinition> {
    BTreeMap::from([
        (
            "safe".to_owned(),
            ProfileDefinition::builtin("native click methods only", false, false),
        ),
        (
            "balanced".to_owned(),
            ProfileDefinition::builtin("native methods plus pointer clicks", false, true),
        ),
        (
            "unrestricted".to_owned(),
            ProfileDefinition::builtin("every click method including focus tap", true, true),
        ),
    ])
}

// ---------------------------------------------------------------------------
// ProfileManager
// ---------------------------------------------------------------------------

pub struct ProfileManager {
    profiles: BTreeMap<String, ProfileDefinition>,
    active: String,
    overrides: BTreeMap<Toggle, bool>,
}

impl ProfileManager {
    /// Built-in profiles extended (or replaced by name) with `definitions`.
    /// Fails if `default` names no profile.
    pub fn new(definitions: &BTreeMap<String, ProfileDefinition>, default: &str) -> Result<Self> {
        let mut profiles = builtins();
        profiles.extend(definitions.iter().map(|(name, def)| (name.clone(), def.clone())));
        if !profiles.contains_key(default) {
            bail!(
                "default profile '{default}' is not defined (known: {})",
                known(&profiles)
            );
        }
        Ok(Self {
            profiles,
            active: default.to_owned(),
            overrides: BTreeMap::new(),
        })
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    pub fn description(&self) -> &str {
        self.profiles
            .get(&self.active)
            .map_or("", |def| def.description.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Switch profiles.  Clears every toggle override.
    pub fn activate(&mut self, name: &str) -> Result<()> {
        if !self.profiles.contains_key(name) {
            bail!("unknown profile '{name}' (known: {})", known(&self.profiles));
        }
        self.active = name.to_owned();
        self.overrides.clear();
        tracing::debug!(profile = name, "profile activated");
        Ok(())
    }

    pub fn set_toggle(&mut self, toggle: Toggle, value: bool) {
        self.overrides.insert(toggle, value);
    }

    pub fn current(&self) -> Toggles {
        let mut toggles = self
            .profiles
            .get(&self.active)
            .map(ProfileDefinition::toggles)
            .unwrap_or_else(|| ProfileDefinition::default().toggles());
        for (toggle, value) in &self.overrides {
            match toggle {
                Toggle::FocusTap => toggles.focus_tap = *value,
                Toggle::CoordinateClicks => toggles.coordinate_clicks = *value,
            }
        }
        toggles
    }
}

fn known(profiles: &BTreeMap<String, ProfileDefinition>) -> String {
    profiles.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ProfileManager {
        ProfileManager::new(&BTreeMap::new(), DEFAULT_PROFILE).expect("builtins")
    }

    #[test]
    fn builtins_are_available() {
        let pm = manager();
        assert_eq!(pm.active(), "balanced");
        assert_eq!(pm.names().collect::<Vec<_>>(), ["balanced", "safe", "unrestricted"]);
        assert_eq!(
            pm.current(),
            Toggles {
                focus_tap: false,
                coordinate_clicks: true
            }
        );
    }

    #[test]
    fn switching_clears_overrides() {
        let mut pm = manager();
        pm.set_toggle(Toggle::FocusTap, true);
        assert!(pm.current().focus_tap);

        pm.activate("safe").expect("known profile");
        let toggles = pm.current();
        assert!(!toggles.focus_tap);
        assert!(!toggles.coordinate_clicks);

        pm.activate("unrestricted").expect("known profile");
        pm.set_toggle(Toggle::CoordinateClicks, false);
        assert_eq!(
            pm.current(),
            Toggles {
                focus_tap: true,
                coordinate_clicks: false
            }
        );
    }

    #[test]
    fn unknown_profiles_are_rejected() {
        let mut pm = manager();
        let err = pm.activate("turbo").expect_err("unknown");
        assert!(err.to_string().contains("turbo"));
        assert_eq!(pm.active(), "balanced");

        assert!(ProfileManager::new(&BTreeMap::new(), "kiosk").is_err());
    }

    #[test]
    fn configured_profiles_extend_and_replace_builtins() {
        let defs = BTreeMap::from([
            (
                "kiosk".to_owned(),
                ProfileDefinition {
                    description: "locked down".into(),
                    focus_tap: false,
                    coordinate_clicks: false,
                },
            ),
            (
                "safe".to_owned(),
                ProfileDefinition {
                    focus_tap: true,
                    ..ProfileDefinition::default()
                },
            ),
        ]);
        let mut pm = ProfileManager::new(&defs, "kiosk").expect("kiosk defined");
        assert!(!pm.current().coordinate_clicks);
        pm.activate("safe").expect("known");
        assert!(pm.current().focus_tap);
    }

    #[test]
    fn toggles_map_to_click_options() {
        let options = Toggles {
            focus_tap: true,
            coordinate_clicks: false,
        }
        .click_options(Duration::from_millis(900));
        assert!(options.allow_focus_tap);
        assert!(!options.allow_coordinate_click);
        assert_eq!(options.attempt_timeout, Duration::from_millis(900));
    }
}
