//! Runtime toggles bound to global hotkeys.
//!
//! Each flag is an independent `AtomicBool`. The keyboard hook flips it from
//! its own thread and the frame loop reads it once per frame with relaxed
//! ordering, so a toggle shows up at the latest one frame later.

mod chord;
#[cfg(target_os = "linux")]
mod evdev_hook;

pub use chord::{ChordMatcher, KeyChord, KeyInput, Modifier, Modifiers};
#[cfg(target_os = "linux")]
pub use evdev_hook::KeyboardHook;

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Swap red and blue before the plugin runs.
pub const BGR2RGB: &str = "bgr2rgb";
/// Mirror the frame after the plugin ran.
pub const MIRROR: &str = "mirror";

/// Declaration of a named toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFlag {
    /// e.g. `<ctrl>+<alt>+m`
    pub key_combination: String,
    pub name: String,
    pub initial_value: bool,
    pub description: String,
}

impl PipelineFlag {
    pub fn new(key_combination: &str, name: &str, initial_value: bool, description: &str) -> Self {
        Self {
            key_combination: key_combination.to_string(),
            name: name.to_string(),
            initial_value,
            description: description.to_string(),
        }
    }
}

/// Flags every pipeline has, whatever the plugin.
pub fn default_flags() -> Vec<PipelineFlag> {
    vec![
        PipelineFlag::new("<ctrl>+<alt>+r", BGR2RGB, false, "Switch RGB to BGR color schema"),
        PipelineFlag::new("<ctrl>+<alt>+m", MIRROR, true, "Mirror the camera stream"),
    ]
}

/// A registered flag and the cell holding its current value.
#[derive(Debug, Clone)]
pub struct Binding {
    pub flag: PipelineFlag,
    pub chord: KeyChord,
    cell: Arc<AtomicBool>,
}

impl Binding {
    /// Hook callback: flip the flag and report the new value.
    pub fn toggle(&self) -> bool {
        let value = !self.cell.fetch_xor(true, Ordering::Relaxed);
        info!("Keyboard switch {}: {}", self.flag.name, value);
        value
    }

    pub fn get(&self) -> bool {
        self.cell.load(Ordering::Relaxed)
    }
}

/// All flags of one running instance.
#[derive(Debug, Default)]
pub struct FlagRegistry {
    bindings: Vec<Binding>,
    locked: bool,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`default_flags`].
    pub fn with_defaults() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.register(default_flags())?;
        Ok(registry)
    }

    /// Add `flags`. Either all of them are added or none.
    ///
    /// Fails if a name or key combination is already taken, by an earlier
    /// registration or by another flag of the same batch, and once the
    /// registry has been locked by the hook.
    pub fn register(&mut self, flags: impl IntoIterator<Item = PipelineFlag>) -> Result<(), ConfigError> {
        if self.locked {
            return Err(ConfigError::RegistryLocked);
        }

        let mut pending: Vec<Binding> = Vec::new();
        for flag in flags {
            let chord: KeyChord = flag.key_combination.parse()?;
            let taken = self.bindings.iter().chain(pending.iter());
            for existing in taken {
                if existing.flag.name == flag.name {
                    return Err(ConfigError::DuplicateFlagName(flag.name));
                }
                if existing.chord == chord {
                    return Err(ConfigError::DuplicateKeyCombination {
                        combo: flag.key_combination,
                        name: flag.name,
                        existing: existing.flag.name.clone(),
                    });
                }
            }
            pending.push(Binding {
                cell: Arc::new(AtomicBool::new(flag.initial_value)),
                chord,
                flag,
            });
        }

        self.bindings.extend(pending);
        Ok(())
    }

    /// Override initial values, e.g. from the config file. Unknown names are ignored.
    pub fn apply_overrides(&self, overrides: &BTreeMap<String, bool>) {
        for binding in &self.bindings {
            if let Some(value) = overrides.get(&binding.flag.name) {
                binding.cell.store(*value, Ordering::Relaxed);
            }
        }
    }

    /// Freeze the registry and hand out the bindings for a keyboard hook.
    pub fn lock(&mut self) -> Vec<Binding> {
        self.locked = true;
        self.bindings.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn flags(&self) -> impl Iterator<Item = &PipelineFlag> {
        self.bindings.iter().map(|b| &b.flag)
    }

    /// Current value of every flag.
    pub fn snapshot(&self) -> FlagSnapshot {
        FlagSnapshot {
            values: self.bindings.iter().map(|b| (b.flag.name.clone(), b.get())).collect(),
        }
    }
}

/// Flag values read at the start of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSnapshot {
    values: Vec<(String, bool)>,
}

impl FlagSnapshot {
    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Value of `name`, off if no such flag is registered.
    pub fn is_on(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }
}

impl FromIterator<(String, bool)> for FlagSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = FlagRegistry::with_defaults().unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.get(BGR2RGB), Some(false));
        assert_eq!(snapshot.get(MIRROR), Some(true));
        assert_eq!(snapshot.get("labels"), None);
        assert!(!snapshot.is_on("labels"));
    }

    #[test]
    fn test_toggle_round_trip() {
        for toggles in 0..6 {
            let mut registry = FlagRegistry::new();
            registry
                .register([PipelineFlag::new("<ctrl>+<alt>+x", "x", false, "")])
                .unwrap();
            let bindings = registry.lock();
            for _ in 0..toggles {
                bindings[0].toggle();
            }
            assert_eq!(registry.snapshot().is_on("x"), toggles % 2 == 1);
        }
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = FlagRegistry::with_defaults().unwrap();
        let err = registry
            .register([PipelineFlag::new("<ctrl>+<alt>+q", MIRROR, false, "")])
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateFlagName(MIRROR.to_string()));
    }

    #[test]
    fn test_duplicate_key_combination_is_rejected() {
        let mut registry = FlagRegistry::with_defaults().unwrap();
        let err = registry
            .register([PipelineFlag::new("<alt>+<ctrl>+m", "other", false, "")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKeyCombination { ref existing, .. } if existing == MIRROR));
    }

    #[test]
    fn test_collision_within_one_batch_adds_nothing() {
        let mut registry = FlagRegistry::new();
        let result = registry.register([
            PipelineFlag::new("<ctrl>+<alt>+a", "a", false, ""),
            PipelineFlag::new("<ctrl>+<alt>+a", "b", false, ""),
        ]);
        assert!(result.is_err());
        assert_eq!(registry.flags().count(), 0);
    }

    #[test]
    fn test_register_after_lock_fails() {
        let mut registry = FlagRegistry::with_defaults().unwrap();
        assert!(!registry.is_locked());
        registry.lock();
        assert!(registry.is_locked());
        assert_eq!(
            registry.register([PipelineFlag::new("<ctrl>+<alt>+l", "labels", true, "")]),
            Err(ConfigError::RegistryLocked)
        );
    }

    #[test]
    fn test_overrides() {
        let registry = FlagRegistry::with_defaults().unwrap();
        let overrides = BTreeMap::from([(MIRROR.to_string(), false), ("unknown".to_string(), true)]);
        registry.apply_overrides(&overrides);
        assert!(!registry.snapshot().is_on(MIRROR));
    }
}
