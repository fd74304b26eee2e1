//! Persisted preferences for interactive sessions.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/interactive-session/settings.json
//! - Linux: ~/.config/interactive-session/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\interactive-session\settings.json

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

const DEFAULT_VARIABLE_EXCLUSION: &str = "module;function;builtin_function_or_method";

/// Leading cell-marker lines: `# %%`, `#%%`, `# <codecell>`, `# In[1]`, `# In[ ]`.
pub const DEFAULT_CELL_MARKER: &str = r"^(#\s*%%|#\s*<codecell>|#\s*In\[\d*?\]|#\s*In\[ \])";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Settings {
    /// Confirm before restarting the kernel
    pub ask_before_restart: bool,

    /// Confirm before opening very wide data in the data viewer
    pub ask_before_large_result: bool,

    /// A failed cell marks the whole submission as failed
    pub stop_on_error: bool,

    /// Variable types hidden from the variable explorer
    #[serde(deserialize_with = "deserialize_type_list")]
    #[schemars(with = "Vec<String>")]
    pub variable_exclusion: Vec<String>,

    /// Run exported notebooks from the directory they are saved to
    pub change_directory_on_export: bool,

    /// Accept self-signed certificates from remote Jupyter servers
    pub allow_unauthorized_remote_connection: bool,

    pub interrupt_timeout_ms: u64,

    pub restart_timeout_ms: u64,

    /// Regex matching a cell-marker line at the start of submitted code
    pub cell_marker_pattern: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ask_before_restart: true,
            ask_before_large_result: true,
            stop_on_error: true,
            variable_exclusion: split_type_list(DEFAULT_VARIABLE_EXCLUSION),
            change_directory_on_export: true,
            allow_unauthorized_remote_connection: false,
            interrupt_timeout_ms: 10_000,
            restart_timeout_ms: 30_000,
            cell_marker_pattern: DEFAULT_CELL_MARKER.to_string(),
        }
    }
}

impl Settings {
    pub fn interrupt_timeout(&self) -> Duration {
        Duration::from_millis(self.interrupt_timeout_ms)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }

    pub fn is_excluded_type(&self, type_name: &str) -> bool {
        self.variable_exclusion.iter().any(|t| t == type_name)
    }
}

fn split_type_list(s: &str) -> Vec<String> {
    s.split(';')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Deserialize a type list that accepts both:
/// - `"module;function"` (semicolon-separated string)
/// - `["module", "function"]` (JSON array)
fn deserialize_type_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct TypeListVisitor;

    impl<'de> de::Visitor<'de> for TypeListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a semicolon-separated string or an array of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Vec<String>, E> {
            Ok(split_type_list(v))
        }

        fn visit_seq<A: de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> std::result::Result<Vec<String>, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                let trimmed = item.trim();
                if !trimmed.is_empty() {
                    items.push(trimmed.to_string());
                }
            }
            Ok(items)
        }
    }

    deserializer.deserialize_any(TypeListVisitor)
}

/// Default location of the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("interactive-session")
        .join("settings.json")
}

/// Load settings from `path`, returning defaults if the file doesn't exist
/// or can't be parsed
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    match std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
    {
        Ok(settings) => settings,
        Err(e) => {
            warn!("[settings] Ignoring unreadable {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

/// JSON Schema for the settings file, for editor validation.
pub fn settings_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(Settings)).unwrap_or_default()
}

/// Live settings shared by every component of a session.
///
/// Changes made through [`SettingsStore::update`] are written back to the
/// backing file, if there is one.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Load from the default settings file.
    pub fn load() -> Self {
        Self::load_from(settings_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let current = load_settings_from(&path);
        Self {
            path: Some(path),
            current: RwLock::new(current),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
        }
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply `change` and persist the result.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) -> Result<()> {
        let snapshot = {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            change(&mut current);
            current.clone()
        };
        if let Some(path) = &self.path {
            save_settings_to(path, &snapshot)?;
            info!("[settings] Saved {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.ask_before_restart);
        assert!(settings.stop_on_error);
        assert!(!settings.allow_unauthorized_remote_connection);
        assert_eq!(settings.interrupt_timeout(), Duration::from_secs(10));
        assert_eq!(
            settings.variable_exclusion,
            vec!["module", "function", "builtin_function_or_method"]
        );
    }

    #[test]
    fn test_deserialize_semicolon_format() {
        let json = r#"{"variable_exclusion": "module; DataFrame ;;int"}"#;
        let parsed: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.variable_exclusion, vec!["module", "DataFrame", "int"]);
        assert!(parsed.is_excluded_type("DataFrame"));
        assert!(!parsed.is_excluded_type("function"));
    }

    #[test]
    fn test_deserialize_array_format() {
        let json = r#"{"variable_exclusion": ["module", " str "]}"#;
        let parsed: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.variable_exclusion, vec!["module", "str"]);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: Settings = serde_json::from_str(r#"{"stop_on_error": false}"#).unwrap();
        assert!(!parsed.stop_on_error);
        assert!(parsed.ask_before_restart);
        assert_eq!(parsed.restart_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("nope.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_corrupt_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings_from(&path), Settings::default());
    }

    #[test]
    fn test_store_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::load_from(path.clone());
        store.update(|s| s.ask_before_restart = false).unwrap();
        assert!(!store.get().ask_before_restart);

        let reloaded = load_settings_from(&path);
        assert!(!reloaded.ask_before_restart);
    }

    #[test]
    fn test_in_memory_store_does_not_write() {
        let store = SettingsStore::in_memory(Settings::default());
        store
            .update(|s| s.allow_unauthorized_remote_connection = true)
            .unwrap();
        assert!(store.get().allow_unauthorized_remote_connection);
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = settings_schema();
        let props = &schema["properties"];
        assert!(props.get("stop_on_error").is_some());
        assert!(props.get("variable_exclusion").is_some());
    }

    #[test]
    fn test_default_store_reads_settings_path() {
        let store = SettingsStore::load();
        assert_eq!(store.path(), Some(settings_path().as_path()));
        assert_eq!(store.get(), load_settings());
    }

    #[test]
    fn test_settings_path_is_valid() {
        assert!(settings_path().ends_with("interactive-session/settings.json"));
    }
}
