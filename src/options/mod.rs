//! Runtime configuration with TOML preset support.
//!
//! Scheduler sizing, device-buffer availability and file lookup are
//! consolidated here. Options serialize to/from TOML so a host application
//! can keep them next to its own settings.

mod device;
mod loading;
mod scheduler;

use std::path::Path;

pub use device::DeviceOptions;
pub use loading::LoadingOptions;
pub use scheduler::SchedulerOptions;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;

/// Top-level options container. All sub-structs use `#[serde(default)]` so
/// partial TOML files (e.g. only overriding `[scheduler]`) work correctly.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Loader pool sizing.
    pub scheduler: SchedulerOptions,
    /// Device-buffer capability flag.
    pub device: DeviceOptions,
    /// File source lookup.
    #[schemars(skip)]
    pub loading: LoadingOptions,
}

impl Options {
    /// Generate JSON Schema describing the script-exposed options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Io`] if the file cannot be read and
    /// [`CloudError::OptionsParse`] if it is not valid options TOML.
    pub fn load(path: &Path) -> Result<Self, CloudError> {
        let content = std::fs::read_to_string(path).map_err(CloudError::Io)?;
        toml::from_str(&content)
            .map_err(|e| CloudError::OptionsParse(e.to_string()))
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::OptionsParse`] if serialization fails and
    /// [`CloudError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), CloudError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CloudError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CloudError::Io)?;
        }
        std::fs::write(path, content).map_err(CloudError::Io)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = Options::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: Options = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r"
[scheduler]
max_worker_threads = 4
";
        let opts: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.scheduler.max_worker_threads, 4);
        assert_eq!(opts.scheduler.thread_name_prefix, "cloud-loader");
        assert!(opts.device.buffers_available);
        assert_eq!(opts.loading.base_dir, None);
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let opts: Options =
            toml::from_str("[scheduler]\nmax_worker_threads = 0\n").unwrap();
        assert_eq!(opts.scheduler.worker_limit(), 1);
    }

    #[test]
    fn relative_sources_resolve_against_base_dir() {
        let loading = LoadingOptions {
            base_dir: Some(PathBuf::from("/data/doc")),
        };
        assert_eq!(
            loading.resolve(Path::new("pts.csv")),
            PathBuf::from("/data/doc/pts.csv")
        );
        assert_eq!(
            loading.resolve(Path::new("/abs/pts.csv")),
            PathBuf::from("/abs/pts.csv")
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets/nuage.toml");
        let mut opts = Options::default();
        opts.device.buffers_available = false;
        opts.save(&path).unwrap();
        assert_eq!(Options::load(&path).unwrap(), opts);
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema_value =
            serde_json::to_value(Options::json_schema()).unwrap();
        let props = schema_value["properties"].as_object().unwrap();

        assert!(props.contains_key("scheduler"));
        assert!(props.contains_key("device"));
        assert!(!props.contains_key("loading"));

        let scheduler = &props["scheduler"]["properties"];
        assert!(scheduler.get("max_worker_threads").is_some());
        assert!(scheduler.get("thread_name_prefix").is_none());
    }
}
