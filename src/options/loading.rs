use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where file sources are looked up.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[schemars(title = "Loading", inline)]
#[serde(default)]
pub struct LoadingOptions {
    /// Folder that relative file sources are resolved against. Unset means
    /// the process working directory.
    #[schemars(skip)]
    pub base_dir: Option<PathBuf>,
}

impl LoadingOptions {
    /// Resolve a file source path against [`Self::base_dir`].
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
