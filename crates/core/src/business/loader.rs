use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::{BusinessConfig, BusinessConfigError};

/// Every business line known to the process, keyed by id (the config file stem).
#[derive(Clone, Debug, Default)]
pub struct BusinessCatalog {
    lines: BTreeMap<String, Arc<BusinessConfig>>,
}

impl BusinessCatalog {
    pub fn new(configs: impl IntoIterator<Item = BusinessConfig>) -> Self {
        let lines = configs
            .into_iter()
            .map(|config| (config.id().to_string(), Arc::new(config)))
            .collect();
        Self { lines }
    }

    /// Loads every `*.json` file in `dir`; the first invalid file aborts the load.
    pub fn load_dir(dir: &Path) -> Result<Self, BusinessConfigError> {
        let entries = fs::read_dir(dir)
            .map_err(|source| BusinessConfigError::ReadFile { path: dir.to_path_buf(), source })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| BusinessConfigError::ReadFile {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|extension| extension.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(BusinessConfigError::EmptyDirectory(dir.to_path_buf()));
        }
        paths.sort();

        let mut configs = Vec::with_capacity(paths.len());
        for path in paths {
            configs.push(load_file(&path)?);
        }

        let catalog = Self::new(configs);
        info!(
            event_name = "business.catalog.loaded",
            dir = %dir.display(),
            lines = catalog.len(),
            "business configuration loaded"
        );
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Result<Arc<BusinessConfig>, BusinessConfigError> {
        self.lines
            .get(id)
            .cloned()
            .ok_or_else(|| BusinessConfigError::UnknownBusiness(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BusinessConfig>> + '_ {
        self.lines.values()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Loads one business line; the file stem becomes its id.
pub fn load_file(path: &Path) -> Result<BusinessConfig, BusinessConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| BusinessConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());
    BusinessConfig::from_json(id, &raw)
}
