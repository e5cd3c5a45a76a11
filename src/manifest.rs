//! The YAML manifest describing one conversion.
//!
//! ```yaml
//! identifier: Subject
//! schema: schema.json
//! schema_name: Donor
//! mapping: template.csv
//! functions: [site_codes]
//! indexed: [Diagnosis.csv]
//! mapping_errors: field
//! validation: moh
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EtlError, EtlResult};
use crate::evaluate::MappingErrorPolicy;
use crate::functions::FunctionRegistry;
use crate::validation::{moh, RuleRegistry, ValidationSchema};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub identifier: Option<String>,
    /// Target schema document (JSON or YAML).
    #[serde(default)]
    pub schema: Option<String>,
    /// Root component of the schema document.
    #[serde(default)]
    pub schema_name: Option<String>,
    /// Mapping template file.
    #[serde(default)]
    pub mapping: Option<String>,
    /// Plugin modules the template may call; each must be registered by the host program.
    #[serde(default)]
    pub functions: Vec<String>,
    /// Sheets that get a synthetic row index column.
    #[serde(default)]
    pub indexed: Vec<String>,
    #[serde(default)]
    pub mapping_errors: MappingErrorPolicy,
    /// `moh` or a path to a validation descriptor.
    #[serde(default)]
    pub validation: Option<String>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Manifest {
    pub fn from_path(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_yaml_str(&text, base_dir)
    }

    /// Parse a manifest whose relative paths resolve against `base_dir`.
    pub fn from_yaml_str(text: &str, base_dir: impl Into<PathBuf>) -> EtlResult<Self> {
        let mut manifest: Manifest = serde_yaml::from_str(text)?;
        manifest.base_dir = base_dir.into();
        manifest.indexed = manifest
            .indexed
            .into_iter()
            .map(|s| s.strip_suffix(".csv").map(str::to_string).unwrap_or(s))
            .collect();
        manifest.identifier()?;
        debug!(?manifest, "manifest loaded");
        Ok(manifest)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The subject identifier column.
    pub fn identifier(&self) -> EtlResult<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EtlError::config("manifest has no identifier"))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Path of the mapping template; it must exist.
    pub fn template_path(&self) -> EtlResult<PathBuf> {
        let mapping = self
            .mapping
            .as_deref()
            .ok_or_else(|| EtlError::config("manifest has no mapping template"))?;
        let path = self.resolve(mapping);
        if !path.is_file() {
            return Err(EtlError::config(format!(
                "mapping template {} not found",
                path.display()
            )));
        }
        Ok(path)
    }

    pub fn schema_path(&self) -> Option<PathBuf> {
        self.schema.as_deref().map(|s| self.resolve(s))
    }

    /// Every listed plugin module must be known to `registry`.
    pub fn check_plugins(&self, registry: &FunctionRegistry) -> EtlResult<()> {
        match self.functions.iter().find(|m| !registry.has_module(m)) {
            Some(missing) => Err(EtlError::config(format!(
                "function module '{missing}' is not registered"
            ))),
            None => Ok(()),
        }
    }

    /// The semantic validation profile, if one is configured.
    pub fn validation_profile(&self) -> EtlResult<Option<(ValidationSchema, RuleRegistry)>> {
        match self.validation.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) if name.eq_ignore_ascii_case(moh::PROFILE) => Ok(Some(moh::profile())),
            Some(path) => {
                let schema = ValidationSchema::from_path(self.resolve(path))?;
                Ok(Some((schema, RuleRegistry::new())))
            }
        }
    }
}
