//! Module manifests: the metadata of a plugin module.
//!
//! A manifest is stored next to the module file as `<stem>.module.json` and
//! can be read without loading or executing the module. It declares the
//! module's types (with their plugin registration markers) and the
//! dependencies the module expects to find at load time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;

/// Suffix of the sidecar manifest, replacing the module file's extension.
pub const MANIFEST_EXTENSION: &str = "module.json";

/// Errors raised while reading or validating a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("no manifest found for {0}")]
    Missing(PathBuf),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid manifest {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Declarative registration marker: "this type implements that contract".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMarker {
    pub contract: TypeDescriptor,
}

/// A type declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredType {
    #[serde(flatten)]
    pub descriptor: TypeDescriptor,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Whether the module exposes a public factory for this type.
    #[serde(default = "default_constructible")]
    pub constructible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginMarker>,
}

fn default_constructible() -> bool {
    true
}

impl DeclaredType {
    pub fn new(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            is_abstract: false,
            constructible: true,
            plugin: None,
        }
    }

    /// Mark the type as implementing `contract`.
    pub fn implementing(mut self, contract: TypeDescriptor) -> Self {
        self.plugin = Some(PluginMarker { contract });
        self
    }

    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn with_constructible(mut self, constructible: bool) -> Self {
        self.constructible = constructible;
        self
    }

    /// Whether the registration marker names `contract` (structurally).
    pub fn implements(&self, contract: &TypeDescriptor) -> bool {
        self.plugin
            .as_ref()
            .map(|marker| marker.contract.matches(contract))
            .unwrap_or(false)
    }
}

/// A dependency the module references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    #[serde(default = "default_requirement")]
    pub version: semver::VersionReq,
    /// Types this dependency contributes to the module's signatures.
    #[serde(default)]
    pub exports: Vec<TypeDescriptor>,
}

fn default_requirement() -> semver::VersionReq {
    semver::VersionReq::STAR
}

impl DependencyRef {
    pub fn new(name: impl Into<String>, version: semver::VersionReq) -> Self {
        Self {
            name: name.into(),
            version,
            exports: Vec::new(),
        }
    }

    pub fn with_export(mut self, ty: TypeDescriptor) -> Self {
        self.exports.push(ty);
        self
    }
}

/// Metadata of one module file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: semver::Version,
    /// Runtime the module was built against, e.g. `isohost/1`.
    pub target_framework: String,
    #[serde(default)]
    pub types: Vec<DeclaredType>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
}

impl ModuleManifest {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
            target_framework: crate::HOST_FRAMEWORK.to_string(),
            types: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_target_framework(mut self, framework: impl Into<String>) -> Self {
        self.target_framework = framework.into();
        self
    }

    pub fn with_type(mut self, ty: DeclaredType) -> Self {
        self.types.push(ty);
        self
    }

    pub fn with_dependency(mut self, dependency: DependencyRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Declared types carrying a marker for `contract`, in declaration order.
    pub fn implementations_of<'a>(
        &'a self,
        contract: &'a TypeDescriptor,
    ) -> impl Iterator<Item = &'a DeclaredType> + 'a {
        self.types.iter().filter(move |ty| ty.implements(contract))
    }

    /// Every type descriptor this module declares.
    pub fn exported_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter().map(|ty| &ty.descriptor)
    }

    pub fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        let invalid = |reason: String| ManifestError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("module name is empty".to_string()));
        }
        if self.target_framework.trim().is_empty() {
            return Err(invalid("target framework is empty".to_string()));
        }

        let mut seen = BTreeSet::new();
        for ty in &self.types {
            if ty.descriptor.name.trim().is_empty() {
                return Err(invalid("declared type with empty name".to_string()));
            }
            if !seen.insert(&ty.descriptor) {
                return Err(invalid(format!("type {} declared twice", ty.descriptor)));
            }
        }

        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err(invalid("dependency with empty name".to_string()));
            }
            if dep.name == self.name {
                return Err(invalid(format!("module {} depends on itself", self.name)));
            }
        }

        Ok(())
    }

    /// Read and validate the sidecar manifest of `module_path`.
    pub fn read_sidecar(module_path: &Path) -> Result<Self, ManifestError> {
        let path = sidecar_path(module_path);
        if !path.is_file() {
            return Err(ManifestError::Missing(module_path.to_path_buf()));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: ModuleManifest =
            serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;
        manifest.validate(&path)?;
        Ok(manifest)
    }

    /// Write this manifest next to `module_path`.
    pub fn write_sidecar(&self, module_path: &Path) -> Result<PathBuf, ManifestError> {
        let path = sidecar_path(module_path);
        let text = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// `dir/pluginA.dll` -> `dir/pluginA.module.json`
pub fn sidecar_path(module_path: &Path) -> PathBuf {
    module_path.with_extension(MANIFEST_EXTENSION)
}
