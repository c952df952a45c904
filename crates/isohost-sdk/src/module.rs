//! Module images: what a plugin module provides once it is loaded.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;
use crate::manifest::ModuleManifest;
use crate::object::{BoundaryFault, BoundaryObject};
use crate::services::{HostServices, ServiceRegistry};

/// Constructs one plugin type inside its boundary.
pub type Factory =
    Arc<dyn Fn(&ActivationScope) -> Result<Box<dyn BoundaryObject>, BoundaryFault> + Send + Sync>;

/// Wires a module's plugin-local services before any of its types are built.
pub type Bootstrap =
    Arc<dyn Fn(&mut ServiceRegistry, &BootstrapContext) -> Result<(), BoundaryFault> + Send + Sync>;

/// Where a dependency was bound when its boundary was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", content = "path", rename_all = "snake_case")]
pub enum DependencyOrigin {
    /// The host's own instance, shared with the plugin.
    Host,
    /// A private copy loaded from the plugin directory.
    Private(PathBuf),
}

/// A dependency as it was resolved for one boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDependency {
    pub name: String,
    pub version: semver::Version,
    pub origin: DependencyOrigin,
}

impl LinkedDependency {
    pub fn is_private(&self) -> bool {
        matches!(self.origin, DependencyOrigin::Private(_))
    }
}

/// Input of a module bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapContext {
    pub host_services: HostServices,
    pub dependencies: Vec<LinkedDependency>,
}

impl BootstrapContext {
    pub fn dependency(&self, name: &str) -> Option<&LinkedDependency> {
        self.dependencies.iter().find(|dep| dep.name == name)
    }
}

/// What a factory sees when constructing a plugin.
#[derive(Debug, Clone, Default)]
pub struct ActivationScope {
    pub services: Arc<ServiceRegistry>,
    pub host_services: HostServices,
    pub dependencies: Vec<LinkedDependency>,
}

impl ActivationScope {
    pub fn service<T: std::any::Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services.get(key)
    }

    /// Like [`service`](Self::service) but reports the absence as a fault.
    pub fn require<T: std::any::Any + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Arc<T>, BoundaryFault> {
        self.service(key).ok_or_else(|| {
            BoundaryFault::new(
                "MissingService",
                format!("service `{key}` is not registered in this boundary"),
            )
        })
    }

    pub fn dependency(&self, name: &str) -> Option<&LinkedDependency> {
        self.dependencies.iter().find(|dep| dep.name == name)
    }
}

/// The loadable content of a module: its manifest, one factory per
/// constructible type and an optional bootstrap.
#[derive(Clone)]
pub struct ModuleImage {
    manifest: ModuleManifest,
    factories: BTreeMap<String, Factory>,
    bootstrap: Option<Bootstrap>,
}

impl ModuleImage {
    pub fn new(manifest: ModuleManifest) -> Self {
        Self {
            manifest,
            factories: BTreeMap::new(),
            bootstrap: None,
        }
    }

    /// Register the factory for the type whose full name is `type_name`.
    pub fn with_factory<F>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ActivationScope) -> Result<Box<dyn BoundaryObject>, BoundaryFault>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
        self
    }

    pub fn with_bootstrap<F>(mut self, bootstrap: F) -> Self
    where
        F: Fn(&mut ServiceRegistry, &BootstrapContext) -> Result<(), BoundaryFault>
            + Send
            + Sync
            + 'static,
    {
        self.bootstrap = Some(Arc::new(bootstrap));
        self
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn factory(&self, ty: &TypeDescriptor) -> Option<&Factory> {
        self.factories.get(&ty.full_name())
    }

    pub fn has_factory(&self, ty: &TypeDescriptor) -> bool {
        self.factories.contains_key(&ty.full_name())
    }

    /// Run the bootstrap, if any.
    pub fn run_bootstrap(
        &self,
        registry: &mut ServiceRegistry,
        cx: &BootstrapContext,
    ) -> Result<(), BoundaryFault> {
        match &self.bootstrap {
            Some(bootstrap) => bootstrap(registry, cx),
            None => Ok(()),
        }
    }

    /// Construct `ty` through its factory.
    pub fn instantiate(
        &self,
        ty: &TypeDescriptor,
        scope: &ActivationScope,
    ) -> Result<Box<dyn BoundaryObject>, BoundaryFault> {
        let factory = self.factory(ty).ok_or_else(|| {
            BoundaryFault::new(
                "MissingFactory",
                format!("module {} has no factory for {ty}", self.manifest.name),
            )
        })?;
        factory(scope)
    }
}

impl fmt::Debug for ModuleImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleImage")
            .field("name", &self.manifest.name)
            .field("version", &self.manifest.version.to_string())
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("bootstrap", &self.bootstrap.is_some())
            .finish()
    }
}
