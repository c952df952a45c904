//! Backend for modules linked into the host binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use isohost_sdk::{
    ActivationScope, BootstrapContext, BoundaryFault, BoundaryObject, ModuleImage, ModuleManifest,
    ServiceRegistry, TypeDescriptor,
};
use parking_lot::RwLock;

use super::{ModuleBackend, OpenModule};
use crate::error::LoadError;

/// Registry of module images keyed by module name and exact version.
#[derive(Debug, Default)]
pub struct ModuleCatalog {
    images: RwLock<BTreeMap<(String, semver::Version), ModuleImage>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image, replacing any image with the same name and version.
    pub fn register(&self, image: ModuleImage) {
        let key = (image.manifest().name.clone(), image.manifest().version.clone());
        self.images.write().insert(key, image);
    }

    pub fn get(&self, name: &str, version: &semver::Version) -> Option<ModuleImage> {
        self.images
            .read()
            .get(&(name.to_string(), version.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }
}

/// Opens modules by looking their manifest's name and version up in a
/// [`ModuleCatalog`]. Every open gets its own copy of the image.
#[derive(Debug, Clone)]
pub struct InProcessBackend {
    catalog: Arc<ModuleCatalog>,
    live: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl InProcessBackend {
    pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
        Self {
            catalog,
            live: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    /// Modules currently open across all boundaries.
    pub fn live_modules(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Modules opened since creation.
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ModuleBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn open(&self, path: &Path, manifest: &ModuleManifest) -> Result<Box<dyn OpenModule>, LoadError> {
        let image = self
            .catalog
            .get(&manifest.name, &manifest.version)
            .ok_or_else(|| LoadError::Backend {
                path: path.to_path_buf(),
                reason: format!(
                    "module {} {} is not in the catalog",
                    manifest.name, manifest.version
                ),
            })?;

        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(InProcessModule {
            path: path.to_path_buf(),
            manifest: manifest.clone(),
            image,
            live: self.live.clone(),
        }))
    }
}

struct InProcessModule {
    path: PathBuf,
    manifest: ModuleManifest,
    image: ModuleImage,
    live: Arc<AtomicUsize>,
}

impl OpenModule for InProcessModule {
    fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn bootstrap(
        &self,
        registry: &mut ServiceRegistry,
        cx: &BootstrapContext,
    ) -> Result<(), BoundaryFault> {
        self.image.run_bootstrap(registry, cx)
    }

    fn can_construct(&self, ty: &TypeDescriptor) -> bool {
        self.image.has_factory(ty)
    }

    fn instantiate(
        &self,
        ty: &TypeDescriptor,
        scope: &ActivationScope,
    ) -> Result<Box<dyn BoundaryObject>, BoundaryFault> {
        self.image.instantiate(ty, scope)
    }
}

impl Drop for InProcessModule {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_requires_catalog_entry() {
        let catalog = Arc::new(ModuleCatalog::new());
        let manifest = ModuleManifest::new("fmtlib", semver::Version::new(1, 4, 0));
        catalog.register(ModuleImage::new(manifest.clone()));
        let backend = InProcessBackend::new(catalog);

        let module = backend.open(Path::new("/p/fmtlib.so"), &manifest).unwrap();
        assert_eq!(backend.live_modules(), 1);
        drop(module);
        assert_eq!(backend.live_modules(), 0);
        assert_eq!(backend.total_opened(), 1);

        let other = ModuleManifest::new("fmtlib", semver::Version::new(2, 0, 1));
        let err = backend.open(Path::new("/p/fmtlib.so"), &other).err().unwrap();
        assert!(matches!(err, LoadError::Backend { .. }));
    }
}
