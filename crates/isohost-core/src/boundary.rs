//! Isolation boundaries and their lifetime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use isohost_sdk::{
    ActivationScope, BoundaryFault, BoundaryObject, DeclaredType, HostServices, LinkedDependency,
    ModuleManifest, ServiceRegistry, TypeDescriptor,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::OpenModule;

/// One plugin module with its private dependencies and services.
///
/// Unloaded when the last [`LoadedModule`] handle and the last proxy lease
/// are dropped. Modules are released in reverse load order.
pub struct Boundary {
    id: Uuid,
    module_file: PathBuf,
    manifest: ModuleManifest,
    /// Private dependencies first, the plugin module last.
    modules: Vec<Box<dyn OpenModule>>,
    services: Arc<ServiceRegistry>,
    host_services: HostServices,
    dependencies: Vec<LinkedDependency>,
    live_proxies: AtomicUsize,
}

impl Boundary {
    pub(crate) fn new(
        module_file: PathBuf,
        manifest: ModuleManifest,
        modules: Vec<Box<dyn OpenModule>>,
        services: ServiceRegistry,
        host_services: HostServices,
        dependencies: Vec<LinkedDependency>,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(
            boundary = %id,
            module = %module_file.display(),
            modules = modules.len(),
            "Boundary loaded"
        );
        Self {
            id,
            module_file,
            manifest,
            modules,
            services: Arc::new(services),
            host_services,
            dependencies,
            live_proxies: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn module_file(&self) -> &Path {
        &self.module_file
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn dependencies(&self) -> &[LinkedDependency] {
        &self.dependencies
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Names of the opened modules in load order.
    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.manifest().name.clone()).collect()
    }

    pub fn live_proxies(&self) -> usize {
        self.live_proxies.load(Ordering::SeqCst)
    }

    fn main_module(&self) -> Option<&dyn OpenModule> {
        self.modules.last().map(|m| m.as_ref())
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        while let Some(module) = self.modules.pop() {
            debug!(
                boundary = %self.id,
                module = %module.path().display(),
                "Releasing module"
            );
            drop(module);
        }
        info!(
            boundary = %self.id,
            module = %self.module_file.display(),
            "Boundary unloaded"
        );
    }
}

/// Keeps a boundary alive on behalf of one proxy.
pub struct BoundaryLease {
    boundary: Arc<Boundary>,
}

impl BoundaryLease {
    fn new(boundary: Arc<Boundary>) -> Self {
        boundary.live_proxies.fetch_add(1, Ordering::SeqCst);
        Self { boundary }
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }
}

impl Drop for BoundaryLease {
    fn drop(&mut self) {
        let left = self.boundary.live_proxies.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(boundary = %self.boundary.id, live_proxies = left, "Proxy released");
    }
}

/// Handle to a loaded boundary plus the types its plugin module declares.
#[derive(Clone)]
pub struct LoadedModule {
    boundary: Arc<Boundary>,
}

impl LoadedModule {
    pub(crate) fn new(boundary: Boundary) -> Self {
        Self {
            boundary: Arc::new(boundary),
        }
    }

    pub fn id(&self) -> Uuid {
        self.boundary.id
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.boundary.manifest
    }

    /// Declared types of the plugin module, in declaration order.
    pub fn types(&self) -> &[DeclaredType] {
        &self.boundary.manifest.types
    }

    pub fn dependencies(&self) -> &[LinkedDependency] {
        &self.boundary.dependencies
    }

    pub fn live_proxies(&self) -> usize {
        self.boundary.live_proxies()
    }

    pub fn can_construct(&self, ty: &TypeDescriptor) -> bool {
        self.boundary
            .main_module()
            .map(|m| m.can_construct(ty))
            .unwrap_or(false)
    }

    /// What a factory sees: this boundary's services and dependencies.
    pub fn activation_scope(&self) -> ActivationScope {
        ActivationScope {
            services: self.boundary.services.clone(),
            host_services: self.boundary.host_services.clone(),
            dependencies: self.boundary.dependencies.clone(),
        }
    }

    pub(crate) fn instantiate(
        &self,
        ty: &TypeDescriptor,
    ) -> Result<Box<dyn BoundaryObject>, BoundaryFault> {
        let module = self.boundary.main_module().ok_or_else(|| {
            BoundaryFault::new("EmptyBoundary", "boundary holds no module")
        })?;
        module.instantiate(ty, &self.activation_scope())
    }

    pub(crate) fn lease(&self) -> BoundaryLease {
        BoundaryLease::new(self.boundary.clone())
    }

    /// A handle that does not keep the boundary loaded.
    pub fn downgrade(&self) -> WeakModule {
        WeakModule {
            id: self.boundary.id,
            boundary: Arc::downgrade(&self.boundary),
        }
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.boundary.id)
            .field("module", &self.boundary.module_file)
            .field("live_proxies", &self.live_proxies())
            .finish()
    }
}

/// Observes a boundary without keeping it loaded.
#[derive(Debug, Clone)]
pub struct WeakModule {
    id: Uuid,
    boundary: Weak<Boundary>,
}

impl WeakModule {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_unloaded(&self) -> bool {
        self.boundary.strong_count() == 0
    }

    pub fn upgrade(&self) -> Option<LoadedModule> {
        self.boundary.upgrade().map(|boundary| LoadedModule { boundary })
    }
}
