//! Module backends: how a module file becomes something that can
//! bootstrap and construct plugin instances.
//!
//! - [`InProcessBackend`] resolves modules against a catalog of
//!   statically linked [`ModuleImage`](isohost_sdk::ModuleImage)s.
//! - [`NativeBackend`] opens shared libraries exporting the isohost C ABI.

mod in_process;
mod native;

use std::path::Path;

use isohost_sdk::{
    ActivationScope, BootstrapContext, BoundaryFault, BoundaryObject, ModuleManifest,
    ServiceRegistry, TypeDescriptor,
};

use crate::error::LoadError;

pub use in_process::{InProcessBackend, ModuleCatalog};
pub use native::{NativeBackend, NativeModule};

/// Opens module files.
pub trait ModuleBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Open `path`, whose metadata has already been read as `manifest`.
    fn open(&self, path: &Path, manifest: &ModuleManifest) -> Result<Box<dyn OpenModule>, LoadError>;
}

/// A module opened inside a boundary. Dropping it releases the module.
pub trait OpenModule: Send + Sync {
    fn manifest(&self) -> &ModuleManifest;

    fn path(&self) -> &Path;

    /// Wire this module's plugin-local services.
    fn bootstrap(
        &self,
        registry: &mut ServiceRegistry,
        cx: &BootstrapContext,
    ) -> Result<(), BoundaryFault>;

    /// Whether the module exposes a factory for `ty`.
    fn can_construct(&self, ty: &TypeDescriptor) -> bool;

    fn instantiate(
        &self,
        ty: &TypeDescriptor,
        scope: &ActivationScope,
    ) -> Result<Box<dyn BoundaryObject>, BoundaryFault>;
}
