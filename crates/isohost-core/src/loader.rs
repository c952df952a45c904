//! Assembly loader: builds an isolation boundary from a load context.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use isohost_sdk::{
    BootstrapContext, BoundaryFault, DependencyOrigin, DependencyRef, LinkedDependency,
    ManifestError, ModuleManifest, ServiceRegistry,
};
use scopeguard::ScopeGuard;
use tracing::{debug, warn};

use crate::backend::{ModuleBackend, OpenModule};
use crate::boundary::{Boundary, LoadedModule};
use crate::context::LoadContext;
use crate::error::LoadError;
use crate::scanner::{MetadataInspector, SidecarInspector};

/// File extensions probed for private dependencies, in order.
pub const DEPENDENCY_EXTENSIONS: &[&str] = &["so", "dylib", "dll"];

/// Loads a plugin module and its private dependencies into a new boundary.
#[async_trait]
pub trait AssemblyLoader: Send + Sync {
    async fn load(&self, context: LoadContext) -> Result<LoadedModule, LoadError>;
}

pub struct IsolatedAssemblyLoader {
    backend: Arc<dyn ModuleBackend>,
    inspector: Arc<dyn MetadataInspector>,
}

impl IsolatedAssemblyLoader {
    pub fn new(backend: Arc<dyn ModuleBackend>) -> Self {
        Self {
            backend,
            inspector: Arc::new(SidecarInspector::new()),
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn MetadataInspector>) -> Self {
        self.inspector = inspector;
        self
    }
}

#[async_trait]
impl AssemblyLoader for IsolatedAssemblyLoader {
    async fn load(&self, context: LoadContext) -> Result<LoadedModule, LoadError> {
        let backend = self.backend.clone();
        let inspector = self.inspector.clone();
        let path = context.module_file().to_path_buf();

        tokio::task::spawn_blocking(move || load_blocking(&*backend, &*inspector, &context))
            .await
            .map_err(|e| LoadError::Backend {
                path,
                reason: format!("load task failed: {e}"),
            })?
    }
}

type Opened = ScopeGuard<Vec<Box<dyn OpenModule>>, fn(Vec<Box<dyn OpenModule>>)>;

fn release_all(mut modules: Vec<Box<dyn OpenModule>>) {
    while let Some(module) = modules.pop() {
        debug!(module = %module.path().display(), "Unwinding partially loaded module");
    }
}

fn load_blocking(
    backend: &dyn ModuleBackend,
    inspector: &dyn MetadataInspector,
    cx: &LoadContext,
) -> Result<LoadedModule, LoadError> {
    let module_file = cx.module_file();
    if !module_file.is_file() {
        return Err(LoadError::ModuleNotFound(module_file.to_path_buf()));
    }

    let manifest = read_manifest(inspector, module_file)?;
    check_platform(cx, &manifest)?;

    // Everything opened so far is released in reverse order if any later
    // step fails.
    let mut opened: Opened = scopeguard::guard(Vec::new(), release_all as fn(_));
    let mut linked = Vec::new();
    let mut visited = BTreeSet::new();
    visited.insert(manifest.name.clone());

    resolve_dependencies(
        backend,
        inspector,
        cx,
        &manifest,
        &mut opened,
        &mut linked,
        &mut visited,
    )?;

    debug!(
        module = %module_file.display(),
        backend = backend.name(),
        "Opening plugin module"
    );
    opened.push(backend.open(module_file, &manifest)?);

    let bootstrap_cx = BootstrapContext {
        host_services: cx.host_services().clone(),
        dependencies: linked.clone(),
    };
    let mut services = ServiceRegistry::new();
    for module in opened.iter() {
        run_bootstrap(module.as_ref(), &mut services, &bootstrap_cx)?;
    }

    let modules = ScopeGuard::into_inner(opened);
    Ok(LoadedModule::new(Boundary::new(
        module_file.to_path_buf(),
        manifest,
        modules,
        services,
        cx.host_services().clone(),
        linked,
    )))
}

fn read_manifest(
    inspector: &dyn MetadataInspector,
    module_file: &Path,
) -> Result<ModuleManifest, LoadError> {
    // the handle is released as soon as the manifest is moved out
    Ok(inspector.open(module_file)?.into_manifest())
}

fn check_platform(cx: &LoadContext, manifest: &ModuleManifest) -> Result<(), LoadError> {
    if manifest.target_framework == cx.host_framework() {
        return Ok(());
    }
    if cx.ignore_platform_inconsistencies() {
        warn!(
            module = %manifest.name,
            target = %manifest.target_framework,
            host = %cx.host_framework(),
            "Ignoring platform mismatch"
        );
        return Ok(());
    }
    Err(LoadError::IncompatiblePlatform {
        module: manifest.name.clone(),
        expected: cx.host_framework().to_string(),
        found: manifest.target_framework.clone(),
    })
}

fn run_bootstrap(
    module: &dyn OpenModule,
    services: &mut ServiceRegistry,
    cx: &BootstrapContext,
) -> Result<(), LoadError> {
    let result = catch_unwind(AssertUnwindSafe(|| module.bootstrap(services, cx)))
        .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload)));

    result.map_err(|fault| LoadError::Bootstrap {
        module: module.manifest().name.clone(),
        fault_type: fault.type_name,
        message: fault.message,
    })
}

fn is_shared(cx: &LoadContext, dep: &DependencyRef) -> bool {
    dep.exports.iter().any(|ty| cx.is_shared(ty))
        || cx
            .host_module(&dep.name)
            .map(|host| host.exports.iter().any(|ty| cx.is_shared(ty)))
            .unwrap_or(false)
}

/// Depth-first: a dependency's own private dependencies are opened before it.
fn resolve_dependencies(
    backend: &dyn ModuleBackend,
    inspector: &dyn MetadataInspector,
    cx: &LoadContext,
    manifest: &ModuleManifest,
    opened: &mut Opened,
    linked: &mut Vec<LinkedDependency>,
    visited: &mut BTreeSet<String>,
) -> Result<(), LoadError> {
    for dep in &manifest.dependencies {
        if visited.contains(&dep.name) {
            // Already bound in this boundary; the bound version must also
            // satisfy this requirement.
            if let Some(existing) = linked.iter().find(|l| l.name == dep.name) {
                if !dep.version.matches(&existing.version) {
                    return Err(LoadError::UnresolvedDependency {
                        module: manifest.name.clone(),
                        dependency: dep.name.clone(),
                        requirement: dep.version.to_string(),
                        search_dir: cx.module_dir().to_path_buf(),
                    });
                }
            }
            continue;
        }
        visited.insert(dep.name.clone());

        if is_shared(cx, dep) {
            let host = cx
                .host_module(&dep.name)
                .filter(|host| dep.version.matches(&host.version))
                .ok_or_else(|| LoadError::SharedTypeUnresolved {
                    module: manifest.name.clone(),
                    dependency: dep.name.clone(),
                    requirement: dep.version.to_string(),
                })?;
            debug!(
                module = %manifest.name,
                dependency = %dep.name,
                version = %host.version,
                "Bound to host module"
            );
            linked.push(LinkedDependency {
                name: dep.name.clone(),
                version: host.version.clone(),
                origin: DependencyOrigin::Host,
            });
            continue;
        }

        let (path, dep_manifest) =
            probe_private(inspector, cx.module_dir(), dep).ok_or_else(|| {
                LoadError::UnresolvedDependency {
                    module: manifest.name.clone(),
                    dependency: dep.name.clone(),
                    requirement: dep.version.to_string(),
                    search_dir: cx.module_dir().to_path_buf(),
                }
            })?;

        resolve_dependencies(backend, inspector, cx, &dep_manifest, opened, linked, visited)?;

        debug!(
            module = %manifest.name,
            dependency = %dep.name,
            version = %dep_manifest.version,
            path = %path.display(),
            "Loading private dependency"
        );
        opened.push(backend.open(&path, &dep_manifest)?);
        linked.push(LinkedDependency {
            name: dep_manifest.name.clone(),
            version: dep_manifest.version.clone(),
            origin: DependencyOrigin::Private(path),
        });
    }
    Ok(())
}

/// Candidate file names for dependency `name` inside `dir`.
fn candidate_files(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for ext in DEPENDENCY_EXTENSIONS {
        candidates.push(dir.join(format!("{name}.{ext}")));
        if *ext != "dll" {
            candidates.push(dir.join(format!("lib{name}.{ext}")));
        }
    }
    candidates
}

fn probe_private(
    inspector: &dyn MetadataInspector,
    dir: &Path,
    dep: &DependencyRef,
) -> Option<(PathBuf, ModuleManifest)> {
    for candidate in candidate_files(dir, &dep.name) {
        if !candidate.is_file() {
            continue;
        }
        match inspector.open(&candidate) {
            Ok(handle) => {
                let found = handle.manifest();
                if found.name == dep.name && dep.version.matches(&found.version) {
                    return Some((candidate, found.clone()));
                }
                debug!(
                    candidate = %candidate.display(),
                    found = %found.version,
                    required = %dep.version,
                    "Private dependency candidate rejected"
                );
            }
            Err(ManifestError::Missing(_)) => {}
            Err(e) => {
                warn!(candidate = %candidate.display(), error = %e, "Unreadable dependency metadata");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_files() {
        let files = candidate_files(Path::new("/p"), "fmtlib");
        assert_eq!(files[0], PathBuf::from("/p/fmtlib.so"));
        assert_eq!(files[1], PathBuf::from("/p/libfmtlib.so"));
        assert!(files.contains(&PathBuf::from("/p/fmtlib.dll")));
        assert!(!files.contains(&PathBuf::from("/p/libfmtlib.dll")));
    }
}
