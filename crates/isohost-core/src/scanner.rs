//! Assembly scanner: finds modules declaring an implementation of a contract
//! without loading them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use isohost_sdk::{ManifestError, ModuleManifest, TypeDescriptor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScanningError;
use crate::traverser::{DirectoryTraverser, WalkDirTraverser};

/// File patterns used when [`ScanOptions::file_types`] is unset.
pub const DEFAULT_FILE_TYPES: &[&str] = &["*.so", "*.dylib", "*.dll"];

/// Directory names never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["runtimes"];

/// One module/type pair found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyScanResult {
    /// The contract the scan looked for.
    pub contract_type: TypeDescriptor,
    /// File name of the module, e.g. `pluginA.dll`.
    pub module_name: String,
    /// Directory containing the module.
    pub module_path: PathBuf,
    pub plugin_type: TypeDescriptor,
}

impl AssemblyScanResult {
    /// Full path of the module file.
    pub fn module_file(&self) -> PathBuf {
        self.module_path.join(&self.module_name)
    }

    /// Last path component of the module directory.
    pub fn directory_name(&self) -> Option<&str> {
        self.module_path.file_name().and_then(|n| n.to_str())
    }
}

/// Scan request.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub starting_path: Option<PathBuf>,
    pub contract: Option<TypeDescriptor>,
    /// Glob patterns matched against file names. Defaults to
    /// [`DEFAULT_FILE_TYPES`].
    pub file_types: Option<Vec<String>>,
    pub excluded_dirs: Vec<String>,
}

impl ScanOptions {
    pub fn new(starting_path: impl Into<PathBuf>, contract: TypeDescriptor) -> Self {
        Self {
            starting_path: Some(starting_path.into()),
            contract: Some(contract),
            file_types: None,
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_file_types<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_types = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    fn patterns(&self) -> Vec<String> {
        match &self.file_types {
            Some(patterns) => patterns.clone(),
            None => DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check the request and return its root and contract.
    pub fn validate(&self) -> Result<(&Path, &TypeDescriptor), ScanningError> {
        let root = self
            .starting_path
            .as_deref()
            .ok_or(ScanningError::MissingStartingPath)?;
        if !root.is_absolute() {
            return Err(ScanningError::RelativePath(root.to_path_buf()));
        }
        let contract = self.contract.as_ref().ok_or(ScanningError::MissingContract)?;
        Ok((root, contract))
    }
}

// ============================================================================
// Metadata-only inspection
// ============================================================================

/// Counts one open handle until dropped.
#[derive(Debug)]
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn acquire(open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self(open)
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A metadata-only view of one module. Counts as open until dropped.
#[derive(Debug)]
pub struct MetadataHandle {
    path: PathBuf,
    manifest: ModuleManifest,
    _open: OpenGuard,
}

impl MetadataHandle {
    pub fn new(path: PathBuf, manifest: ModuleManifest, open: Arc<AtomicUsize>) -> Self {
        Self {
            path,
            manifest,
            _open: OpenGuard::acquire(open),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    /// Take the manifest, releasing the handle.
    pub fn into_manifest(self) -> ModuleManifest {
        self.manifest
    }
}

/// Reads module metadata without executing module code.
pub trait MetadataInspector: Send + Sync {
    fn open(&self, module_path: &Path) -> Result<MetadataHandle, ManifestError>;

    /// Handles currently open.
    fn open_handles(&self) -> usize;
}

/// Reads the `<stem>.module.json` sidecar of a module.
#[derive(Debug, Default, Clone)]
pub struct SidecarInspector {
    open: Arc<AtomicUsize>,
}

impl SidecarInspector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataInspector for SidecarInspector {
    fn open(&self, module_path: &Path) -> Result<MetadataHandle, ManifestError> {
        let manifest = ModuleManifest::read_sidecar(module_path)?;
        Ok(MetadataHandle::new(
            module_path.to_path_buf(),
            manifest,
            self.open.clone(),
        ))
    }

    fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Finds modules containing implementations of a contract.
#[async_trait]
pub trait AssemblyScanner: Send + Sync {
    async fn scan(&self, options: &ScanOptions) -> Result<Vec<AssemblyScanResult>, ScanningError>;
}

pub struct DefaultAssemblyScanner {
    traverser: Arc<dyn DirectoryTraverser>,
    inspector: Arc<dyn MetadataInspector>,
}

impl DefaultAssemblyScanner {
    pub fn new(traverser: Arc<dyn DirectoryTraverser>, inspector: Arc<dyn MetadataInspector>) -> Self {
        Self {
            traverser,
            inspector,
        }
    }

    pub fn inspector(&self) -> &Arc<dyn MetadataInspector> {
        &self.inspector
    }
}

impl Default for DefaultAssemblyScanner {
    fn default() -> Self {
        Self::new(
            Arc::new(WalkDirTraverser::new()),
            Arc::new(SidecarInspector::new()),
        )
    }
}

#[async_trait]
impl AssemblyScanner for DefaultAssemblyScanner {
    async fn scan(&self, options: &ScanOptions) -> Result<Vec<AssemblyScanResult>, ScanningError> {
        options.validate()?;

        let options = options.clone();
        let traverser = self.traverser.clone();
        let inspector = self.inspector.clone();

        tokio::task::spawn_blocking(move || scan_blocking(&*traverser, &*inspector, &options))
            .await
            .map_err(|e| ScanningError::Interrupted(e.to_string()))?
    }
}

fn scan_blocking(
    traverser: &dyn DirectoryTraverser,
    inspector: &dyn MetadataInspector,
    options: &ScanOptions,
) -> Result<Vec<AssemblyScanResult>, ScanningError> {
    let (root, contract) = options.validate()?;
    let patterns = options.patterns();

    // Handles live until the end of this call, on every path.
    let mut handles: Vec<MetadataHandle> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut results = Vec::new();

    for dir in traverser.traverse_directories(root, &options.excluded_dirs)? {
        for file in traverser.traverse_files(&dir, &patterns)? {
            let handle = match inspector.open(&file) {
                Ok(handle) => handle,
                Err(ManifestError::Missing(_)) => {
                    debug!(module = %file.display(), "No manifest, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(module = %file.display(), error = %e, "Skipping unreadable module");
                    continue;
                }
            };

            let module_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            for ty in handle.manifest().implementations_of(contract) {
                let key = (dir.clone(), module_name.clone(), ty.descriptor.clone());
                if !seen.insert(key) {
                    continue;
                }
                debug!(
                    module = %file.display(),
                    plugin_type = %ty.descriptor,
                    contract = %contract,
                    "Found plugin type"
                );
                results.push(AssemblyScanResult {
                    contract_type: contract.clone(),
                    module_name: module_name.clone(),
                    module_path: dir.clone(),
                    plugin_type: ty.descriptor.clone(),
                });
            }

            handles.push(handle);
        }
    }

    results.sort_by(|a, b| {
        (&a.plugin_type.name, &a.plugin_type.namespace, &a.module_path, &a.module_name).cmp(&(
            &b.plugin_type.name,
            &b.plugin_type.namespace,
            &b.module_path,
            &b.module_name,
        ))
    });

    debug!(
        root = %root.display(),
        modules = handles.len(),
        found = results.len(),
        "Scan complete"
    );
    Ok(results)
}
