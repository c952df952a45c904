//! Backend for shared libraries exporting the isohost C ABI.

use std::ffi::{c_char, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use async_trait::async_trait;
use isohost_sdk::native::{
    read_c_str, InvokeOutcome, NativeBootstrapRequest, NativeEntryFn, NativeModuleVTable,
    NATIVE_ABI_VERSION, NATIVE_ENTRY_SYMBOL, STATUS_OK,
};
use isohost_sdk::{
    ActivationScope, BootstrapContext, BoundaryFault, BoundaryObject, BoundaryValue,
    ModuleManifest, ServiceRegistry, TypeDescriptor,
};
use parking_lot::Mutex;
use tracing::debug;

use super::{ModuleBackend, OpenModule};
use crate::error::LoadError;

/// Opens `.so`/`.dylib`/`.dll` plugin libraries with `libloading`.
///
/// The operating system loader shares one copy of a library per path within
/// a process, so two boundaries opening the same file share its code and
/// statics. Each boundary still gets its own activation scope from the
/// library's bootstrap. Private dependencies with different versions live in
/// different files and stay apart.
#[derive(Debug, Default, Clone)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn open(&self, path: &Path, manifest: &ModuleManifest) -> Result<Box<dyn OpenModule>, LoadError> {
        let backend_error = |reason: String| LoadError::Backend {
            path: path.to_path_buf(),
            reason,
        };

        // SAFETY: loading a library runs its initializers; plugin libraries
        // are trusted code.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| backend_error(format!("failed to load library: {e}")))?;

        // SAFETY: the symbol type matches the exported entry point.
        let vtable = unsafe {
            let entry: libloading::Symbol<NativeEntryFn> = library
                .get(NATIVE_ENTRY_SYMBOL)
                .map_err(|e| backend_error(format!("entry symbol not found: {e}")))?;
            entry()
        };

        // SAFETY: the vtable stays valid while `library` is loaded, and the
        // module keeps the library alive.
        let module = unsafe { NativeModule::from_raw(path, manifest, vtable, Some(library)) }?;
        debug!(module = %path.display(), "Native module opened");
        Ok(Box::new(module))
    }
}

struct VTablePtr(*const NativeModuleVTable);

// SAFETY: the vtable is immutable and its functions are thread-safe per
// the native ABI contract.
unsafe impl Send for VTablePtr {}
unsafe impl Sync for VTablePtr {}

struct NativeLibrary {
    vtable: VTablePtr,
    // Declared last so it is unloaded after everything using the vtable.
    _library: Option<libloading::Library>,
}

impl NativeLibrary {
    fn vtable(&self) -> &NativeModuleVTable {
        // SAFETY: non-null checked in `NativeModule::from_raw`; valid while
        // the library is loaded.
        unsafe { &*self.vtable.0 }
    }

    /// Take ownership of a string allocated by the plugin.
    fn take_string(&self, s: *mut c_char) -> Option<String> {
        if s.is_null() {
            return None;
        }
        // SAFETY: `s` was produced by the plugin and is released exactly once.
        let text = unsafe { read_c_str(s) }.map(str::to_string);
        unsafe { (self.vtable().free_string)(s) };
        text
    }

    fn take_fault(&self, s: *mut c_char, fallback: &str) -> BoundaryFault {
        self.take_string(s)
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_else(|| BoundaryFault::new("NativeError", fallback))
    }
}

/// Activation scope owned by the plugin library, released through its vtable.
struct ScopeHandle(*mut c_void);

// SAFETY: the scope is only read by `create`, which the native ABI requires
// to be thread-safe.
unsafe impl Send for ScopeHandle {}

/// A native library opened inside a boundary.
pub struct NativeModule {
    path: PathBuf,
    manifest: ModuleManifest,
    scope: Mutex<ScopeHandle>,
    library: Arc<NativeLibrary>,
}

impl NativeModule {
    /// Wrap an exported vtable.
    ///
    /// # Safety
    /// `vtable` must be null or point to a vtable that stays valid for as
    /// long as `library` (or, without a library, the process) is loaded.
    pub unsafe fn from_raw(
        path: &Path,
        manifest: &ModuleManifest,
        vtable: *const NativeModuleVTable,
        library: Option<libloading::Library>,
    ) -> Result<Self, LoadError> {
        let backend_error = |reason: String| LoadError::Backend {
            path: path.to_path_buf(),
            reason,
        };

        if vtable.is_null() {
            return Err(backend_error("entry point returned no vtable".to_string()));
        }
        // SAFETY: non-null, valid per the caller's contract.
        let abi_version = unsafe { (*vtable).abi_version };
        if abi_version != NATIVE_ABI_VERSION {
            return Err(backend_error(format!(
                "ABI version {abi_version}, host expects {NATIVE_ABI_VERSION}"
            )));
        }

        let library = Arc::new(NativeLibrary {
            vtable: VTablePtr(vtable),
            _library: library,
        });

        // The compiled-in manifest must describe the same module as the
        // metadata the scan was based on.
        let vt = library.vtable();
        // SAFETY: state pointer passed back unchanged.
        let compiled = library
            .take_string(unsafe { (vt.manifest)(vt.state) })
            .and_then(|json| serde_json::from_str::<ModuleManifest>(&json).ok())
            .ok_or_else(|| backend_error("library did not report its manifest".to_string()))?;
        if compiled.name != manifest.name || compiled.version != manifest.version {
            return Err(backend_error(format!(
                "library is {} {}, metadata says {} {}",
                compiled.name, compiled.version, manifest.name, manifest.version
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            manifest: manifest.clone(),
            scope: Mutex::new(ScopeHandle(ptr::null_mut())),
            library,
        })
    }

    fn replace_scope(&self, scope: *mut c_void) {
        let previous = std::mem::replace(&mut *self.scope.lock(), ScopeHandle(scope));
        if !previous.0.is_null() {
            let vt = self.library.vtable();
            // SAFETY: written by this library's `bootstrap` and released once.
            unsafe { (vt.release_scope)(previous.0) };
        }
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        self.replace_scope(ptr::null_mut());
    }
}

impl OpenModule for NativeModule {
    fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The library builds a scope of its own for this boundary. Values
    /// published in `registry` go in with the request and the library's
    /// published values come back into `registry`.
    fn bootstrap(
        &self,
        registry: &mut ServiceRegistry,
        cx: &BootstrapContext,
    ) -> Result<(), BoundaryFault> {
        let request = NativeBootstrapRequest {
            context: cx.clone(),
            published: registry.published().clone(),
        };
        let json = serde_json::to_string(&request).map_err(|e| BoundaryFault::from_error(&e))?;
        let json = CString::new(json).map_err(|e| BoundaryFault::from_error(&e))?;

        let vt = self.library.vtable();
        let mut scope = ptr::null_mut();
        let mut published = ptr::null_mut();
        let mut error = ptr::null_mut();
        // SAFETY: valid state pointer, NUL-terminated input, valid out pointers.
        let status = unsafe {
            (vt.bootstrap)(vt.state, json.as_ptr(), &mut scope, &mut published, &mut error)
        };
        if status != STATUS_OK {
            return Err(self.library.take_fault(error, "bootstrap failed"));
        }
        self.replace_scope(scope);

        let published: std::collections::BTreeMap<String, BoundaryValue> = self
            .library
            .take_string(published)
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| BoundaryFault::from_error(&e))?
            .unwrap_or_default();
        registry.extend_published(published);
        Ok(())
    }

    fn can_construct(&self, ty: &TypeDescriptor) -> bool {
        self.manifest
            .types
            .iter()
            .any(|declared| declared.descriptor == *ty && declared.constructible)
    }

    fn instantiate(
        &self,
        ty: &TypeDescriptor,
        _scope: &ActivationScope,
    ) -> Result<Box<dyn BoundaryObject>, BoundaryFault> {
        let type_name = CString::new(ty.full_name()).map_err(|e| BoundaryFault::from_error(&e))?;

        let vt = self.library.vtable();
        let mut instance = ptr::null_mut();
        let mut error = ptr::null_mut();
        let scope = self.scope.lock();
        // SAFETY: valid state and scope pointers, NUL-terminated input, valid
        // out pointers. The lock keeps the scope alive for the call.
        let status = unsafe {
            (vt.create)(vt.state, scope.0, type_name.as_ptr(), &mut instance, &mut error)
        };
        drop(scope);
        if status != STATUS_OK || instance.is_null() {
            return Err(self.library.take_fault(error, "create failed"));
        }

        Ok(Box::new(NativeObject {
            inner: Arc::new(NativeInstance {
                ptr: instance,
                library: self.library.clone(),
            }),
        }))
    }
}

struct NativeInstance {
    ptr: *mut c_void,
    library: Arc<NativeLibrary>,
}

// SAFETY: plugin objects are `Send + Sync` on the plugin side.
unsafe impl Send for NativeInstance {}
unsafe impl Sync for NativeInstance {}

impl NativeInstance {
    fn members(&self) -> Vec<String> {
        let vt = self.library.vtable();
        // SAFETY: live instance pointer.
        let json = self.library.take_string(unsafe { (vt.members)(self.ptr) });
        json.and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    fn initialize(&self) -> Result<(), BoundaryFault> {
        let vt = self.library.vtable();
        let mut error = ptr::null_mut();
        // SAFETY: live instance pointer, valid out pointer.
        let status = unsafe { (vt.initialize)(self.ptr, &mut error) };
        if status == STATUS_OK {
            Ok(())
        } else {
            Err(self.library.take_fault(error, "initialize failed"))
        }
    }

    fn invoke(&self, member: &str, args: &[BoundaryValue]) -> Result<BoundaryValue, BoundaryFault> {
        let member = CString::new(member).map_err(|e| BoundaryFault::from_error(&e))?;
        let args = serde_json::to_string(args).map_err(|e| BoundaryFault::from_error(&e))?;
        let args = CString::new(args).map_err(|e| BoundaryFault::from_error(&e))?;

        let vt = self.library.vtable();
        let mut out = ptr::null_mut();
        // SAFETY: live instance pointer, NUL-terminated inputs, valid out pointer.
        let status = unsafe { (vt.invoke)(self.ptr, member.as_ptr(), args.as_ptr(), &mut out) };
        if status != STATUS_OK {
            return Err(BoundaryFault::new(
                "NativeError",
                format!("invoke returned status {status}"),
            ));
        }

        let outcome: InvokeOutcome = self
            .library
            .take_string(out)
            .and_then(|json| serde_json::from_str(&json).ok())
            .ok_or_else(|| BoundaryFault::new("NativeError", "malformed invoke result"))?;
        outcome.into()
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        let vt = self.library.vtable();
        // SAFETY: the instance is destroyed exactly once, before the library.
        unsafe { (vt.destroy)(self.ptr) };
    }
}

/// Host-side handle to an object living in a native library. Calls run on
/// the blocking pool.
struct NativeObject {
    inner: Arc<NativeInstance>,
}

fn join_fault(err: tokio::task::JoinError) -> BoundaryFault {
    if err.is_panic() {
        BoundaryFault::panic(err.into_panic())
    } else {
        BoundaryFault::new("Cancelled", err.to_string())
    }
}

#[async_trait]
impl BoundaryObject for NativeObject {
    fn members(&self) -> Vec<String> {
        self.inner.members()
    }

    async fn initialize(&self) -> Result<(), BoundaryFault> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.initialize())
            .await
            .map_err(join_fault)?
    }

    async fn invoke(
        &self,
        member: &str,
        args: Vec<BoundaryValue>,
    ) -> Result<BoundaryValue, BoundaryFault> {
        let inner = self.inner.clone();
        let member = member.to_string();
        tokio::task::spawn_blocking(move || inner.invoke(&member, &args))
            .await
            .map_err(join_fault)?
    }
}
