//! C ABI between the host's native backend and a plugin library.
//!
//! A native plugin exports one symbol, [`NATIVE_ENTRY_SYMBOL`], returning a
//! pointer to a [`NativeModuleVTable`]. Everything else goes through the
//! vtable. Structured data crosses as NUL-terminated JSON strings allocated
//! by the plugin and released with `free_string`.
//!
//! Every bootstrap hands back its own activation scope. A library opened by
//! several boundaries is a single copy in the process, so the host keeps one
//! scope per boundary and passes it to `create`.
//!
//! Plugin authors do not use this module directly; see
//! [`export_module!`](crate::export_module).

use std::collections::BTreeMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;
use crate::module::{ActivationScope, BootstrapContext, ModuleImage};
use crate::object::{BoundaryFault, BoundaryObject};
use crate::services::ServiceRegistry;
use crate::value::BoundaryValue;

/// ABI version. Bumped on any change to [`NativeModuleVTable`].
pub const NATIVE_ABI_VERSION: u32 = 2;

/// Name of the exported entry function, NUL-terminated.
pub const NATIVE_ENTRY_SYMBOL: &[u8] = b"isohost_module_v2\0";

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAULT: i32 = 1;
pub const STATUS_INVALID: i32 = -1;

/// Signature of the exported entry function.
pub type NativeEntryFn = unsafe extern "C" fn() -> *const NativeModuleVTable;

/// Function table exported by a native plugin library.
#[repr(C)]
pub struct NativeModuleVTable {
    pub abi_version: u32,
    pub state: *const c_void,
    /// Compiled-in manifest as JSON.
    pub manifest: unsafe extern "C" fn(state: *const c_void) -> *mut c_char,
    /// Run the module bootstrap with a JSON [`NativeBootstrapRequest`].
    /// Writes the new scope to `out_scope` and the values published so far
    /// in the boundary, as a JSON map, to `out_published`.
    pub bootstrap: unsafe extern "C" fn(
        state: *const c_void,
        request_json: *const c_char,
        out_scope: *mut *mut c_void,
        out_published: *mut *mut c_char,
        out_error: *mut *mut c_char,
    ) -> i32,
    /// Construct a type inside `scope`. A null scope has no services.
    pub create: unsafe extern "C" fn(
        state: *const c_void,
        scope: *const c_void,
        type_name: *const c_char,
        out_instance: *mut *mut c_void,
        out_error: *mut *mut c_char,
    ) -> i32,
    /// Release a scope written by `bootstrap`. Instances built in it stay valid.
    pub release_scope: unsafe extern "C" fn(scope: *mut c_void),
    /// Member names of an instance as a JSON array.
    pub members: unsafe extern "C" fn(instance: *mut c_void) -> *mut c_char,
    pub initialize: unsafe extern "C" fn(instance: *mut c_void, out_error: *mut *mut c_char) -> i32,
    /// Writes a JSON [`InvokeOutcome`] to `out_result`.
    pub invoke: unsafe extern "C" fn(
        instance: *mut c_void,
        member: *const c_char,
        args_json: *const c_char,
        out_result: *mut *mut c_char,
    ) -> i32,
    pub destroy: unsafe extern "C" fn(instance: *mut c_void),
    pub free_string: unsafe extern "C" fn(s: *mut c_char),
}

/// Input of a native `bootstrap`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeBootstrapRequest {
    pub context: BootstrapContext,
    /// Values published by modules bootstrapped earlier in the boundary.
    #[serde(default)]
    pub published: BTreeMap<String, BoundaryValue>,
}

/// Result of a native `invoke`, as written to `out_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum InvokeOutcome {
    Ok(BoundaryValue),
    Fault(BoundaryFault),
}

impl From<Result<BoundaryValue, BoundaryFault>> for InvokeOutcome {
    fn from(result: Result<BoundaryValue, BoundaryFault>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(fault) => Self::Fault(fault),
        }
    }
}

impl From<InvokeOutcome> for Result<BoundaryValue, BoundaryFault> {
    fn from(outcome: InvokeOutcome) -> Self {
        match outcome {
            InvokeOutcome::Ok(value) => Ok(value),
            InvokeOutcome::Fault(fault) => Err(fault),
        }
    }
}

struct ExportState {
    image: ModuleImage,
}

struct NativeInstance {
    object: Box<dyn BoundaryObject>,
}

struct VTableCell(NativeModuleVTable);

// SAFETY: `state` points into the owning `ModuleExport`, which is a static
// and is itself `Sync`.
unsafe impl Send for VTableCell {}
unsafe impl Sync for VTableCell {}

/// Static backing store of an exported module. Created by
/// [`export_module!`](crate::export_module).
pub struct ModuleExport {
    state: OnceLock<ExportState>,
    vtable: OnceLock<VTableCell>,
}

impl ModuleExport {
    pub const fn new() -> Self {
        Self {
            state: OnceLock::new(),
            vtable: OnceLock::new(),
        }
    }

    /// Build (once) and return the vtable. Returns null if `init` panics.
    pub fn vtable(&'static self, init: impl FnOnce() -> ModuleImage) -> *const NativeModuleVTable {
        let state = match self.state.get() {
            Some(state) => state,
            None => match catch_unwind(AssertUnwindSafe(init)) {
                Ok(image) => self.state.get_or_init(|| ExportState { image }),
                Err(_) => return ptr::null(),
            },
        };

        let cell = self.vtable.get_or_init(|| {
            VTableCell(NativeModuleVTable {
                abi_version: NATIVE_ABI_VERSION,
                state: state as *const ExportState as *const c_void,
                manifest: export_manifest,
                bootstrap: export_bootstrap,
                create: export_create,
                release_scope: export_release_scope,
                members: export_members,
                initialize: export_initialize,
                invoke: export_invoke,
                destroy: export_destroy,
                free_string: export_free_string,
            })
        });
        &cell.0
    }
}

impl Default for ModuleExport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// String helpers
// ============================================================================

/// Move a string to the caller. Released by `free_string`.
pub fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Borrow a NUL-terminated UTF-8 string.
///
/// # Safety
/// `p` must be null or point to a NUL-terminated string valid for `'a`.
pub unsafe fn read_c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    // SAFETY: caller guarantees `p` is a valid C string.
    unsafe { CStr::from_ptr(p) }.to_str().ok()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        format!(
            r#"{{"status":"fault","value":{{"type_name":"Encoding","message":"{}"}}}}"#,
            e.to_string().replace('"', "'")
        )
    })
}

unsafe fn write_fault(out: *mut *mut c_char, fault: &BoundaryFault) -> i32 {
    if !out.is_null() {
        // SAFETY: caller passed a valid out pointer.
        unsafe { *out = into_c_string(to_json(fault)) };
    }
    STATUS_FAULT
}

unsafe fn state<'a>(p: *const c_void) -> Option<&'a ExportState> {
    // SAFETY: `p` is the vtable's own state pointer.
    unsafe { (p as *const ExportState).as_ref() }
}

// ============================================================================
// Exported functions
// ============================================================================

unsafe extern "C" fn export_manifest(state_ptr: *const c_void) -> *mut c_char {
    // SAFETY: the host passes back the vtable's state pointer.
    match unsafe { state(state_ptr) } {
        Some(state) => into_c_string(to_json(state.image.manifest())),
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn export_bootstrap(
    state_ptr: *const c_void,
    request_json: *const c_char,
    out_scope: *mut *mut c_void,
    out_published: *mut *mut c_char,
    out_error: *mut *mut c_char,
) -> i32 {
    // SAFETY: pointers come from the host following the vtable contract.
    let (Some(state), Some(json)) = (unsafe { state(state_ptr) }, unsafe { read_c_str(request_json) })
    else {
        return STATUS_INVALID;
    };
    if out_scope.is_null() {
        return STATUS_INVALID;
    }

    let request: NativeBootstrapRequest = match serde_json::from_str(json) {
        Ok(request) => request,
        Err(e) => return unsafe { write_fault(out_error, &BoundaryFault::from_error(&e)) },
    };
    let NativeBootstrapRequest { context, published } = request;

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut registry = ServiceRegistry::new();
        registry.extend_published(published);
        state.image.run_bootstrap(&mut registry, &context)?;
        Ok::<_, BoundaryFault>(registry)
    }))
    .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload)));

    match result {
        Ok(registry) => {
            if !out_published.is_null() {
                // SAFETY: checked non-null.
                unsafe { *out_published = into_c_string(to_json(registry.published())) };
            }
            let scope = Box::new(ActivationScope {
                services: Arc::new(registry),
                host_services: context.host_services,
                dependencies: context.dependencies,
            });
            // SAFETY: checked non-null above.
            unsafe { *out_scope = Box::into_raw(scope) as *mut c_void };
            STATUS_OK
        }
        Err(fault) => unsafe { write_fault(out_error, &fault) },
    }
}

unsafe extern "C" fn export_create(
    state_ptr: *const c_void,
    scope_ptr: *const c_void,
    type_name: *const c_char,
    out_instance: *mut *mut c_void,
    out_error: *mut *mut c_char,
) -> i32 {
    // SAFETY: pointers come from the host following the vtable contract.
    let (Some(state), Some(type_name)) = (unsafe { state(state_ptr) }, unsafe { read_c_str(type_name) })
    else {
        return STATUS_INVALID;
    };
    if out_instance.is_null() {
        return STATUS_INVALID;
    }

    let Some(ty) = TypeDescriptor::parse(type_name) else {
        let fault = BoundaryFault::new("InvalidTypeName", format!("`{type_name}`"));
        return unsafe { write_fault(out_error, &fault) };
    };

    let empty = ActivationScope::default();
    // SAFETY: `scope_ptr` is null or was written by `export_bootstrap` and
    // not yet released.
    let scope = unsafe { (scope_ptr as *const ActivationScope).as_ref() }.unwrap_or(&empty);
    let result = catch_unwind(AssertUnwindSafe(|| state.image.instantiate(&ty, scope)))
        .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload)));

    match result {
        Ok(object) => {
            let instance = Box::new(NativeInstance { object });
            // SAFETY: checked non-null above.
            unsafe { *out_instance = Box::into_raw(instance) as *mut c_void };
            STATUS_OK
        }
        Err(fault) => unsafe { write_fault(out_error, &fault) },
    }
}

unsafe extern "C" fn export_release_scope(scope_ptr: *mut c_void) {
    if scope_ptr.is_null() {
        return;
    }
    // SAFETY: written by `export_bootstrap`; the host releases each scope once.
    let scope = unsafe { Box::from_raw(scope_ptr as *mut ActivationScope) };
    let _ = catch_unwind(AssertUnwindSafe(move || drop(scope)));
}

unsafe fn instance<'a>(p: *mut c_void) -> Option<&'a NativeInstance> {
    // SAFETY: `p` was produced by `export_create` and not yet destroyed.
    unsafe { (p as *const NativeInstance).as_ref() }
}

unsafe extern "C" fn export_members(instance_ptr: *mut c_void) -> *mut c_char {
    // SAFETY: see `instance`.
    let Some(instance) = (unsafe { instance(instance_ptr) }) else {
        return ptr::null_mut();
    };
    match catch_unwind(AssertUnwindSafe(|| instance.object.members())) {
        Ok(members) => into_c_string(to_json(&members)),
        Err(_) => ptr::null_mut(),
    }
}

unsafe extern "C" fn export_initialize(instance_ptr: *mut c_void, out_error: *mut *mut c_char) -> i32 {
    // SAFETY: see `instance`.
    let Some(instance) = (unsafe { instance(instance_ptr) }) else {
        return STATUS_INVALID;
    };
    let result = catch_unwind(AssertUnwindSafe(|| {
        futures::executor::block_on(instance.object.initialize())
    }))
    .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload)));

    match result {
        Ok(()) => STATUS_OK,
        Err(fault) => unsafe { write_fault(out_error, &fault) },
    }
}

unsafe extern "C" fn export_invoke(
    instance_ptr: *mut c_void,
    member: *const c_char,
    args_json: *const c_char,
    out_result: *mut *mut c_char,
) -> i32 {
    // SAFETY: pointers come from the host following the vtable contract.
    let (Some(instance), Some(member), Some(args_json)) = (
        unsafe { instance(instance_ptr) },
        unsafe { read_c_str(member) },
        unsafe { read_c_str(args_json) },
    ) else {
        return STATUS_INVALID;
    };
    if out_result.is_null() {
        return STATUS_INVALID;
    }

    let result = match serde_json::from_str::<Vec<BoundaryValue>>(args_json) {
        Ok(args) => catch_unwind(AssertUnwindSafe(|| {
            futures::executor::block_on(instance.object.invoke(member, args))
        }))
        .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload))),
        Err(e) => Err(BoundaryFault::from_error(&e)),
    };

    let outcome = InvokeOutcome::from(result);
    // SAFETY: checked non-null above.
    unsafe { *out_result = into_c_string(to_json(&outcome)) };
    STATUS_OK
}

unsafe extern "C" fn export_destroy(instance_ptr: *mut c_void) {
    if instance_ptr.is_null() {
        return;
    }
    // SAFETY: produced by `export_create`; the host destroys each instance once.
    let instance = unsafe { Box::from_raw(instance_ptr as *mut NativeInstance) };
    let _ = catch_unwind(AssertUnwindSafe(move || drop(instance)));
}

unsafe extern "C" fn export_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: produced by `into_c_string`.
        drop(unsafe { CString::from_raw(s) });
    }
}
