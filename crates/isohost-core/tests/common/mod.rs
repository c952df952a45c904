//! Common test utilities: a widget contract, plugin-side widget objects and
//! a temporary plugin directory backed by an in-process module catalog.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use isohost_core::prelude::*;
use isohost_core::{InProcessBackend, ModuleCatalog};
use isohost_core::sdk::semver::{Version, VersionReq};
use tempfile::TempDir;

pub const CONTRACT_NS: &str = "Widgets.Contract";
pub const CONTRACT_MODULE: &str = "widgets.contract";

pub fn widget_contract() -> TypeDescriptor {
    TypeDescriptor::new(CONTRACT_NS, "IWidget")
}

pub fn gadget_contract() -> TypeDescriptor {
    TypeDescriptor::new(CONTRACT_NS, "IGadget")
}

// ============================================================================
// Host side
// ============================================================================

contract_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Name {
        pub text: String,
    }
}

contract_enum! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum Shade {
        Light = 0,
        Dark = 1,
    }
}

#[async_trait]
pub trait Widget: Send + Sync {
    async fn get_name(&self) -> Result<Name, PluginError>;
    async fn get_shade(&self) -> Result<Shade, PluginError>;
    async fn echo(&self, name: &Name) -> Result<Name, PluginError>;
}

pub struct WidgetProxy(pub PluginProxy);

#[async_trait]
impl Widget for WidgetProxy {
    async fn get_name(&self) -> Result<Name, PluginError> {
        self.0.call("GetName", args![]).await
    }

    async fn get_shade(&self) -> Result<Shade, PluginError> {
        self.0.call("GetShade", args![]).await
    }

    async fn echo(&self, name: &Name) -> Result<Name, PluginError> {
        self.0.call("Echo", args![name]).await
    }
}

pub struct WidgetContract;

impl Contract for WidgetContract {
    type Proxy = WidgetProxy;

    fn info() -> ContractInfo {
        ContractInfo::new(widget_contract(), CONTRACT_MODULE, Version::new(1, 2, 0))
            .with_shared_type(TypeDescriptor::new(CONTRACT_NS, "Name"))
            .with_shared_type(TypeDescriptor::new(CONTRACT_NS, "Shade"))
            .with_members(&["GetName", "GetShade", "Echo"])
    }

    fn bind(proxy: PluginProxy) -> WidgetProxy {
        WidgetProxy(proxy)
    }
}

/// A contract no test plugin implements.
pub struct GadgetContract;

impl Contract for GadgetContract {
    type Proxy = PluginProxy;

    fn info() -> ContractInfo {
        ContractInfo::new(gadget_contract(), CONTRACT_MODULE, Version::new(1, 2, 0))
    }

    fn bind(proxy: PluginProxy) -> PluginProxy {
        proxy
    }
}

// ============================================================================
// Plugin side
// ============================================================================

contract_record! {
    /// The plugin's own copy of `Name`, built against a newer contract.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PluginName {
        pub text: String,
        pub revision: u32,
    }
}

contract_enum! {
    /// Same names as the host's `Shade`, conflicting discriminants.
    #[derive(Debug, PartialEq, Eq)]
    pub enum PluginShade {
        Dark = 0,
        Light = 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    Fault,
    Panic,
}

#[derive(Debug, Clone)]
pub struct TestWidget {
    pub text: String,
    pub shade: PluginShade,
    pub behavior: Behavior,
    pub members: Vec<&'static str>,
}

impl TestWidget {
    pub fn named(text: &str) -> Self {
        Self {
            text: text.to_string(),
            shade: PluginShade::Dark,
            behavior: Behavior::Normal,
            members: vec!["GetName", "GetShade", "Echo"],
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_members(mut self, members: &[&'static str]) -> Self {
        self.members = members.to_vec();
        self
    }
}

#[async_trait]
impl BoundaryObject for TestWidget {
    fn members(&self) -> Vec<String> {
        self.members.iter().map(|m| m.to_string()).collect()
    }

    async fn invoke(
        &self,
        member: &str,
        args: Vec<BoundaryValue>,
    ) -> Result<BoundaryValue, BoundaryFault> {
        match (member, self.behavior) {
            ("GetName", Behavior::Fault) => Err(BoundaryFault::new(
                "InvalidOperation",
                "widget is not ready",
            )),
            ("GetName", Behavior::Panic) => panic!("widget exploded"),
            ("GetName", _) => Ok(PluginName {
                text: self.text.clone(),
                revision: 7,
            }
            .to_boundary()),
            ("GetShade", _) => Ok(self.shade.to_boundary()),
            ("Echo", _) => {
                let mut args = Arguments::new(member, args);
                let name: PluginName = args.next()?;
                Ok(PluginName {
                    text: name.text.to_uppercase(),
                    revision: name.revision + 1,
                }
                .to_boundary())
            }
            (other, _) => Err(BoundaryFault::missing_member(other)),
        }
    }
}

// ============================================================================
// Manifests and images
// ============================================================================

/// Dependency on the module declaring the widget contract.
pub fn contract_dependency() -> DependencyRef {
    DependencyRef::new(CONTRACT_MODULE, VersionReq::parse("^1").unwrap_or(VersionReq::STAR))
        .with_export(widget_contract())
}

/// Manifest of module `name` declaring one widget type per entry of
/// `types`, each in namespace `name`.
pub fn widget_manifest(name: &str, types: &[&str]) -> ModuleManifest {
    types.iter().fold(
        ModuleManifest::new(name, Version::new(1, 0, 0)).with_dependency(contract_dependency()),
        |manifest, ty| {
            manifest.with_type(DeclaredType::new(TypeDescriptor::new(name, *ty)).implementing(widget_contract()))
        },
    )
}

/// Image whose every declared type builds a clone of `widget`.
pub fn widget_image(manifest: ModuleManifest, widget: TestWidget) -> ModuleImage {
    let names: Vec<String> = manifest.types.iter().map(|ty| ty.descriptor.full_name()).collect();
    names.into_iter().fold(ModuleImage::new(manifest), |image, name| {
        let widget = widget.clone();
        image.with_factory(name, move |_| Ok(Box::new(widget.clone())))
    })
}

// ============================================================================
// Plugin directory
// ============================================================================

/// A temporary plugin root whose modules resolve through an in-process
/// catalog.
pub struct Fixture {
    dir: TempDir,
    pub catalog: Arc<ModuleCatalog>,
    pub backend: InProcessBackend,
}

impl Fixture {
    pub fn new() -> Self {
        let catalog = Arc::new(ModuleCatalog::new());
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            backend: InProcessBackend::new(catalog.clone()),
            catalog,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a stub module file at `dir/file` with the manifest sidecar.
    pub fn write_module(&self, dir: &str, file: &str, manifest: &ModuleManifest) -> PathBuf {
        let dir = self.root().join(dir);
        std::fs::create_dir_all(&dir).expect("create plugin dir");
        let path = dir.join(file);
        std::fs::write(&path, b"\x7fELF").expect("write module");
        manifest.write_sidecar(&path).expect("write sidecar");
        path
    }

    /// Write `image`'s module at `dir/file` and make it loadable.
    pub fn install(&self, dir: &str, file: &str, image: ModuleImage) -> PathBuf {
        let path = self.write_module(dir, file, image.manifest());
        self.catalog.register(image);
        path
    }

    pub fn loader(&self) -> PluginLoader {
        PluginLoader::new(Arc::new(self.backend.clone()))
    }

    /// Scan result for `ty` in `dir/file`.
    pub fn scan_result(&self, dir: &str, file: &str, ty: TypeDescriptor) -> AssemblyScanResult {
        AssemblyScanResult {
            contract_type: widget_contract(),
            module_name: file.to_string(),
            module_path: self.root().join(dir),
            plugin_type: ty,
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
