//! Plugin host for isohost.
//!
//! Finds plugin modules by reading their metadata, loads each into its own
//! isolation boundary with private copies of its dependencies, and hands
//! the host a proxy implementing the host's contract.
//!
//! ```rust,ignore
//! let loader = PluginLoader::new(Arc::new(NativeBackend::new()));
//! let scan = loader.find_exactly_one::<WidgetContract>("/opt/app/plugins", Some("pluginA")).await?;
//! let widget = loader.load_plugin::<WidgetContract>(&scan, LoadOptions::new()).await?;
//! let name = widget.get_name().await?;
//! ```

pub mod activator;
pub mod backend;
pub mod boundary;
pub mod config;
pub mod context;
pub mod contract;
pub mod convert;
pub mod error;
pub mod loader;
pub mod logging;
pub mod plugin_loader;
pub mod proxy;
pub mod scanner;
pub mod selector;
pub mod traverser;

pub use activator::{ActivationOptions, DefaultPluginActivator, PluginActivator};
pub use backend::{InProcessBackend, ModuleBackend, ModuleCatalog, NativeBackend, OpenModule};
pub use boundary::{Boundary, LoadedModule, WeakModule};
pub use config::{ConfigError, HostConfig};
pub use context::{HostModule, LoadContext};
pub use contract::{Contract, ContractInfo};
pub use convert::{ParameterConverter, ResultConverter, StructuralConverter};
pub use error::{ActivationError, Error, LoadError, PluginError, Result, ScanningError};
pub use loader::{AssemblyLoader, IsolatedAssemblyLoader};
pub use logging::{init_tracing, LogFormat};
pub use plugin_loader::{LoadOptions, PipelineStage, PluginLoader, StreamMode};
pub use proxy::PluginProxy;
pub use scanner::{
    AssemblyScanResult, AssemblyScanner, DefaultAssemblyScanner, MetadataInspector, ScanOptions,
    SidecarInspector,
};
pub use selector::{DefaultPluginTypeSelector, PluginTypeSelector};
pub use traverser::{DirectoryTraverser, WalkDirTraverser};

pub use isohost_sdk as sdk;
pub use tokio_util::sync::CancellationToken;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::contract::{Contract, ContractInfo};
    pub use crate::error::{Error, PluginError, Result};
    pub use crate::plugin_loader::{LoadOptions, PluginLoader, StreamMode};
    pub use crate::proxy::PluginProxy;
    pub use crate::scanner::AssemblyScanResult;
    pub use isohost_sdk::prelude::*;
}
