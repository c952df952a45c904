//! Error types for the plugin host.

use std::path::PathBuf;

use isohost_sdk::{ConversionError, ManifestError, TypeDescriptor};

use crate::plugin_loader::PipelineStage;

/// Result type alias for the façade.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Invalid scan input or a failed traversal.
#[derive(Debug, thiserror::Error)]
pub enum ScanningError {
    #[error("Starting path must be absolute: {0}")]
    RelativePath(PathBuf),

    #[error("No starting path given")]
    MissingStartingPath,

    #[error("No contract type given")]
    MissingContract,

    #[error("Invalid file pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Traversal of {path} failed: {reason}")]
    Traversal { path: PathBuf, reason: String },

    #[error("Scan task interrupted: {0}")]
    Interrupted(String),
}

/// Failures while building an isolation boundary.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Module not found: {0}")]
    ModuleNotFound(PathBuf),

    #[error("Metadata error: {0}")]
    Metadata(#[from] ManifestError),

    #[error("Module {module} targets {found}, host runs {expected}")]
    IncompatiblePlatform {
        module: String,
        expected: String,
        found: String,
    },

    #[error("Module {module}: private dependency {dependency} {requirement} not found in {search_dir}")]
    UnresolvedDependency {
        module: String,
        dependency: String,
        requirement: String,
        search_dir: PathBuf,
    },

    #[error("Module {module}: shared dependency {dependency} {requirement} has no matching host module")]
    SharedTypeUnresolved {
        module: String,
        dependency: String,
        requirement: String,
    },

    #[error("Backend failed to open {path}: {reason}")]
    Backend { path: PathBuf, reason: String },

    #[error("Bootstrap of module {module} failed: {fault_type}: {message}")]
    Bootstrap {
        module: String,
        fault_type: String,
        message: String,
    },
}

/// Failures while instantiating a plugin type and building its proxy.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Cannot construct {plugin_type} from {module}: {reason}")]
    Construction {
        plugin_type: TypeDescriptor,
        module: String,
        reason: String,
    },

    #[error("Cannot bind {plugin_type} to {contract}: missing members {}", .missing.join(", "))]
    ProxySynthesis {
        plugin_type: TypeDescriptor,
        contract: TypeDescriptor,
        missing: Vec<String>,
    },
}

/// Failures of a single proxied call.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{plugin_type} has no member `{member}`")]
    UnknownMember {
        plugin_type: TypeDescriptor,
        member: String,
    },

    #[error("Conversion failed in {plugin_type}::{member}: {source}")]
    Conversion {
        plugin_type: TypeDescriptor,
        member: String,
        #[source]
        source: ConversionError,
    },

    /// An error raised by the plugin, carrying its original type name.
    #[error("{plugin_type}::{member} raised {fault_type}: {message}")]
    Fault {
        plugin_type: TypeDescriptor,
        member: String,
        fault_type: String,
        message: String,
    },

    #[error("Boundary call to {plugin_type}::{member} failed: {reason}")]
    Boundary {
        plugin_type: TypeDescriptor,
        member: String,
        reason: String,
    },
}

impl PluginError {
    /// Type name of the original plugin-side error, if this is a fault.
    pub fn fault_type(&self) -> Option<&str> {
        match self {
            Self::Fault { fault_type, .. } => Some(fault_type),
            _ => None,
        }
    }
}

/// Errors surfaced by [`PluginLoader`](crate::PluginLoader).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Scanning error: {0}")]
    Scanning(#[from] ScanningError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("No plugin implementing {contract} found in {}", .location.display())]
    PluginNotFound {
        contract: TypeDescriptor,
        location: PathBuf,
    },

    #[error("Scan result is for {found}, requested {expected}")]
    ContractMismatch {
        expected: TypeDescriptor,
        found: TypeDescriptor,
    },

    #[error("Cancelled before {stage}")]
    Cancelled { stage: PipelineStage },
}
