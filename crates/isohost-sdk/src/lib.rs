//! isohost SDK
//!
//! The vocabulary shared by an isohost host and its plugins: structural type
//! descriptors, module manifests, the boundary value model with its
//! name-based conversions, and the late-bound object a plugin exposes.
//!
//! # Quick Start
//!
//! ```rust
//! use isohost_sdk::prelude::*;
//!
//! contract_record! {
//!     #[derive(Debug, Clone)]
//!     pub struct Name {
//!         pub text: String,
//!     }
//! }
//!
//! struct WidgetImpl;
//!
//! #[async_trait]
//! impl BoundaryObject for WidgetImpl {
//!     fn members(&self) -> Vec<String> {
//!         vec!["GetName".to_string()]
//!     }
//!
//!     async fn invoke(
//!         &self,
//!         member: &str,
//!         _args: Vec<BoundaryValue>,
//!     ) -> Result<BoundaryValue, BoundaryFault> {
//!         match member {
//!             "GetName" => Ok(Name { text: "ok".into() }.to_boundary()),
//!             other => Err(BoundaryFault::missing_member(other)),
//!         }
//!     }
//! }
//!
//! let manifest = ModuleManifest::new("pluginA", semver::Version::new(1, 0, 0)).with_type(
//!     DeclaredType::new(TypeDescriptor::new("PluginA", "WidgetImpl"))
//!         .implementing(TypeDescriptor::new("Widgets.Contract", "IWidget")),
//! );
//! let image = ModuleImage::new(manifest)
//!     .with_factory("PluginA.WidgetImpl", |_| Ok(Box::new(WidgetImpl)));
//! assert_eq!(image.manifest().name, "pluginA");
//! ```

pub mod convert;
pub mod descriptor;
#[macro_use]
pub mod macros;
pub mod manifest;
pub mod module;
pub mod native;
pub mod object;
pub mod services;
pub mod value;

/// Identifier of the runtime this SDK targets. Modules record it as their
/// `target_framework`.
pub const HOST_FRAMEWORK: &str = "isohost/1";

pub use convert::{
    convert, enum_from_boundary, ContractEnum, ConversionContext, ConversionError, EnumFallback,
    FromBoundary, ToBoundary,
};
pub use descriptor::TypeDescriptor;
pub use manifest::{
    sidecar_path, DeclaredType, DependencyRef, ManifestError, ModuleManifest, PluginMarker,
    MANIFEST_EXTENSION,
};
pub use module::{
    ActivationScope, Bootstrap, BootstrapContext, DependencyOrigin, Factory, LinkedDependency,
    ModuleImage,
};
pub use object::{Arguments, BoundaryFault, BoundaryObject};
pub use services::{HostServices, ServiceRegistry};
pub use value::{BoundaryValue, RecordBuilder};

pub use async_trait::async_trait;
pub use semver;

/// Prelude module with common imports
pub mod prelude {
    pub use crate::convert::{
        ContractEnum, ConversionContext, ConversionError, EnumFallback, FromBoundary, ToBoundary,
    };
    pub use crate::descriptor::TypeDescriptor;
    pub use crate::manifest::{DeclaredType, DependencyRef, ModuleManifest};
    pub use crate::module::{ActivationScope, BootstrapContext, LinkedDependency, ModuleImage};
    pub use crate::object::{Arguments, BoundaryFault, BoundaryObject};
    pub use crate::services::{HostServices, ServiceRegistry};
    pub use crate::value::BoundaryValue;
    pub use crate::{args, contract_enum, contract_record};
    pub use async_trait::async_trait;
    pub use semver;
}
