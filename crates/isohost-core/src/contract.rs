//! Host-side contract declarations.
//!
//! A contract is a host trait that plugins implement. Because a plugin's
//! instance never has the host's type identity, the host describes each
//! contract as plain data ([`ContractInfo`]) and provides a small adapter
//! ([`Contract::Proxy`]) that implements the trait by forwarding to a
//! [`PluginProxy`].
//!
//! ```rust,ignore
//! #[async_trait]
//! pub trait Widget: Send + Sync {
//!     async fn get_name(&self) -> Result<Name, PluginError>;
//! }
//!
//! pub struct WidgetProxy(PluginProxy);
//!
//! #[async_trait]
//! impl Widget for WidgetProxy {
//!     async fn get_name(&self) -> Result<Name, PluginError> {
//!         self.0.call("GetName", args![]).await
//!     }
//! }
//!
//! pub struct WidgetContract;
//!
//! impl Contract for WidgetContract {
//!     type Proxy = WidgetProxy;
//!     fn info() -> ContractInfo {
//!         ContractInfo::new(TypeDescriptor::new("Widgets.Contract", "IWidget"), "widgets", Version::new(1, 0, 0))
//!             .with_shared_type(TypeDescriptor::new("Widgets.Contract", "Name"))
//!             .with_members(&["GetName"])
//!     }
//!     fn bind(proxy: PluginProxy) -> WidgetProxy {
//!         WidgetProxy(proxy)
//!     }
//! }
//! ```

use isohost_sdk::TypeDescriptor;

use crate::proxy::PluginProxy;

/// Plain-data description of a host contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInfo {
    pub descriptor: TypeDescriptor,
    /// The host module that declares the contract.
    pub home_module: String,
    pub home_version: semver::Version,
    /// Types reachable from the contract's signatures, besides the contract
    /// itself.
    pub shared_types: Vec<TypeDescriptor>,
    /// Members every implementation must answer to.
    pub members: Vec<String>,
}

impl ContractInfo {
    pub fn new(
        descriptor: TypeDescriptor,
        home_module: impl Into<String>,
        home_version: semver::Version,
    ) -> Self {
        Self {
            descriptor,
            home_module: home_module.into(),
            home_version,
            shared_types: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn with_shared_type(mut self, ty: TypeDescriptor) -> Self {
        self.shared_types.push(ty);
        self
    }

    pub fn with_members(mut self, members: &[&str]) -> Self {
        self.members.extend(members.iter().map(|m| m.to_string()));
        self
    }

    /// The contract descriptor followed by its shared types.
    pub fn home_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        std::iter::once(&self.descriptor).chain(self.shared_types.iter())
    }
}

/// A host contract that plugins can implement.
pub trait Contract: 'static {
    /// Host-side adapter implementing the contract trait.
    type Proxy: Send + Sync + 'static;

    fn info() -> ContractInfo;

    fn bind(proxy: PluginProxy) -> Self::Proxy;
}
