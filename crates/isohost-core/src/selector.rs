//! Plugin type selection inside a loaded boundary.

use isohost_sdk::{DeclaredType, TypeDescriptor};
use tracing::debug;

use crate::boundary::LoadedModule;

/// Picks the types of a loaded module that can be activated for a contract.
///
/// An empty result is not an error; callers decide whether it is fatal.
pub trait PluginTypeSelector: Send + Sync {
    fn select_plugin_types(&self, module: &LoadedModule, contract: &TypeDescriptor)
        -> Vec<DeclaredType>;
}

/// Concrete, constructible types whose marker names the contract, in
/// declaration order.
#[derive(Debug, Default, Clone)]
pub struct DefaultPluginTypeSelector;

impl PluginTypeSelector for DefaultPluginTypeSelector {
    fn select_plugin_types(
        &self,
        module: &LoadedModule,
        contract: &TypeDescriptor,
    ) -> Vec<DeclaredType> {
        module
            .types()
            .iter()
            .filter(|ty| ty.implements(contract))
            .filter(|ty| {
                let usable = !ty.is_abstract && ty.constructible && module.can_construct(&ty.descriptor);
                if !usable {
                    debug!(
                        plugin_type = %ty.descriptor,
                        "Skipping abstract or non-constructible type"
                    );
                }
                usable
            })
            .cloned()
            .collect()
    }
}
