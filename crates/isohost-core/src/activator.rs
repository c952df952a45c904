//! Plugin activation: construct the instance inside its boundary and bind
//! a proxy to it.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use isohost_sdk::{BoundaryFault, BoundaryObject, DeclaredType};
use tracing::debug;

use crate::boundary::LoadedModule;
use crate::contract::ContractInfo;
use crate::convert::{ParameterConverter, ResultConverter};
use crate::error::ActivationError;
use crate::proxy::PluginProxy;

/// Everything needed to activate one plugin type.
#[derive(Clone)]
pub struct ActivationOptions {
    pub plugin_type: DeclaredType,
    pub module: LoadedModule,
    pub contract: ContractInfo,
    pub parameter_converter: Arc<dyn ParameterConverter>,
    pub result_converter: Arc<dyn ResultConverter>,
}

#[async_trait]
pub trait PluginActivator: Send + Sync {
    async fn activate(&self, options: ActivationOptions) -> Result<PluginProxy, ActivationError>;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultPluginActivator;

impl DefaultPluginActivator {
    fn construction_error(options: &ActivationOptions, fault: BoundaryFault) -> ActivationError {
        ActivationError::Construction {
            plugin_type: options.plugin_type.descriptor.clone(),
            module: options.module.manifest().name.clone(),
            reason: fault.to_string(),
        }
    }
}

#[async_trait]
impl PluginActivator for DefaultPluginActivator {
    async fn activate(&self, options: ActivationOptions) -> Result<PluginProxy, ActivationError> {
        let ty = options.plugin_type.descriptor.clone();

        // Factories may block (native libraries), so construct on the
        // blocking pool. A panicking factory surfaces as a join error.
        let module = options.module.clone();
        let construct_ty = ty.clone();
        let instance = tokio::task::spawn_blocking(move || module.instantiate(&construct_ty))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    BoundaryFault::panic(e.into_panic())
                } else {
                    BoundaryFault::new("Cancelled", e.to_string())
                }
            })
            .and_then(|result| result)
            .map_err(|fault| Self::construction_error(&options, fault))?;
        let instance: Arc<dyn BoundaryObject> = Arc::from(instance);

        AssertUnwindSafe(instance.initialize())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload)))
            .map_err(|fault| Self::construction_error(&options, fault))?;

        let available: BTreeSet<String> = instance.members().into_iter().collect();
        let missing: Vec<String> = options
            .contract
            .members
            .iter()
            .filter(|member| !available.contains(*member))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ActivationError::ProxySynthesis {
                plugin_type: ty,
                contract: options.contract.descriptor.clone(),
                missing,
            });
        }

        // A contract that lists no members dispatches to whatever the
        // instance exposes.
        let dispatch: BTreeSet<String> = if options.contract.members.is_empty() {
            available
        } else {
            options.contract.members.iter().cloned().collect()
        };
        debug!(
            plugin_type = %ty,
            contract = %options.contract.descriptor,
            boundary = %options.module.id(),
            members = dispatch.len(),
            "Plugin activated"
        );

        Ok(PluginProxy::new(
            instance,
            dispatch,
            options.parameter_converter.clone(),
            options.result_converter.clone(),
            ty,
            options.contract.descriptor.clone(),
            options.module.lease(),
        ))
    }
}
