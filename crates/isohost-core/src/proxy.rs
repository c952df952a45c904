//! The host-side proxy forwarding calls into a boundary.

use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use isohost_sdk::{BoundaryFault, BoundaryObject, BoundaryValue, FromBoundary, ToBoundary, TypeDescriptor};
use uuid::Uuid;

use crate::boundary::BoundaryLease;
use crate::convert::{ParameterConverter, ResultConverter};
use crate::error::PluginError;

/// Forwards contract calls to an instance living in a boundary.
///
/// Contract adapters wrap a `PluginProxy` and implement the host trait by
/// calling [`call`](Self::call) for each member. The proxy never exposes the
/// instance's concrete type.
pub struct PluginProxy {
    // Field order is drop order: the instance goes before the lease.
    instance: Arc<dyn BoundaryObject>,
    dispatch: BTreeSet<String>,
    parameter_converter: Arc<dyn ParameterConverter>,
    result_converter: Arc<dyn ResultConverter>,
    plugin_type: TypeDescriptor,
    contract: TypeDescriptor,
    lease: BoundaryLease,
}

impl PluginProxy {
    pub(crate) fn new(
        instance: Arc<dyn BoundaryObject>,
        dispatch: BTreeSet<String>,
        parameter_converter: Arc<dyn ParameterConverter>,
        result_converter: Arc<dyn ResultConverter>,
        plugin_type: TypeDescriptor,
        contract: TypeDescriptor,
        lease: BoundaryLease,
    ) -> Self {
        Self {
            instance,
            dispatch,
            parameter_converter,
            result_converter,
            plugin_type,
            contract,
            lease,
        }
    }

    pub fn plugin_type(&self) -> &TypeDescriptor {
        &self.plugin_type
    }

    pub fn contract(&self) -> &TypeDescriptor {
        &self.contract
    }

    pub fn boundary_id(&self) -> Uuid {
        self.lease.boundary().id()
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.dispatch.iter().map(String::as_str)
    }

    /// Call `member` across the boundary.
    ///
    /// Arguments are converted before the returned future is first polled.
    /// A plugin error comes back as [`PluginError::Fault`] with the original
    /// type name and message; a plugin panic as a fault of type `Panic`.
    pub fn call<'a, R>(
        &'a self,
        member: &'a str,
        args: &[&(dyn ToBoundary + Sync)],
    ) -> impl Future<Output = Result<R, PluginError>> + Send + 'a
    where
        R: FromBoundary + Send + 'a,
    {
        let converted: Result<Vec<BoundaryValue>, _> = args
            .iter()
            .map(|arg| self.parameter_converter.convert(*arg))
            .collect();

        async move {
            if !self.dispatch.contains(member) {
                return Err(PluginError::UnknownMember {
                    plugin_type: self.plugin_type.clone(),
                    member: member.to_string(),
                });
            }

            let args = converted.map_err(|source| self.conversion_error(member, source))?;

            let outcome = AssertUnwindSafe(self.instance.invoke(member, args))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(BoundaryFault::panic(payload)));

            let value = outcome.map_err(|fault| PluginError::Fault {
                plugin_type: self.plugin_type.clone(),
                member: member.to_string(),
                fault_type: fault.type_name,
                message: fault.message,
            })?;

            let value = self
                .result_converter
                .convert(value)
                .map_err(|source| self.conversion_error(member, source))?;
            R::from_boundary(value, &self.result_converter.context())
                .map_err(|source| self.conversion_error(member, source))
        }
    }

    fn conversion_error(&self, member: &str, source: isohost_sdk::ConversionError) -> PluginError {
        PluginError::Conversion {
            plugin_type: self.plugin_type.clone(),
            member: member.to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for PluginProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProxy")
            .field("plugin_type", &self.plugin_type)
            .field("contract", &self.contract)
            .field("boundary", &self.boundary_id())
            .finish()
    }
}
