//! Parameter and result converters used by proxies.

use isohost_sdk::{BoundaryValue, ConversionContext, ConversionError, EnumFallback, ToBoundary};

/// Turns a host-side argument into its boundary representation.
pub trait ParameterConverter: Send + Sync {
    fn convert(&self, value: &dyn ToBoundary) -> Result<BoundaryValue, ConversionError>;
}

/// Prepares a plugin result for reconstruction as a host type.
pub trait ResultConverter: Send + Sync {
    /// Options applied when rebuilding the host value.
    fn context(&self) -> ConversionContext;

    fn convert(&self, value: BoundaryValue) -> Result<BoundaryValue, ConversionError> {
        Ok(value)
    }
}

/// Name-based structural conversion in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralConverter {
    context: ConversionContext,
}

impl StructuralConverter {
    pub fn new(context: ConversionContext) -> Self {
        Self { context }
    }

    pub fn with_enum_fallback(fallback: EnumFallback) -> Self {
        Self::new(ConversionContext::default().with_enum_fallback(fallback))
    }
}

impl ParameterConverter for StructuralConverter {
    fn convert(&self, value: &dyn ToBoundary) -> Result<BoundaryValue, ConversionError> {
        Ok(value.to_boundary())
    }
}

impl ResultConverter for StructuralConverter {
    fn context(&self) -> ConversionContext {
        self.context
    }
}
