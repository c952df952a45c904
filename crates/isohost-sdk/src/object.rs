//! The late-bound object living inside a boundary.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::convert::{ConversionContext, ConversionError, FromBoundary};
use crate::value::BoundaryValue;

/// An error raised inside a boundary, reduced to what can cross it:
/// the original type name and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryFault {
    pub type_name: String,
    pub message: String,
}

impl BoundaryFault {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Capture any error, keeping its Rust type name.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(std::any::type_name::<E>(), err.to_string())
    }

    pub fn missing_member(member: &str) -> Self {
        Self::new("MissingMember", format!("no member named `{member}`"))
    }

    /// Build a fault from a caught panic payload.
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new("Panic", message)
    }
}

impl fmt::Display for BoundaryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl From<ConversionError> for BoundaryFault {
    fn from(err: ConversionError) -> Self {
        Self::from_error(&err)
    }
}

/// A plugin instance as seen through the boundary.
///
/// The host never learns the concrete type; it calls members by name with
/// arguments already reduced to [`BoundaryValue`]s.
#[async_trait]
pub trait BoundaryObject: Send + Sync {
    /// Names of the members this object answers to.
    fn members(&self) -> Vec<String>;

    /// Asynchronous initialization, awaited once before the first call.
    async fn initialize(&self) -> Result<(), BoundaryFault> {
        Ok(())
    }

    /// Late-bound call of `member`.
    async fn invoke(
        &self,
        member: &str,
        args: Vec<BoundaryValue>,
    ) -> Result<BoundaryValue, BoundaryFault>;
}

/// Positional argument reader for [`BoundaryObject::invoke`] implementations.
pub struct Arguments {
    member: String,
    values: std::vec::IntoIter<BoundaryValue>,
    position: usize,
    cx: ConversionContext,
}

impl Arguments {
    pub fn new(member: &str, args: Vec<BoundaryValue>) -> Self {
        Self {
            member: member.to_string(),
            values: args.into_iter(),
            position: 0,
            cx: ConversionContext::default(),
        }
    }

    pub fn with_context(mut self, cx: ConversionContext) -> Self {
        self.cx = cx;
        self
    }

    /// Read the next argument as `T`. A missing trailing argument reads as
    /// `Null`, so optional parameters may be omitted.
    pub fn next<T: FromBoundary>(&mut self) -> Result<T, BoundaryFault> {
        let index = self.position;
        self.position += 1;
        match self.values.next() {
            Some(value) => T::from_boundary(value, &self.cx)
                .map_err(|e| BoundaryFault::from(e.at_index(index))),
            None => T::from_boundary(BoundaryValue::Null, &self.cx).map_err(|_| {
                BoundaryFault::new(
                    "MissingArgument",
                    format!("`{}` expects an argument at position {index}", self.member),
                )
            }),
        }
    }
}
