//! Service handles on both sides of a boundary.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::BoundaryValue;

/// Plugin-local service registry.
///
/// Filled by module bootstraps when a boundary is loaded and read by
/// factories when a plugin type is constructed. The host never looks inside.
///
/// Arbitrary services stay in the library that registered them. Values
/// registered with [`publish`](Self::publish) are also carried to the other
/// modules of the boundary, including native libraries.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    published: BTreeMap<String, BoundaryValue>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `key`, replacing any previous entry.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, service: T) {
        self.services.insert(key.into(), Arc::new(service));
    }

    /// Look up `key` as a `T`. Returns `None` if absent or of another type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services
            .get(key)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Register a plain value that every module of the boundary can read,
    /// as a [`BoundaryValue`] service under `key`.
    pub fn publish(&mut self, key: impl Into<String>, value: impl Into<BoundaryValue>) {
        let key = key.into();
        let value = value.into();
        self.services.insert(key.clone(), Arc::new(value.clone()));
        self.published.insert(key, value);
    }

    /// Values registered with [`publish`](Self::publish).
    pub fn published(&self) -> &BTreeMap<String, BoundaryValue> {
        &self.published
    }

    /// Publish every entry of `values`.
    pub fn extend_published(&mut self, values: impl IntoIterator<Item = (String, BoundaryValue)>) {
        for (key, value) in values {
            self.publish(key, value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.services.keys().collect();
        keys.sort();
        f.debug_struct("ServiceRegistry").field("keys", &keys).finish()
    }
}

/// Opaque host-owned services handed to plugin bootstraps by key.
///
/// The host core only threads this through; it never interprets entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostServices(BTreeMap<String, BoundaryValue>);

impl HostServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<BoundaryValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<BoundaryValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&BoundaryValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BoundaryValue)> {
        self.0.iter()
    }
}
