//! Load context: the description of one isolation boundary.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use isohost_sdk::{HostServices, TypeDescriptor};

use crate::contract::ContractInfo;

/// A module the host has already loaded and can share with plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostModule {
    pub name: String,
    pub version: semver::Version,
    pub exports: Vec<TypeDescriptor>,
}

impl HostModule {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
            exports: Vec::new(),
        }
    }

    pub fn with_export(mut self, ty: TypeDescriptor) -> Self {
        self.exports.push(ty);
        self
    }
}

/// Describes one boundary for one plugin module: which types resolve to the
/// host's instances and which load privately, plus compatibility flags.
///
/// Built fresh per load, optionally adjusted by the host, then consumed by
/// the loader.
#[derive(Debug, Clone)]
pub struct LoadContext {
    module_file: PathBuf,
    contract: TypeDescriptor,
    host_framework: String,
    shared_types: BTreeSet<TypeDescriptor>,
    host_modules: Vec<HostModule>,
    ignore_platform_inconsistencies: bool,
    host_services: HostServices,
}

impl LoadContext {
    /// Context whose shared types are seeded from the module declaring the
    /// contract: the contract itself and every type its signatures reach.
    pub fn for_contract(
        module_file: impl Into<PathBuf>,
        contract: &ContractInfo,
        host_framework: impl Into<String>,
    ) -> Self {
        let shared_types: BTreeSet<_> = contract.home_types().cloned().collect();
        let home = HostModule {
            name: contract.home_module.clone(),
            version: contract.home_version.clone(),
            exports: shared_types.iter().cloned().collect(),
        };

        Self {
            module_file: module_file.into(),
            contract: contract.descriptor.clone(),
            host_framework: host_framework.into(),
            shared_types,
            host_modules: vec![home],
            ignore_platform_inconsistencies: false,
            host_services: HostServices::default(),
        }
    }

    pub fn module_file(&self) -> &Path {
        &self.module_file
    }

    /// Directory probed for private dependencies.
    pub fn module_dir(&self) -> &Path {
        self.module_file.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn contract(&self) -> &TypeDescriptor {
        &self.contract
    }

    pub fn host_framework(&self) -> &str {
        &self.host_framework
    }

    pub fn shared_types(&self) -> &BTreeSet<TypeDescriptor> {
        &self.shared_types
    }

    pub fn is_shared(&self, ty: &TypeDescriptor) -> bool {
        self.shared_types.contains(ty)
    }

    pub fn host_modules(&self) -> &[HostModule] {
        &self.host_modules
    }

    pub fn host_module(&self, name: &str) -> Option<&HostModule> {
        self.host_modules.iter().find(|m| m.name == name)
    }

    pub fn ignore_platform_inconsistencies(&self) -> bool {
        self.ignore_platform_inconsistencies
    }

    pub fn host_services(&self) -> &HostServices {
        &self.host_services
    }

    pub fn add_shared_type(&mut self, ty: TypeDescriptor) -> &mut Self {
        self.shared_types.insert(ty);
        self
    }

    /// Offer a host module for sharing. Its exports become shared types.
    pub fn add_host_module(&mut self, module: HostModule) -> &mut Self {
        self.shared_types.extend(module.exports.iter().cloned());
        self.host_modules.retain(|m| m.name != module.name);
        self.host_modules.push(module);
        self
    }

    pub fn set_ignore_platform_inconsistencies(&mut self, ignore: bool) -> &mut Self {
        self.ignore_platform_inconsistencies = ignore;
        self
    }

    pub fn set_host_services(&mut self, services: HostServices) -> &mut Self {
        self.host_services = services;
        self
    }
}
