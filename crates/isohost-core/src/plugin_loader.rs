//! The plugin loader façade: find plugins, then load them as contract proxies.
//!
//! Loading one scan result walks a fixed pipeline:
//!
//! ```text
//! Idle -> ContextBuilt -> Loading -> TypeSelecting -> Activating -> Ready
//!                   \__________\____________\______________\----> Failed
//! ```
//!
//! Each stage transition checks the caller's cancellation token.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use isohost_sdk::{DeclaredType, HostServices};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activator::{ActivationOptions, DefaultPluginActivator, PluginActivator};
use crate::backend::ModuleBackend;
use crate::boundary::LoadedModule;
use crate::config::HostConfig;
use crate::context::LoadContext;
use crate::contract::{Contract, ContractInfo};
use crate::convert::{ParameterConverter, ResultConverter, StructuralConverter};
use crate::error::{Error, Result};
use crate::loader::{AssemblyLoader, IsolatedAssemblyLoader};
use crate::scanner::{
    AssemblyScanResult, AssemblyScanner, DefaultAssemblyScanner, ScanOptions,
    DEFAULT_EXCLUDED_DIRS, DEFAULT_FILE_TYPES,
};
use crate::selector::{DefaultPluginTypeSelector, PluginTypeSelector};

/// Where a load currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Scanning,
    ContextBuilt,
    Loading,
    TypeSelecting,
    Activating,
    Ready,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::ContextBuilt => "context built",
            Self::Loading => "loading",
            Self::TypeSelecting => "type selecting",
            Self::Activating => "activating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a multi-plugin load reacts to one plugin failing to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Yield the error and end the stream.
    #[default]
    FailFast,
    /// Log the error and continue with the next type.
    BestEffort,
}

/// Callback adjusting the load context before the module is loaded.
pub type ConfigureContext = Box<dyn FnOnce(&mut LoadContext) + Send>;

/// Per-call load options.
#[derive(Default)]
pub struct LoadOptions {
    /// Overrides the loader's host framework for this load.
    pub host_framework: Option<String>,
    pub configure: Option<ConfigureContext>,
    pub host_services: HostServices,
    /// Overrides the loader's stream mode for this load.
    pub stream_mode: Option<StreamMode>,
    pub cancel: Option<CancellationToken>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host_framework(mut self, framework: impl Into<String>) -> Self {
        self.host_framework = Some(framework.into());
        self
    }

    /// Run `configure` on the load context after the defaults are applied.
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut LoadContext) + Send + 'static,
    {
        self.configure = Some(Box::new(configure));
        self
    }

    pub fn with_host_services(mut self, services: HostServices) -> Self {
        self.host_services = services;
        self
    }

    pub fn with_stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = Some(mode);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("host_framework", &self.host_framework)
            .field("configure", &self.configure.is_some())
            .field("host_services", &self.host_services)
            .field("stream_mode", &self.stream_mode)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Stage tracking for one load.
struct Pipeline {
    stage: PipelineStage,
    module: PathBuf,
    cancel: Option<CancellationToken>,
}

impl Pipeline {
    fn new(module: PathBuf, cancel: Option<CancellationToken>) -> Self {
        Self {
            stage: PipelineStage::Idle,
            module,
            cancel,
        }
    }

    fn advance(&mut self, next: PipelineStage) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(self.fail(Error::Cancelled { stage: next }));
        }
        debug!(
            module = %self.module.display(),
            from = %self.stage,
            to = %next,
            "Pipeline stage"
        );
        self.stage = next;
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        if self.stage != PipelineStage::Failed {
            debug!(
                module = %self.module.display(),
                stage = %self.stage,
                error = %error,
                "Pipeline failed"
            );
            self.stage = PipelineStage::Failed;
        }
        error
    }
}

#[derive(Debug, Clone)]
struct LoaderSettings {
    file_types: Vec<String>,
    excluded_dirs: Vec<String>,
    host_framework: String,
    ignore_platform_inconsistencies: bool,
    stream_mode: StreamMode,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            file_types: DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            host_framework: isohost_sdk::HOST_FRAMEWORK.to_string(),
            ignore_platform_inconsistencies: true,
            stream_mode: StreamMode::FailFast,
        }
    }
}

/// Finds and loads plugins implementing host contracts.
///
/// Every collaborator sits behind a trait object and can be replaced with
/// the `with_*` builders. Clones share collaborators.
#[derive(Clone)]
pub struct PluginLoader {
    scanner: Arc<dyn AssemblyScanner>,
    loader: Arc<dyn AssemblyLoader>,
    selector: Arc<dyn PluginTypeSelector>,
    activator: Arc<dyn PluginActivator>,
    parameter_converter: Arc<dyn ParameterConverter>,
    result_converter: Arc<dyn ResultConverter>,
    settings: LoaderSettings,
}

impl PluginLoader {
    /// Loader with default collaborators opening modules through `backend`.
    pub fn new(backend: Arc<dyn ModuleBackend>) -> Self {
        let converter = Arc::new(StructuralConverter::default());
        Self {
            scanner: Arc::new(DefaultAssemblyScanner::default()),
            loader: Arc::new(IsolatedAssemblyLoader::new(backend)),
            selector: Arc::new(DefaultPluginTypeSelector),
            activator: Arc::new(DefaultPluginActivator),
            parameter_converter: converter.clone(),
            result_converter: converter,
            settings: LoaderSettings::default(),
        }
    }

    pub fn from_config(config: &HostConfig, backend: Arc<dyn ModuleBackend>) -> Self {
        let converter = Arc::new(StructuralConverter::with_enum_fallback(config.enum_fallback));
        let mut loader = Self::new(backend);
        loader.parameter_converter = converter.clone();
        loader.result_converter = converter;
        loader.settings = LoaderSettings {
            file_types: config.file_types.clone(),
            excluded_dirs: config.excluded_dirs.clone(),
            host_framework: config.host_framework.clone(),
            ignore_platform_inconsistencies: config.ignore_platform_inconsistencies,
            stream_mode: config.stream_mode,
        };
        loader
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn AssemblyScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn AssemblyLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn PluginTypeSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_activator(mut self, activator: Arc<dyn PluginActivator>) -> Self {
        self.activator = activator;
        self
    }

    pub fn with_parameter_converter(mut self, converter: Arc<dyn ParameterConverter>) -> Self {
        self.parameter_converter = converter;
        self
    }

    pub fn with_result_converter(mut self, converter: Arc<dyn ResultConverter>) -> Self {
        self.result_converter = converter;
        self
    }

    pub fn with_file_types<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.file_types = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.excluded_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_host_framework(mut self, framework: impl Into<String>) -> Self {
        self.settings.host_framework = framework.into();
        self
    }

    pub fn with_ignore_platform_inconsistencies(mut self, ignore: bool) -> Self {
        self.settings.ignore_platform_inconsistencies = ignore;
        self
    }

    pub fn with_stream_mode(mut self, mode: StreamMode) -> Self {
        self.settings.stream_mode = mode;
        self
    }

    // ========================================================================
    // Finding
    // ========================================================================

    /// Every module/type pair under `root` implementing `C`.
    pub async fn find_plugins<C: Contract>(&self, root: impl AsRef<Path>) -> Result<Vec<AssemblyScanResult>> {
        let root = root.as_ref();
        let contract = C::info().descriptor;
        let options = ScanOptions::new(root, contract.clone())
            .with_file_types(self.settings.file_types.iter().cloned())
            .with_excluded_dirs(self.settings.excluded_dirs.iter().cloned());

        debug!(root = %root.display(), contract = %contract, stage = %PipelineStage::Scanning, "Scanning for plugins");
        let results = self.scanner.scan(&options).await?;
        info!(
            root = %root.display(),
            contract = %contract,
            count = results.len(),
            "Plugins found"
        );
        Ok(results)
    }

    /// The first plugin of `C` whose module directory is named `name`.
    pub async fn find_plugin<C: Contract>(
        &self,
        root: impl AsRef<Path>,
        name: &str,
    ) -> Result<Option<AssemblyScanResult>> {
        Ok(self
            .find_plugins::<C>(root)
            .await?
            .into_iter()
            .find(|result| result.directory_name() == Some(name)))
    }

    /// The first plugin of `C`, optionally restricted to directory `name`.
    pub async fn find_exactly_one<C: Contract>(
        &self,
        root: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<AssemblyScanResult> {
        let root = root.as_ref();
        let found = match name {
            Some(name) => self.find_plugin::<C>(root, name).await?,
            None => self.find_plugins::<C>(root).await?.into_iter().next(),
        };
        found.ok_or_else(|| Error::PluginNotFound {
            contract: C::info().descriptor,
            location: root.to_path_buf(),
        })
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the plugin type named by `scan` and bind it to `C`.
    pub async fn load_plugin<C: Contract>(
        &self,
        scan: &AssemblyScanResult,
        options: LoadOptions,
    ) -> Result<C::Proxy> {
        let info = C::info();
        let mut pipeline = Pipeline::new(scan.module_file(), options.cancel.clone());

        match self.load_single(&info, scan, options, &mut pipeline).await {
            Ok(proxy) => Ok(C::bind(proxy)),
            Err(e) => Err(pipeline.fail(e)),
        }
    }

    async fn load_single(
        &self,
        info: &ContractInfo,
        scan: &AssemblyScanResult,
        options: LoadOptions,
        pipeline: &mut Pipeline,
    ) -> Result<crate::proxy::PluginProxy> {
        let module = self.load_module(info, scan, options, pipeline).await?;

        pipeline.advance(PipelineStage::TypeSelecting)?;
        let plugin_type = self
            .selector
            .select_plugin_types(&module, &info.descriptor)
            .into_iter()
            .find(|ty| ty.descriptor.matches(&scan.plugin_type))
            .ok_or_else(|| Error::PluginNotFound {
                contract: info.descriptor.clone(),
                location: scan.module_file(),
            })?;

        pipeline.advance(PipelineStage::Activating)?;
        let proxy = self
            .activator
            .activate(self.activation_options(plugin_type, module, info.clone()))
            .await?;

        pipeline.advance(PipelineStage::Ready)?;
        Ok(proxy)
    }

    /// Load every selectable type in the module named by `scan`.
    pub async fn load_plugins<C: Contract>(
        &self,
        scan: &AssemblyScanResult,
        options: LoadOptions,
    ) -> Result<Vec<C::Proxy>> {
        self.load_plugins_stream::<C>(scan, options).try_collect().await
    }

    /// Like [`load_plugins`](Self::load_plugins), yielding each proxy as it
    /// is activated. Types are activated one at a time in declaration order.
    pub fn load_plugins_stream<C: Contract>(
        &self,
        scan: &AssemblyScanResult,
        options: LoadOptions,
    ) -> BoxStream<'static, Result<C::Proxy>> {
        let start = StreamState::Start(Box::new(StartLoad {
            loader: self.clone(),
            scan: scan.clone(),
            options,
        }));

        stream::unfold(start, |mut state| async move {
            loop {
                state = match state {
                    StreamState::Start(start) => match (*start).begin::<C>().await {
                        Ok(active) => StreamState::Activating(active),
                        Err(e) => return Some((Err(e), StreamState::Done)),
                    },
                    StreamState::Activating(mut active) => {
                        let Some(plugin_type) = active.types.pop_front() else {
                            return match active.pipeline.advance(PipelineStage::Ready) {
                                Ok(()) => None,
                                Err(e) => Some((Err(e), StreamState::Done)),
                            };
                        };
                        if let Err(e) = active.pipeline.advance(PipelineStage::Activating) {
                            return Some((Err(e), StreamState::Done));
                        }

                        let options = active.loader.activation_options(
                            plugin_type.clone(),
                            active.module.clone(),
                            active.info.clone(),
                        );
                        match active.loader.activator.activate(options).await {
                            Ok(proxy) => {
                                return Some((Ok(C::bind(proxy)), StreamState::Activating(active)))
                            }
                            Err(e) if active.mode == StreamMode::BestEffort => {
                                warn!(
                                    plugin_type = %plugin_type.descriptor,
                                    error = %e,
                                    "Skipping plugin that failed to activate"
                                );
                                StreamState::Activating(active)
                            }
                            Err(e) => {
                                let e = active.pipeline.fail(e.into());
                                return Some((Err(e), StreamState::Done));
                            }
                        }
                    }
                    StreamState::Done => return None,
                };
            }
        })
        .boxed()
    }

    async fn load_module(
        &self,
        info: &ContractInfo,
        scan: &AssemblyScanResult,
        options: LoadOptions,
        pipeline: &mut Pipeline,
    ) -> Result<LoadedModule> {
        if !scan.contract_type.matches(&info.descriptor) {
            return Err(Error::ContractMismatch {
                expected: info.descriptor.clone(),
                found: scan.contract_type.clone(),
            });
        }

        pipeline.advance(PipelineStage::ContextBuilt)?;
        let LoadOptions {
            host_framework,
            configure,
            host_services,
            ..
        } = options;
        let framework = host_framework.unwrap_or_else(|| self.settings.host_framework.clone());
        let mut context = LoadContext::for_contract(scan.module_file(), info, framework);
        context
            .set_ignore_platform_inconsistencies(self.settings.ignore_platform_inconsistencies)
            .set_host_services(host_services);
        if let Some(configure) = configure {
            configure(&mut context);
        }

        pipeline.advance(PipelineStage::Loading)?;
        Ok(self.loader.load(context).await?)
    }

    fn activation_options(
        &self,
        plugin_type: DeclaredType,
        module: LoadedModule,
        contract: ContractInfo,
    ) -> ActivationOptions {
        ActivationOptions {
            plugin_type,
            module,
            contract,
            parameter_converter: self.parameter_converter.clone(),
            result_converter: self.result_converter.clone(),
        }
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum StreamState {
    Start(Box<StartLoad>),
    Activating(ActiveLoad),
    Done,
}

struct StartLoad {
    loader: PluginLoader,
    scan: AssemblyScanResult,
    options: LoadOptions,
}

impl StartLoad {
    async fn begin<C: Contract>(self) -> Result<ActiveLoad> {
        let StartLoad {
            loader,
            scan,
            options,
        } = self;
        let info = C::info();
        let mode = options.stream_mode.unwrap_or(loader.settings.stream_mode);
        let mut pipeline = Pipeline::new(scan.module_file(), options.cancel.clone());

        let module = match loader.load_module(&info, &scan, options, &mut pipeline).await {
            Ok(module) => module,
            Err(e) => return Err(pipeline.fail(e)),
        };
        pipeline.advance(PipelineStage::TypeSelecting)?;
        let types: VecDeque<DeclaredType> = loader
            .selector
            .select_plugin_types(&module, &info.descriptor)
            .into();
        debug!(
            module = %scan.module_file().display(),
            count = types.len(),
            "Plugin types selected"
        );

        Ok(ActiveLoad {
            loader,
            module,
            types,
            info,
            pipeline,
            mode,
        })
    }
}

struct ActiveLoad {
    loader: PluginLoader,
    module: LoadedModule,
    types: VecDeque<DeclaredType>,
    info: ContractInfo,
    pipeline: Pipeline,
    mode: StreamMode,
}
