//! Command-line interface for isohost plugin directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use isohost_core::sdk::semver::Version;
use isohost_core::sdk::{ModuleManifest, TypeDescriptor};
use isohost_core::{
    init_tracing, AssemblyLoader, AssemblyScanner, ContractInfo, DefaultAssemblyScanner,
    DefaultPluginTypeSelector, HostConfig, IsolatedAssemblyLoader, LoadContext, LogFormat,
    NativeBackend, PluginTypeSelector,
};

/// isohost - discover and probe isolated plugin modules.
#[derive(Parser, Debug)]
#[command(name = "isohost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Host configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List plugin types implementing a contract, reading metadata only.
    Scan {
        /// Contract type, e.g. `Widgets.Contract.IWidget`.
        #[arg(long, required = true)]
        contract: String,
        /// Plugin root. Defaults to `plugin_root` from the config.
        #[arg(long)]
        root: Option<PathBuf>,
        /// File name pattern; repeat for several. Overrides the config.
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show a module's metadata.
    Inspect {
        /// Path to the module file.
        #[arg(required = true)]
        module: PathBuf,
        /// Print the manifest as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load a native module into a boundary and report what it links and offers.
    Probe {
        /// Path to the module file.
        #[arg(required = true)]
        module: PathBuf,
        /// Contract type, e.g. `Widgets.Contract.IWidget`.
        #[arg(long, required = true)]
        contract: String,
        /// Host module declaring the contract.
        #[arg(long, default_value = "contract")]
        contract_module: String,
        /// Version of the host module declaring the contract.
        #[arg(long, default_value = "1.0.0")]
        contract_version: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(LogFormat::from_env(), args.verbose);

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Scan {
            contract,
            root,
            patterns,
            json,
        } => run_scan(&config, &contract, root, patterns, json).await,
        Command::Inspect { module, json } => show_module_info(&module, json),
        Command::Probe {
            module,
            contract,
            contract_module,
            contract_version,
        } => run_probe(&config, &module, &contract, &contract_module, &contract_version).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    let config = match path {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::from_env()?,
    };
    Ok(config)
}

fn parse_contract(text: &str) -> Result<TypeDescriptor> {
    TypeDescriptor::parse(text).with_context(|| format!("Invalid contract type: {text}"))
}

async fn run_scan(
    config: &HostConfig,
    contract: &str,
    root: Option<PathBuf>,
    patterns: Vec<String>,
    json: bool,
) -> Result<()> {
    let contract = parse_contract(contract)?;
    let Some(root) = root.or_else(|| config.plugin_root.clone()) else {
        bail!("No plugin root given; pass --root or set plugin_root");
    };

    let mut options = config.scan_options(&root, contract.clone());
    if !patterns.is_empty() {
        options = options.with_file_types(patterns);
    }

    let results = DefaultAssemblyScanner::default().scan(&options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("Plugins implementing {contract}");
    println!("==================\n");
    if results.is_empty() {
        println!("  No plugins found in {}", root.display());
        return Ok(());
    }
    for result in &results {
        println!("  {}", result.plugin_type);
        println!("        Module: {}", result.module_file().display());
        println!();
    }
    println!("Total: {} plugin(s)", results.len());
    Ok(())
}

fn show_module_info(module: &Path, json: bool) -> Result<()> {
    let manifest = ModuleManifest::read_sidecar(module)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("Module Information");
    println!("==================\n");
    println!("Name:            {}", manifest.name);
    println!("Version:         {}", manifest.version);
    println!("Framework:       {}", manifest.target_framework);

    if !manifest.types.is_empty() {
        println!("\nTypes:");
        for ty in &manifest.types {
            let mut flags = Vec::new();
            if ty.is_abstract {
                flags.push("abstract");
            }
            if !ty.constructible {
                flags.push("not constructible");
            }
            match &ty.plugin {
                Some(marker) => println!("  {} -> {} {}", ty.descriptor, marker.contract, flags.join(", ")),
                None => println!("  {} {}", ty.descriptor, flags.join(", ")),
            }
        }
    }

    if !manifest.dependencies.is_empty() {
        println!("\nDependencies:");
        for dep in &manifest.dependencies {
            println!("  {} {}", dep.name, dep.version);
        }
    }
    Ok(())
}

async fn run_probe(
    config: &HostConfig,
    module: &Path,
    contract: &str,
    contract_module: &str,
    contract_version: &str,
) -> Result<()> {
    let contract = parse_contract(contract)?;
    let version: Version = contract_version
        .parse()
        .with_context(|| format!("Invalid contract version: {contract_version}"))?;
    let module = std::path::absolute(module)?;

    let info = ContractInfo::new(contract.clone(), contract_module, version);
    let mut cx = LoadContext::for_contract(&module, &info, config.host_framework.clone());
    cx.set_ignore_platform_inconsistencies(config.ignore_platform_inconsistencies);

    let loader = IsolatedAssemblyLoader::new(Arc::new(NativeBackend::new()));
    let loaded = loader.load(cx).await?;
    let selected = DefaultPluginTypeSelector.select_plugin_types(&loaded, &contract);

    println!("Probe: PASSED");
    println!();
    println!("Boundary:        {}", loaded.id());
    println!("Module:          {} {}", loaded.manifest().name, loaded.manifest().version);

    println!("\nLinked dependencies:");
    if loaded.dependencies().is_empty() {
        println!("  (none)");
    }
    for dep in loaded.dependencies() {
        let origin = match &dep.origin {
            isohost_core::sdk::DependencyOrigin::Host => "host".to_string(),
            isohost_core::sdk::DependencyOrigin::Private(path) => path.display().to_string(),
        };
        println!("  {} {} ({origin})", dep.name, dep.version);
    }

    println!("\nActivatable types for {contract}:");
    if selected.is_empty() {
        println!("  (none)");
    }
    for ty in &selected {
        println!("  {}", ty.descriptor);
    }

    tracing::debug!(boundary = %loaded.id(), "Probe finished, unloading");
    Ok(())
}
