mod registered_modules;

use anyhow::Result;
use clap::{Parser, Subcommand};
use figment::Figment;
use mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcus_kit::bootstrap::{init_logging, spawn_signal_listener};
use arcus_kit::loader::Loader;
use arcus_kit::{
    AppConfig, BuildContext, Category, DatabaseInstance, EXIT_FATAL, Memory, ModuleEntry,
    ModuleRegistry, ServiceManager, UnitConfig,
};
use arcus_operator::{Manifest, Operator, OperatorSettings};
use arcus_spawner::DockerCliRuntime;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Arcus service - runs one unit of an Arcus platform
#[derive(Parser)]
#[command(name = "arcus-service")]
#[command(about = "Arcus service - runs one unit of an Arcus platform")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the unit and serve until a shutdown signal
    Run,
    /// Validate the unit configuration and exit
    Check,
    /// Roll the platform manifest out against the local docker daemon and exit
    Deploy {
        /// Platform manifest; defaults to the operator's `manifest-path`
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (ARCUS__*) -> 4) legacy flat env
    let figment = AppConfig::figment(cli.config.as_deref());
    let mut config = AppConfig::from_figment(&figment)?;
    config.apply_verbosity(cli.verbose);

    let _log_guard = init_logging(&config.logging)?;

    if cli.print_config {
        println!("Effective configuration:\n{}", config.to_yaml()?);
        return Ok(());
    }

    tracing::info!(unit = %config.unit, "Arcus service starting");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_unit(config).await,
        Commands::Check => check_unit(config).await,
        Commands::Deploy { manifest } => deploy(config, &figment, manifest.as_deref()).await,
    }
}

async fn run_unit(config: AppConfig) -> Result<()> {
    let manager = ServiceManager::new(config, ModuleRegistry::discover());
    let signals = spawn_signal_listener(manager.shutdown_token());

    if let Err(e) = manager.enter() {
        manager.critical(&e);
    }
    if let Err(e) = manager.load().await {
        manager.critical(&e);
    }
    manager.run().await;
    signals.abort();
    manager.exit()
}

/// Resolve and construct every declared module without connecting anything.
fn unresolved_modules(registry: &ModuleRegistry, app: &AppConfig, unit: &UnitConfig) -> Vec<String> {
    let loader = Loader::new(registry, BuildContext { unit: &app.unit, app });
    let sections = [
        (Category::Service, &unit.services),
        (Category::Database, &unit.databases),
        (Category::Connector, &unit.connectors),
        (Category::LanguageEngine, &unit.nlp),
    ];
    let mut failed = Vec::new();
    for (category, entries) in sections {
        for entry in entries {
            if let Err(e) = loader.load_one(entry, category) {
                println!("  {category} '{}': {e}", entry.name);
                failed.push(format!("{category}:{}", entry.name));
            }
        }
    }
    failed
}

async fn check_unit(config: AppConfig) -> Result<()> {
    tracing::info!("Checking unit configuration...");
    let registry = ModuleRegistry::discover();
    let manager = ServiceManager::new(config.clone(), registry.clone());
    let unit = manager.read_unit_config().await?;
    if unit.services.is_empty() {
        anyhow::bail!("unit '{}' declares no services", config.unit);
    }

    let failed = unresolved_modules(&registry, &config, &unit);
    if !failed.is_empty() {
        anyhow::bail!("unit '{}' has modules that cannot be built: {}", config.unit, failed.join(", "));
    }
    println!("Configuration is valid");
    println!("{}", unit.to_yaml()?);
    Ok(())
}

/// Memory over the operator's shared database, or an empty one when it cannot connect.
async fn shared_memory(entry: &ModuleEntry, app: &AppConfig) -> Memory {
    let memory = Memory::new();
    let registry = ModuleRegistry::discover();
    let loader = Loader::new(&registry, BuildContext { unit: &app.unit, app });
    let backend = match loader.load_one(entry, Category::Database) {
        Ok(module) => module.instance.into_database(),
        Err(e) => {
            tracing::warn!(database = %entry.name, error = %e, "Shared database unavailable, skill imports will fail");
            None
        }
    };
    if let Some(backend) = backend {
        let instance = DatabaseInstance::new(entry.name.as_str(), backend);
        match instance.connect().await {
            Ok(()) => memory.add(instance),
            Err(e) => tracing::warn!(database = %entry.name, error = %e, "Unable to connect to shared database"),
        }
    }
    memory
}

async fn deploy(config: AppConfig, figment: &Figment, manifest: Option<&Path>) -> Result<()> {
    let settings = OperatorSettings::from_figment(figment)?;
    let path = manifest.map_or_else(|| settings.manifest_path(&config.config_dir), Path::to_path_buf);
    let manifest = Manifest::load(&path).await?;

    let memory = Arc::new(shared_memory(&settings.database, &config).await);
    let operator = Operator::connect(
        Arc::new(DockerCliRuntime::default()),
        Arc::clone(&memory),
        settings,
        Arc::new(config),
    )
    .await?;

    let report = operator.deploy_platform(&manifest).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    let released = memory.disconnect_all().await;
    tracing::debug!(databases = ?released, "Released shared database");

    if !report.is_success() {
        std::process::exit(EXIT_FATAL);
    }
    Ok(())
}
