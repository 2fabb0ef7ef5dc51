//! `clap` surface binding subcommands to the core operations (SPEC_FULL.md
//! section 2.4). Subcommands parallel spec.md section 6's per-instance
//! management file commands plus the blueprint/instance/backup lifecycle
//! of spec.md section 4. This file owns no orchestration logic beyond
//! wiring flags to the typed operations in the other modules — the
//! management file generated by `instance::generate` is the other,
//! script-facing entry point into the same operations.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::blueprint::BlueprintResolver;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventFabric;
use crate::instance::InstanceRegistry;
use crate::overrides::OverrideLoader;
use crate::paths::Paths;

#[derive(Parser)]
#[command(name = "kgsm", version, about = "Krystal Game Server Manager")]
pub struct Cli {
    /// Overrides the default config file location.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Shorthand for `KGSM_LOG=debug` when the env var is unset.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new instance from a blueprint.
    Create {
        blueprint: String,
        #[arg(long = "install-dir")]
        install_dir: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
    },
    /// List instances, optionally filtered by blueprint.
    List {
        #[arg(long)]
        blueprint: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one instance's record.
    Get {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Remove an instance's config record and working directory.
    Uninstall {
        name: String,
        #[arg(long)]
        dry_run: bool,
    },
    Start {
        name: String,
        #[arg(long)]
        background: bool,
    },
    Stop {
        name: String,
    },
    Restart {
        name: String,
    },
    Kill {
        name: String,
    },
    #[command(name = "is-active")]
    IsActive {
        name: String,
    },
    Status {
        name: String,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        fast: bool,
    },
    Logs {
        name: String,
        #[arg(long)]
        tail: Option<u32>,
        #[arg(long, short = 'f')]
        follow: bool,
    },
    Save {
        name: String,
    },
    Input {
        name: String,
        cmd: String,
    },
    Version {
        name: String,
        #[arg(long)]
        installed: bool,
        #[arg(long)]
        latest: bool,
        #[arg(long)]
        compare: bool,
    },
    Update {
        name: String,
    },
    #[command(subcommand)]
    Backup(BackupCommand),
    #[command(subcommand)]
    Blueprint(BlueprintCommand),
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum BackupCommand {
    Create {
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        compress: bool,
    },
    List {
        name: String,
    },
    Restore {
        name: String,
        backup_id: String,
    },
}

#[derive(Subcommand)]
pub enum BlueprintCommand {
    List,
    Show { name: String },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    Show,
    Validate,
}

struct Ctx {
    config: Config,
    events: EventFabric,
    registry: InstanceRegistry,
    resolver: BlueprintResolver,
    overrides: OverrideLoader,
}

impl Ctx {
    fn new(config: Config) -> Self {
        let paths = Paths::new(&config);
        let events = EventFabric::new(config.clone());
        let registry = InstanceRegistry::new(paths.clone(), config.clone());
        let resolver = BlueprintResolver::new(paths.clone());
        let overrides = OverrideLoader::new(paths);
        Self {
            config,
            events,
            registry,
            resolver,
            overrides,
        }
    }

    fn blueprint_for(&self, instance: &crate::instance::Instance) -> Result<crate::blueprint::Blueprint> {
        self.resolver.resolve(&instance.blueprint_file.to_string_lossy())
    }
}

/// Parses `KGSM_LOG`/`--verbose` into a level, loads and validates
/// config, then dispatches the parsed subcommand. The process entry
/// point (`main.rs`) translates any returned [`Error`] into the stable
/// exit code subset (spec section 7).
pub async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose && std::env::var("KGSM_LOG").is_err() {
        unsafe {
            std::env::set_var("KGSM_LOG", "debug");
        }
    }

    let config = Config::load(cli.config.as_deref())?;
    config.ensure_directories()?;

    let log_dir = config.general.root.join("logs");
    let _logging_guard = crate::logging::init(config.general.enable_logging.then_some(log_dir.as_path()));

    let ctx = Ctx::new(config);

    match cli.command {
        Command::Create { blueprint, install_dir, name } => cmd_create(&ctx, &blueprint, install_dir, name).await,
        Command::List { blueprint, json } => cmd_list(&ctx, blueprint.as_deref(), json),
        Command::Get { name, json } => cmd_get(&ctx, &name, json),
        Command::Uninstall { name, dry_run } => cmd_uninstall(&ctx, &name, dry_run),
        Command::Start { name, background } => cmd_start(&ctx, &name, background).await,
        Command::Stop { name } => cmd_stop(&ctx, &name),
        Command::Restart { name } => cmd_restart(&ctx, &name).await,
        Command::Kill { name } => cmd_kill(&ctx, &name),
        Command::IsActive { name } => cmd_is_active(&ctx, &name),
        Command::Status { name, json, fast } => cmd_status(&ctx, &name, json, fast),
        Command::Logs { name, tail, follow } => cmd_logs(&ctx, &name, tail, follow),
        Command::Save { name } => cmd_save(&ctx, &name),
        Command::Input { name, cmd } => cmd_input(&ctx, &name, &cmd),
        Command::Version { name, installed, latest, compare } => cmd_version(&ctx, &name, installed, latest, compare),
        Command::Update { name } => cmd_update(&ctx, &name).await,
        Command::Backup(action) => cmd_backup(&ctx, action),
        Command::Blueprint(action) => cmd_blueprint(&ctx, action),
        Command::Config(action) => cmd_config(&ctx, action),
    }
}

/// `create`: resolve -> registry.create -> layout -> generate -> download
/// -> deploy -> version.save, emitting the event sequence of spec.md
/// section 8 scenario 1 in order.
async fn cmd_create(ctx: &Ctx, blueprint_name: &str, install_dir: Option<PathBuf>, name: Option<String>) -> Result<()> {
    let blueprint = ctx.resolver.resolve(blueprint_name)?;
    let install_root = install_dir.unwrap_or_else(|| ctx.config.general.default_install_directory.clone());
    std::fs::create_dir_all(&install_root)?;

    let mut instance = ctx.registry.create(&blueprint, &install_root, name.as_deref())?;
    ctx.events
        .emit(crate::events::EventType::InstanceInstallationStarted, &instance.name, Default::default());

    crate::instance::layout::create(&instance, &ctx.events)?;
    crate::instance::generate::generate_all(&mut instance, &blueprint, &ctx.config, &ctx.events)?;

    let provider = ctx.overrides.load(blueprint.name())?;
    let latest = crate::version::latest(&blueprint, provider.as_ref())?;
    crate::deploy::download(&instance, &blueprint, provider.as_ref(), &latest, &ctx.events)?;
    crate::deploy::deploy(&instance, provider.as_ref(), &ctx.events)?;
    crate::version::save(&mut instance, &latest);
    ctx.events
        .emit(crate::events::EventType::InstanceVersionUpdated, &instance.name, Default::default());
    ctx.registry.save(&instance)?;

    ctx.events
        .emit(crate::events::EventType::InstanceInstallationFinished, &instance.name, Default::default());
    ctx.events.emit(crate::events::EventType::InstanceInstalled, &instance.name, Default::default());

    println!("created instance '{}' from blueprint '{}' at version {}", instance.name, blueprint.name(), latest);
    Ok(())
}

fn cmd_list(ctx: &Ctx, blueprint_filter: Option<&str>, json: bool) -> Result<()> {
    let instances = ctx.registry.list(blueprint_filter)?;
    if json {
        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else {
        for instance in &instances {
            println!("{}\t{:?}\t{}", instance.name, instance.runtime, instance.installed_version);
        }
    }
    Ok(())
}

fn cmd_get(ctx: &Ctx, name: &str, json: bool) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    let doc = instance.to_ini();
    if json {
        println!("{}", serde_json::to_string_pretty(&doc.to_map())?);
    } else {
        println!("{}", doc.render());
    }
    Ok(())
}

fn cmd_uninstall(ctx: &Ctx, name: &str, dry_run: bool) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    if dry_run {
        println!("would remove instance '{}' and {}", instance.name, instance.working_dir.display());
        return Ok(());
    }
    crate::lifecycle::uninstall(instance, &ctx.registry, &ctx.events)?;
    println!("uninstalled '{name}'");
    Ok(())
}

async fn cmd_start(ctx: &Ctx, name: &str, background: bool) -> Result<()> {
    let mut instance = ctx.registry.get(name)?;
    let blueprint = ctx.blueprint_for(&instance)?;
    crate::lifecycle::start(&mut instance, &blueprint, &ctx.config.instances, &ctx.events).await?;
    ctx.registry.save(&instance)?;
    if background {
        println!("started '{name}' in the background");
    } else {
        println!("started '{name}'");
    }
    Ok(())
}

fn cmd_stop(ctx: &Ctx, name: &str) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    crate::lifecycle::stop(&instance, &ctx.config.instances, &ctx.events)?;
    println!("stopped '{name}'");
    Ok(())
}

async fn cmd_restart(ctx: &Ctx, name: &str) -> Result<()> {
    let mut instance = ctx.registry.get(name)?;
    let blueprint = ctx.blueprint_for(&instance)?;
    crate::lifecycle::restart(&mut instance, &blueprint, &ctx.config.instances, &ctx.events).await?;
    ctx.registry.save(&instance)?;
    println!("restarted '{name}'");
    Ok(())
}

fn cmd_kill(ctx: &Ctx, name: &str) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    crate::lifecycle::kill(&instance, &ctx.events)?;
    println!("killed '{name}'");
    Ok(())
}

/// Mirrors the shell tool's `--is-active` exit-code contract: 0 when
/// live, non-zero otherwise, rather than treating "not running" as an
/// [`Error`].
fn cmd_is_active(ctx: &Ctx, name: &str) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    let active = crate::lifecycle::is_active(&instance)?;
    if active {
        println!("active");
        Ok(())
    } else {
        println!("inactive");
        std::process::exit(1);
    }
}

fn cmd_status(ctx: &Ctx, name: &str, json: bool, fast: bool) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    let blueprint = ctx.blueprint_for(&instance)?;
    let provider = ctx.overrides.load(blueprint.name())?;
    let status = crate::lifecycle::status(&instance, &blueprint, provider.as_ref(), fast)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!(
            "active={} pid={:?} uptime_s={:?} cpu%={:?} mem_bytes={:?} installed={} latest={:?} ports={} manager={}",
            status.active,
            status.pid,
            status.uptime_seconds,
            status.cpu_percent,
            status.memory_bytes,
            status.version_installed,
            status.version_latest,
            status.ports,
            status.lifecycle_manager,
        );
    }
    Ok(())
}

fn cmd_logs(ctx: &Ctx, name: &str, tail: Option<u32>, follow: bool) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    let lines = crate::lifecycle::logs(&instance, tail, follow)?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn cmd_save(ctx: &Ctx, name: &str) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    crate::lifecycle::save(&instance, &ctx.config.instances)?;
    println!("saved '{name}'");
    Ok(())
}

fn cmd_input(ctx: &Ctx, name: &str, cmd: &str) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    crate::lifecycle::input(&instance, cmd)
}

fn cmd_version(ctx: &Ctx, name: &str, installed: bool, latest: bool, compare: bool) -> Result<()> {
    let instance = ctx.registry.get(name)?;
    let blueprint = ctx.blueprint_for(&instance)?;
    let provider = ctx.overrides.load(blueprint.name())?;

    if installed || (!latest && !compare) {
        println!("{}", crate::version::installed(&instance));
    }
    if latest {
        println!("{}", crate::version::latest(&blueprint, provider.as_ref())?);
    }
    if compare {
        match crate::version::compare(&instance, &blueprint, provider.as_ref())? {
            crate::version::Comparison::UpToDate => println!("up_to_date"),
            crate::version::Comparison::UpdateAvailable(v) => println!("update_available({v})"),
            crate::version::Comparison::NoSource => println!("no_source"),
        }
    }
    Ok(())
}

async fn cmd_update(ctx: &Ctx, name: &str) -> Result<()> {
    let mut instance = ctx.registry.get(name)?;
    let blueprint = ctx.blueprint_for(&instance)?;
    let provider = ctx.overrides.load(blueprint.name())?;

    let outcome = crate::update::update(&mut instance, &blueprint, provider.as_ref(), &ctx.config.instances, &ctx.registry, &ctx.events).await?;
    match outcome {
        crate::update::UpdateOutcome::UpToDate => println!("'{name}' already up to date"),
        crate::update::UpdateOutcome::NoVersionSource => println!("'{name}' has no version source"),
        crate::update::UpdateOutcome::Updated { from, to } => println!("updated '{name}': {from} -> {to}"),
    }
    Ok(())
}

fn cmd_backup(ctx: &Ctx, action: BackupCommand) -> Result<()> {
    match action {
        BackupCommand::Create { name, version, compress } => {
            let instance = ctx.registry.get(&name)?;
            let backup = crate::backup::create(&instance, version.as_deref(), compress, &ctx.events)?;
            println!("created backup '{}'", backup.backup_id);
            Ok(())
        }
        BackupCommand::List { name } => {
            let instance = ctx.registry.get(&name)?;
            for backup in crate::backup::list(&instance)? {
                println!("{}\t{:?}\t{}", backup.backup_id, backup.version, backup.compressed);
            }
            Ok(())
        }
        BackupCommand::Restore { name, backup_id } => {
            let mut instance = ctx.registry.get(&name)?;
            let running = crate::lifecycle::is_active(&instance)?;
            crate::backup::restore(&mut instance, &backup_id, running, &ctx.events)?;
            ctx.registry.save(&instance)?;
            println!("restored '{name}' from backup '{backup_id}'");
            Ok(())
        }
    }
}

fn cmd_blueprint(ctx: &Ctx, action: BlueprintCommand) -> Result<()> {
    match action {
        BlueprintCommand::List => {
            for (tier, name) in ctx.resolver.list_all()? {
                println!("{name}\t{}", tier_str(&tier));
            }
            Ok(())
        }
        BlueprintCommand::Show { name } => {
            let (tier, blueprint) = ctx.resolver.resolve_with_tier(&name)?;
            println!("name={}", blueprint.name());
            println!("tier={}", tier_str(&tier));
            println!("ports={}", blueprint.ports());
            println!("is_container={}", blueprint.is_container());
            Ok(())
        }
    }
}

fn tier_str(tier: &crate::blueprint::BlueprintTier) -> &'static str {
    match tier {
        crate::blueprint::BlueprintTier::CustomNative => "custom-native",
        crate::blueprint::BlueprintTier::CustomContainer => "custom-container",
        crate::blueprint::BlueprintTier::DefaultNative => "default-native",
        crate::blueprint::BlueprintTier::DefaultContainer => "default-container",
    }
}

fn cmd_config(ctx: &Ctx, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            println!("{}", toml::to_string_pretty(&ctx.config)?);
            Ok(())
        }
        ConfigCommand::Validate => {
            ctx.config.validate()?;
            println!("config is valid");
            Ok(())
        }
    }
}
