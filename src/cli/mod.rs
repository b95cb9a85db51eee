/*
* fleetctl
* --------
*
* Command Structure:
* ---------------
* fleetctl [--config FILE]
* ├── init [--force]          // Writes config/default.toml with sane defaults
* ├── images                  // Lists the images the configured catalog starts with
* └── shell [--meter]         // Line-oriented session against an in-memory fleet
*
* Inside the shell every line is parsed with clap, so `help` and
* `vm help create` work the way you'd expect:
*
*   image add|update|remove|list
*   vm create|start|stop|pause|restart|delete|show|list
*   billing open|accrue|close|invoice|pay|show|list
*   meter assign|unassign|tick|list
*   status
*   quit
*
* The fleet lives only as long as the shell does. No persistence, no
* hypervisor: this drives the state machine and the ledger, nothing more.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::billing::ResourceShape;
use crate::config::{generate_default_config, LoggingSettings, Settings};
use crate::core::catalog::OsImage;
use crate::core::vm::{VirtualMachine, VmId, VmState};
use crate::errors::{BillingError, FleetError, VmError};
use crate::state::FleetState;

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "VM Fleet Manager CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// List OS images from the configured catalog
    Images,
    /// Start an interactive fleet session
    Shell {
        /// Bill running VMs in the background at the configured interval
        #[arg(long)]
        meter: bool,
    },
}

#[derive(Parser)]
#[command(name = "fleet", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    /// Manage the OS image catalog
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
    /// Manage virtual machines
    Vm {
        #[command(subcommand)]
        command: VmCommands,
    },
    /// Manage billing records
    Billing {
        #[command(subcommand)]
        command: BillingCommands,
    },
    /// Manage usage metering
    Meter {
        #[command(subcommand)]
        command: MeterCommands,
    },
    /// Summarize the fleet
    Status,
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

#[derive(Subcommand)]
enum ImageCommands {
    Add {
        name: String,
        version: String,
        os_type: String,
    },
    Update {
        name: String,
        version: String,
        os_type: String,
    },
    Remove { name: String },
    List,
}

#[derive(Subcommand)]
enum VmCommands {
    Create {
        #[arg(short, long)]
        image: String,
        #[arg(short, long)]
        cpus: u32,
        #[arg(short, long)]
        ram: u32,
        #[arg(short, long)]
        storage: u32,
    },
    Start { id: VmId },
    Stop { id: VmId },
    Pause { id: VmId },
    Restart { id: VmId },
    Delete { id: VmId },
    Show { id: VmId },
    List,
}

#[derive(Subcommand)]
enum BillingCommands {
    Open { user: String },
    /// Charge one unit of usage, either for a VM's shape or an explicit one
    Accrue {
        user: String,
        #[arg(long, conflicts_with_all = ["cpus", "storage"])]
        vm: Option<VmId>,
        #[arg(long, requires = "storage")]
        cpus: Option<u32>,
        #[arg(long, requires = "cpus")]
        storage: Option<u32>,
    },
    Close { user: String },
    Invoice { user: String },
    Pay { user: String, amount: f64 },
    Show { user: String },
    List,
}

#[derive(Subcommand)]
enum MeterCommands {
    Assign { vm: VmId, user: String },
    Unassign { vm: VmId },
    Tick,
    List,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `init` never reads the existing configuration.
    if let Commands::Init { force } = cli.command {
        init_tracing(&LoggingSettings::default());
        return handle_init_command(&config_dir(), force);
    }

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::new_from_file(path)?,
        None => Settings::new()?,
    };
    init_tracing(&settings.logging);

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Images => {
            println!("{}", "Available OS Images:".bold());
            for image in &settings.catalog.images {
                print_image(image);
            }
        }
        Commands::Shell { meter } => run_shell(&settings, meter).await?,
    }

    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_dir() -> PathBuf {
    PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string()))
}

/// Writes `default.toml` under `config_dir`. Never reads what is already
/// there, so a broken file can always be replaced with `--force`.
fn handle_init_command(config_dir: &Path, force: bool) -> anyhow::Result<()> {
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(config_dir)?;
    let config_str = toml::to_string_pretty(&generate_default_config())?;
    std::fs::write(&target, config_str)
        .with_context(|| format!("writing {}", target.display()))?;

    println!("{} Default configuration generated", "✓".green());
    Ok(())
}

async fn run_shell(settings: &Settings, meter: bool) -> anyhow::Result<()> {
    let state = FleetState::from_settings(settings).await?;
    let meter_handle = if meter {
        let period = Duration::from_secs(settings.metering.interval_seconds);
        Some(state.meter.clone().spawn(period)?)
    } else {
        None
    };

    info!("Fleet shell ready");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "fleet>".cyan());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = match ShellLine::try_parse_from(line.split_whitespace()) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Covers `help` too; clap renders both.
                let _ = e.print();
                continue;
            }
        };

        if matches!(parsed.command, ShellCommand::Quit) {
            break;
        }
        if let Err(e) = execute(&state, parsed.command).await {
            print_failure(&e);
        }
    }

    if let Some(handle) = meter_handle {
        handle.shutdown().await;
    }
    Ok(())
}

async fn execute(state: &FleetState, command: ShellCommand) -> Result<(), FleetError> {
    match command {
        ShellCommand::Image { command } => handle_image_command(state, command).await,
        ShellCommand::Vm { command } => handle_vm_command(state, command).await,
        ShellCommand::Billing { command } => handle_billing_command(state, command).await,
        ShellCommand::Meter { command } => handle_meter_command(state, command).await,
        ShellCommand::Status => {
            let counts = state.orchestrator.count_by_state().await;
            println!("{}", "Fleet Status:".bold());
            for vm_state in VmState::ALL {
                let count = counts.get(&vm_state).copied().unwrap_or(0);
                println!("- {}: {}", paint_state(vm_state), count);
            }
            println!("- images: {}", state.catalog.list_images().await.len());
            println!("- billing records: {}", state.ledger.list_records().await.len());
            Ok(())
        }
        ShellCommand::Quit => Ok(()),
    }
}

async fn handle_image_command(
    state: &FleetState,
    command: ImageCommands,
) -> Result<(), FleetError> {
    match command {
        ImageCommands::Add {
            name,
            version,
            os_type,
        } => {
            state.catalog.add_image(OsImage::new(&name, &version, &os_type)).await?;
            print_success(format!("Image '{}' registered", name));
        }
        ImageCommands::Update {
            name,
            version,
            os_type,
        } => {
            state.catalog.update_image(OsImage::new(&name, &version, &os_type)).await?;
            print_success(format!("Image '{}' updated", name));
        }
        ImageCommands::Remove { name } => {
            state.catalog.remove_image(&name).await?;
            print_success(format!("Image '{}' removed", name));
        }
        ImageCommands::List => {
            println!("{}", "Available OS Images:".bold());
            for image in state.catalog.list_images().await {
                print_image(&image);
            }
        }
    }
    Ok(())
}

async fn handle_vm_command(state: &FleetState, command: VmCommands) -> Result<(), FleetError> {
    let orchestrator = &state.orchestrator;
    match command {
        VmCommands::Create {
            image,
            cpus,
            ram,
            storage,
        } => {
            let vm = orchestrator.create_vm(&image, cpus, ram, storage).await?;
            print_success(format!("VM {} created from '{}'", vm.id, vm.os_image));
        }
        VmCommands::Start { id } => print_vm(&orchestrator.start_vm(id).await?),
        VmCommands::Stop { id } => print_vm(&orchestrator.stop_vm(id).await?),
        VmCommands::Pause { id } => print_vm(&orchestrator.pause_vm(id).await?),
        VmCommands::Restart { id } => print_vm(&orchestrator.restart_vm(id).await?),
        VmCommands::Delete { id } => {
            orchestrator.delete_vm(id).await?;
            state.meter.unassign(id).await;
            print_success(format!("VM {} deleted", id));
        }
        VmCommands::Show { id } => {
            let vm = orchestrator.get_vm(id).await.ok_or(VmError::NotFound { vm_id: id })?;
            print_json(&vm);
        }
        VmCommands::List => {
            println!("{}", "Virtual Machines:".bold());
            for vm in orchestrator.list_vms().await {
                print_vm(&vm);
            }
        }
    }
    Ok(())
}

async fn handle_billing_command(
    state: &FleetState,
    command: BillingCommands,
) -> Result<(), FleetError> {
    let ledger = &state.ledger;
    match command {
        BillingCommands::Open { user } => {
            ledger.open(&user).await?;
            print_success(format!("Billing record opened for {}", user));
        }
        BillingCommands::Accrue {
            user,
            vm,
            cpus,
            storage,
        } => {
            let shape = match (vm, cpus, storage) {
                (Some(id), _, _) => {
                    let vm = state
                        .orchestrator
                        .get_vm(id)
                        .await
                        .ok_or(VmError::NotFound { vm_id: id })?;
                    Some(ResourceShape::from(&vm))
                }
                (None, Some(cpu_cores), Some(storage_gb)) => Some(ResourceShape {
                    cpu_cores,
                    storage_gb,
                }),
                _ => None,
            };
            let cost = ledger.accrue(&user, shape).await?;
            print_success(format!("Accrued {:.2} for {}", cost, user));
        }
        BillingCommands::Close { user } => {
            let record = ledger.close_period(&user).await?;
            print_success(format!(
                "Period closed for {}, balance {:.2}",
                user, record.total_charges
            ));
        }
        BillingCommands::Invoice { user } => print_json(&ledger.issue_invoice(&user).await?),
        BillingCommands::Pay { user, amount } => {
            let record = ledger.apply_payment(&user, amount).await?;
            print_success(format!("Payment applied, balance {:.2}", record.total_charges));
        }
        BillingCommands::Show { user } => {
            let record = ledger
                .get_record(&user)
                .await
                .ok_or(BillingError::NotFound { user_id: user })?;
            print_json(&record);
        }
        BillingCommands::List => {
            println!("{}", "Billing Records:".bold());
            for record in ledger.list_records().await {
                println!(
                    "- {}: current {:.2}, balance {:.2} ({:?})",
                    record.user_id, record.current_charges, record.total_charges, record.status
                );
            }
        }
    }
    Ok(())
}

async fn handle_meter_command(
    state: &FleetState,
    command: MeterCommands,
) -> Result<(), FleetError> {
    match command {
        MeterCommands::Assign { vm, user } => {
            state.meter.assign(vm, &user).await?;
            print_success(format!("VM {} billed to {}", vm, user));
        }
        MeterCommands::Unassign { vm } => match state.meter.unassign(vm).await {
            Some(user) => print_success(format!("VM {} no longer billed to {}", vm, user)),
            None => println!("{} VM {} was not assigned", "-".yellow(), vm),
        },
        MeterCommands::Tick => print_json(&state.meter.tick().await),
        MeterCommands::List => {
            for (vm, user) in state.meter.assignments().await {
                println!("- {} -> {}", vm, user);
            }
        }
    }
    Ok(())
}

fn paint_state(state: VmState) -> ColoredString {
    let label = state.to_string();
    match state {
        VmState::Running => label.green(),
        VmState::Stopped => label.red(),
        VmState::Paused => label.yellow(),
        VmState::Error => label.bright_red().bold(),
        VmState::Initialized => label.dimmed(),
    }
}

fn print_vm(vm: &VirtualMachine) {
    println!(
        "- {} [{}] {} ({} vCPU, {} GB RAM, {} GB disk)",
        vm.id,
        paint_state(vm.state),
        vm.os_image,
        vm.cpu_cores,
        vm.ram_gb,
        vm.storage_gb
    );
}

fn print_image(image: &OsImage) {
    println!("- {} {} ({})", image.name, image.version, image.os_type);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "Failed to render output"),
    }
}

fn print_success(message: String) {
    println!("{} {}", "✓".green(), message);
}

fn print_failure(e: &FleetError) {
    println!("{} [{}] {}", "✗".red(), e.kind().to_string().red(), e);
}
