use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use debloater::adb::{AdbClient, Device, DeviceManager};
use debloater::connection::{AdbBroker, ConnectionManager, DispatchError, Notice};
use debloater::core::Config;
use debloater::executor::{MutationIntent, Operation};
use debloater::inventory::{filter, AdbPackageProvider, AppInventory, AppRecord, FilterCriteria};
use debloater::safety::{SafetyClassifier, SafetyTier};
use debloater::ui::{ConsoleUi, Menu, MenuChoice};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "debloater",
    version,
    about = "List, disable, uninstall and restore Android packages over adb"
)]
struct Cli {
    /// Config file (default: <config dir>/debloater/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Device serial, when more than one is attached
    #[arg(short, long, global = true)]
    serial: Option<String>,
    /// Android user to act on
    #[arg(long, global = true)]
    user_id: Option<u32>,
    /// Path to the adb binary
    #[arg(long, global = true)]
    adb: Option<PathBuf>,
    /// URL of a JSON object mapping package ids to safe/caution/risky
    #[arg(long, global = true)]
    safety_url: Option<String>,
    /// Local JSON file in the same format as --safety-url
    #[arg(long, global = true, conflicts_with = "safety_url")]
    safety_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show attached devices
    Devices,
    /// List packages
    List(ListArgs),
    /// Disable a package for the user
    Disable(MutateArgs),
    /// Re-enable a disabled package
    Enable(MutateArgs),
    /// Uninstall a package for the user (restorable)
    Uninstall(MutateArgs),
    /// Reinstall a package removed for the user
    Restore(MutateArgs),
    /// Menu-driven session (default)
    Interactive,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    search: Option<String>,
    /// System apps only
    #[arg(long, conflicts_with = "user")]
    system: bool,
    /// User-installed apps only
    #[arg(long)]
    user: bool,
    #[arg(long)]
    disabled: bool,
    #[arg(long)]
    uninstalled: bool,
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MutateArgs {
    package: String,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
    /// Allow disabling or uninstalling packages rated risky
    #[arg(long)]
    force: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(path) = &self.adb {
            config.adb_path = Some(path.clone());
        }
        if let Some(serial) = &self.serial {
            config.serial = Some(serial.clone());
        }
        if let Some(user) = self.user_id {
            config.user_id = user;
        }
        if let Some(url) = &self.safety_url {
            config.safety_list_url = Some(url.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debloater=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    let client = AdbClient::new(config.adb_path.as_deref(), config.command_timeout())
        .context("adb not found; install Android platform-tools or set adb_path")?;
    client.ensure_present().await.context("adb version check failed")?;
    client.start_server().await?;
    let devices = DeviceManager::new(client.clone());

    let command = cli.command.unwrap_or(Command::Interactive);
    if let Command::Devices = command {
        let list = devices.list_devices().await?;
        ConsoleUi::render_device_table(&list);
        return Ok(());
    }

    let interactive = matches!(command, Command::Interactive);
    if interactive {
        ConsoleUi::write_banner();
    }
    let device = select_device(&devices, config.serial.as_deref(), interactive).await?;

    let classifier = Arc::new(SafetyClassifier::new(config.fetch_timeout()));
    if let Some(path) = &cli.safety_file {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if let Err(e) = classifier.update_from_json(&body) {
            ConsoleUi::warn(&format!("Ignoring {}: {}", path.display(), e));
        }
    } else if let Some(url) = &config.safety_list_url {
        if classifier.update_from_remote(url).await.is_err() {
            ConsoleUi::warn("Safety list download failed; using built-in ratings");
        }
    }

    let session = Session::start(client, device, classifier, config).await?;
    let result = match command {
        Command::List(args) => session.list(args),
        Command::Disable(args) => session.mutate(Operation::Disable, args).await,
        Command::Enable(args) => session.mutate(Operation::Enable, args).await,
        Command::Uninstall(args) => session.mutate(Operation::Uninstall, args).await,
        Command::Restore(args) => session.mutate(Operation::Restore, args).await,
        Command::Interactive => session.interactive().await,
        Command::Devices => Ok(()),
    };
    session.close().await;
    result
}

async fn select_device(
    devices: &DeviceManager,
    wanted: Option<&str>,
    interactive: bool,
) -> anyhow::Result<Device> {
    loop {
        let list = devices.list_devices().await?;
        if let Some(serial) = wanted {
            return list
                .into_iter()
                .find(|d| d.serial == serial)
                .ok_or_else(|| anyhow!("device {} not attached", serial));
        }
        match list.len() {
            0 if interactive => {
                ConsoleUi::warn(
                    "No device found. Connect one with USB debugging on, press Enter to retry or q to quit.",
                );
                if ConsoleUi::read_line().eq_ignore_ascii_case("q") {
                    bail!("no device selected");
                }
            }
            0 => bail!("no device attached"),
            1 => return list.into_iter().next().ok_or_else(|| anyhow!("no device attached")),
            n if interactive => {
                ConsoleUi::render_device_table(&list);
                let input = ConsoleUi::prompt(&format!("Select a device (1..{}, q to quit):", n));
                if input.eq_ignore_ascii_case("q") {
                    bail!("no device selected");
                }
                match Menu::parse_index(&input) {
                    Some(i) if i <= n => return Ok(list[i - 1].clone()),
                    _ => ConsoleUi::warn("Invalid choice, try again"),
                }
            }
            _ => bail!("several devices attached; pass --serial"),
        }
    }
}

struct Session {
    config: Config,
    device_name: String,
    inventory: AppInventory,
    connection: ConnectionManager,
    notices: JoinHandle<()>,
}

impl Session {
    async fn start(
        client: AdbClient,
        device: Device,
        classifier: Arc<SafetyClassifier>,
        config: Config,
    ) -> anyhow::Result<Self> {
        let broker = Arc::new(AdbBroker::new(client.clone(), device.serial.clone(), &config));
        let (connection, mut notice_rx) = ConnectionManager::init(broker);
        let notices = tokio::spawn(async move {
            while let Some(notice) = notice_rx.recv().await {
                match notice {
                    Notice::Connected | Notice::PermissionGranted => {
                        ConsoleUi::success(&notice.to_string())
                    }
                    Notice::PermissionRequested => ConsoleUi::info(&notice.to_string()),
                    _ => ConsoleUi::warn(&notice.to_string()),
                }
            }
        });

        let wait = config.permission_timeout() + config.command_timeout();
        if !connection.wait_until_bound(wait).await {
            connection.cleanup().await;
            notices.abort();
            bail!("could not connect to {}", device.display_name());
        }

        let provider = Arc::new(AdbPackageProvider::new(
            client,
            device.serial.clone(),
            config.user_id,
        ));
        let inventory = AppInventory::new(provider, classifier);
        let snapshot = inventory.reload().await;
        if snapshot.is_empty() {
            ConsoleUi::warn("No packages loaded; the device may still be booting. Reload to retry.");
        }
        Ok(Self {
            device_name: device.display_name(),
            config,
            inventory,
            connection,
            notices,
        })
    }

    async fn close(self) {
        self.connection.cleanup().await;
        self.notices.abort();
    }

    fn list(&self, args: ListArgs) -> anyhow::Result<()> {
        let mut criteria = FilterCriteria::new().with_search(args.search.unwrap_or_default());
        criteria.toggle_system_only(args.system);
        criteria.toggle_user_only(args.user);
        criteria.toggle_disabled_only(args.disabled);
        criteria.toggle_uninstalled_only(args.uninstalled);

        let snapshot = self.inventory.current();
        let visible = filter(&snapshot, &criteria);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&visible)?);
        } else {
            ConsoleUi::render_app_table(&visible);
        }
        Ok(())
    }

    async fn mutate(&self, op: Operation, args: MutateArgs) -> anyhow::Result<()> {
        let snapshot = self.inventory.current();
        let record = snapshot
            .get(&args.package)
            .ok_or_else(|| anyhow!("{} is not known on this device", args.package))?;
        check_allowed(op, record, args.force)
            .map_err(|e| anyhow!("{} (pass --force to {} it anyway)", e, op))?;
        if !args.yes && !ConsoleUi::confirm(&confirm_message(op, record)) {
            ConsoleUi::info("Cancelled");
            return Ok(());
        }
        self.dispatch(op, &args.package).await
    }

    /// Sends one operation, retrying once after a reconnect, and patches the
    /// inventory when the device confirms it.
    async fn dispatch(&self, op: Operation, package_id: &str) -> anyhow::Result<()> {
        let intent = MutationIntent::new(op, package_id);
        let mut result = self.connection.execute(intent.clone()).await;
        if let Err(DispatchError::NotConnected) = result {
            debug!("not connected; waiting for rebind before retrying");
            let wait = self.config.permission_timeout() + self.config.command_timeout();
            if self.connection.wait_until_bound(wait).await {
                result = self.connection.execute(intent).await;
            }
        }
        match result {
            Ok(applied) => {
                let snapshot = self.inventory.apply(&applied.package_id, applied.operation);
                ConsoleUi::success(&format!(
                    "{} {}",
                    applied.operation.past_tense(),
                    applied.package_id
                ));
                if let Some(record) = snapshot.get(&applied.package_id) {
                    ConsoleUi::render_app_row(1, record);
                }
                Ok(())
            }
            Err(e @ DispatchError::Interrupted { .. }) => {
                warn!("{}", e);
                self.inventory.reload().await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn interactive(&self) -> anyhow::Result<()> {
        let mut criteria = FilterCriteria::new();
        loop {
            let snapshot = self.inventory.current();
            let visible = filter(&snapshot, &criteria);
            Menu::render(
                &self.device_name,
                &criteria,
                visible.len(),
                snapshot.loaded_at(),
            );
            let input = ConsoleUi::read_line();
            let Some(choice) = Menu::parse_choice(&input) else {
                ConsoleUi::warn("Invalid choice, try again");
                continue;
            };
            match choice {
                MenuChoice::Quit => return Ok(()),
                MenuChoice::List => ConsoleUi::render_app_table(&visible),
                MenuChoice::Search => {
                    criteria.set_search(ConsoleUi::prompt("Search text (empty to clear):"));
                }
                MenuChoice::ToggleSystem => criteria.toggle_system_only(!criteria.system_only()),
                MenuChoice::ToggleUser => criteria.toggle_user_only(!criteria.user_only()),
                MenuChoice::ToggleDisabled => {
                    criteria.toggle_disabled_only(!criteria.disabled_only())
                }
                MenuChoice::ToggleUninstalled => {
                    criteria.toggle_uninstalled_only(!criteria.uninstalled_only())
                }
                MenuChoice::ClearFilters => criteria = FilterCriteria::new(),
                MenuChoice::Reload => {
                    let snapshot = self.inventory.reload().await;
                    ConsoleUi::info(&format!("Loaded {} packages", snapshot.len()));
                }
                MenuChoice::Apply(op) => {
                    let input = ConsoleUi::prompt(&format!(
                        "Package to {} (row number from the last list, or package id):",
                        op
                    ));
                    let record = match Menu::parse_index(&input) {
                        Some(i) if i <= visible.len() && !input.contains('.') => {
                            Some(visible[i - 1].clone())
                        }
                        _ => snapshot.get(input.trim()).cloned(),
                    };
                    let Some(record) = record else {
                        ConsoleUi::warn(&format!("{} is not in the list", input));
                        continue;
                    };
                    if let Err(e) = check_allowed(op, &record, false) {
                        if !ConsoleUi::confirm(&format!("{}. Continue anyway?", e)) {
                            continue;
                        }
                    }
                    if !ConsoleUi::confirm(&confirm_message(op, &record)) {
                        continue;
                    }
                    if let Err(e) = self.dispatch(op, &record.package_id).await {
                        ConsoleUi::error(&e.to_string());
                    }
                }
            }
        }
    }
}

/// Risky packages need an explicit override before they are taken away.
fn check_allowed(op: Operation, record: &AppRecord, force: bool) -> anyhow::Result<()> {
    let destructive = matches!(op, Operation::Disable | Operation::Uninstall);
    if destructive && record.safety_tier == SafetyTier::Risky && !force {
        bail!(
            "{} is rated risky; removing it can break the device",
            record.package_id
        );
    }
    Ok(())
}

fn confirm_message(op: Operation, record: &AppRecord) -> String {
    format!(
        "{} {} ({}, {})?",
        op.verb(),
        record.package_id,
        record.display_name,
        record.safety_tier
    )
}
