use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vxlan_egress_common::DEFAULT_PIN_DIR;

mod dry_run;
mod loader;
mod model;
mod tables;

use model::LocalDevice;
use tables::{EndpointTable, LocalNodeTable, PodNodeTable};

#[derive(Parser)]
#[command(name = "vxlan-egress")]
#[command(about = "VXLAN overlay egress classifier", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the classifier to the egress path of the VXLAN device
    Attach(AttachCommand),
    /// Read one entry from a pinned overlay table
    Lookup(LookupCommand),
    /// Show what the classifier would do with a packet to DST
    Resolve(ResolveCommand),
}

#[derive(Args)]
struct PinDirArg {
    /// Directory holding the tables pinned by name
    #[arg(long, value_name = "DIR", default_value = DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
}

#[derive(Args)]
struct AttachCommand {
    /// VXLAN device whose egress path is classified
    #[arg(long, value_name = "IFACE")]
    iface: String,
    #[command(flatten)]
    pins: PinDirArg,
}

#[derive(Args)]
struct LookupCommand {
    #[command(flatten)]
    pins: PinDirArg,
    #[command(subcommand)]
    table: LookupTable,
}

#[derive(Subcommand)]
enum LookupTable {
    /// Node hosting a pod (Pod-to-Node table)
    Pod { ip: Ipv4Addr },
    /// Local workload endpoint (Endpoint table)
    Endpoint { ip: Ipv4Addr },
    /// Interface index of a local device role (Local-Node table)
    Local {
        #[arg(value_enum)]
        device: LocalDevice,
    },
}

#[derive(Args)]
struct ResolveCommand {
    /// Destination address of the packet
    dst: Ipv4Addr,
    /// Source address of the packet
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    src: Ipv4Addr,
    #[command(flatten)]
    pins: PinDirArg,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vxlan_egress=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("vxlan-egress error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Attach(cmd)) => {
            let opts = loader::AttachOptions {
                iface: cmd.iface,
                pin_dir: cmd.pins.pin_dir,
            };
            loader::attach_program(opts).await?;
        }
        Some(Commands::Lookup(cmd)) => {
            let pin_dir = cmd.pins.pin_dir;
            let value = match cmd.table {
                LookupTable::Pod { ip } => {
                    let table = PodNodeTable::open_pod_nodes(&pin_dir)?;
                    debug!(table = table.name(), %ip, "lookup");
                    model::pod_route_json(ip, table.node_of_pod(ip)?)
                }
                LookupTable::Endpoint { ip } => {
                    let table = EndpointTable::open_endpoints(&pin_dir)?;
                    debug!(table = table.name(), %ip, "lookup");
                    model::endpoint_json(ip, table.endpoint(ip)?.as_ref())
                }
                LookupTable::Local { device } => {
                    let table = LocalNodeTable::open_local_node(&pin_dir)?;
                    debug!(table = table.name(), %device, "lookup");
                    model::local_device_json(device, table.if_index(device)?)
                }
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Some(Commands::Resolve(cmd)) => {
            let table = PodNodeTable::open_pod_nodes(&cmd.pins.pin_dir)?;
            let resolution = dry_run::resolve(|key| table.get(key), cmd.src, cmd.dst)?;
            let value = resolution.to_json(cmd.src, cmd.dst);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}
