//! svcfabric - command-line entry point.
//!
//! Subcommands:
//! - `broker`: envelope-routing broker on the frontend address
//! - `directory`: standalone directory service
//! - `worker`: serve a built-in service (`hello`, `time`)
//! - `call`: send one request through a broker or via the directory

use std::path::PathBuf;

use bytes::Bytes;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use svcfabric::broker::Broker;
use svcfabric::client::{RequestClient, ServiceResolver};
use svcfabric::directory::Directory;
use svcfabric::heartbeat::HeartbeatVerifier;
use svcfabric::registry::{Registry, ServiceDescriptor};
use svcfabric::transport::Endpoint;
use svcfabric::types::ServiceId;
use svcfabric::worker::{self, ServeMode, Worker};
use svcfabric::wire::FrameLimits;
use svcfabric::{Config, Error};

#[derive(Parser)]
#[command(name = "svcfabric", version, about = "Service-oriented request/reply messaging fabric")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "SVCFABRIC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the envelope-routing broker
    Broker(BrokerArgs),
    /// Run the directory service
    Directory(DirectoryArgs),
    /// Serve a built-in service
    Worker(WorkerArgs),
    /// Send one request and print the reply
    Call(CallArgs),
}

#[derive(Args)]
struct BrokerArgs {
    /// Frontend address, e.g. tcp://*:5559
    #[arg(long, env = "SVCFABRIC_FRONTEND")]
    frontend: Option<String>,

    /// Registry record file
    #[arg(long)]
    services_file: Option<PathBuf>,
}

#[derive(Args)]
struct DirectoryArgs {
    /// Bind address, e.g. tcp://*:5569
    #[arg(long, env = "SVCFABRIC_DIRECTORY_BIND")]
    bind: Option<String>,

    /// Address advertised in the bootstrap entries
    #[arg(long)]
    advertise: Option<String>,

    /// Registry record file
    #[arg(long)]
    services_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Dial a broker-bound address
    Broker,
    /// Bind own address and register with a directory
    Directory,
}

#[derive(Args)]
struct WorkerArgs {
    /// Service id (hello, time)
    service: String,

    /// Address the service is reached at, e.g. tcp://localhost:5560
    #[arg(long)]
    address: String,

    /// Topology to serve in
    #[arg(long, value_enum, default_value = "broker")]
    mode: Mode,

    /// Registrar address; defaults to the broker or directory address
    #[arg(long)]
    registrar: Option<String>,
}

#[derive(Args)]
struct CallArgs {
    /// Service id
    service: String,

    /// Payload frames
    payload: Vec<String>,

    /// Resolve through the directory and call the service directly
    #[arg(long)]
    direct: bool,

    /// Broker or directory address; defaults from configuration
    #[arg(long)]
    via: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    svcfabric::observability::init_tracing(&config.observability);

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match cli.command {
        Command::Broker(args) => {
            if let Some(frontend) = args.frontend {
                config.broker.frontend_addr = frontend;
            }
            if let Some(file) = args.services_file {
                config.broker.services_file = file;
            }
            let registry = Registry::with_store(&config.broker.services_file);
            let broker = Broker::bind(&config, registry).await?;
            broker.run(cancel).await?;
        }
        Command::Directory(args) => {
            if let Some(bind) = args.bind {
                config.directory.bind_addr = bind;
            }
            if let Some(advertise) = args.advertise {
                config.directory.advertised_addr = advertise;
            }
            if let Some(file) = args.services_file {
                config.directory.services_file = file;
            }
            let registry = Registry::with_store(&config.directory.services_file);
            let verifier = HeartbeatVerifier::new(request_client(&config));
            let directory = Directory::bind(&config, registry, verifier).await?;
            directory.run(cancel).await?;
        }
        Command::Worker(args) => run_worker(&config, args, cancel).await?,
        Command::Call(args) => run_call(&config, args).await?,
    }

    Ok(())
}

fn request_client(config: &Config) -> RequestClient {
    RequestClient::new(&config.client, FrameLimits::from(&config.transport))
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });
}

async fn run_worker(
    config: &Config,
    args: WorkerArgs,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let handler = worker::builtin(&args.service)
        .ok_or_else(|| Error::validation(format!("no built-in service {}", args.service)))?;
    let id = ServiceId::from_string(args.service.clone()).map_err(Error::validation)?;
    let descriptor = ServiceDescriptor::new(
        id,
        format!("{} Service", args.service),
        args.address,
        args.service.as_str(),
    );

    let (mode, default_registrar) = match args.mode {
        Mode::Broker => (ServeMode::Dialed, &config.broker.frontend_addr),
        Mode::Directory => (ServeMode::Bound, &config.directory.advertised_addr),
    };
    let registrar: Endpoint = args
        .registrar
        .as_deref()
        .unwrap_or(default_registrar.as_str())
        .parse()?;

    let worker = Worker::new(
        descriptor,
        handler,
        request_client(config),
        config.transport.clone(),
    );
    worker.run(&registrar, mode, cancel).await?;
    Ok(())
}

async fn run_call(config: &Config, args: CallArgs) -> Result<(), Box<dyn std::error::Error>> {
    let payload: Vec<Bytes> = args.payload.into_iter().map(Bytes::from).collect();
    let client = request_client(config);

    let reply = if args.direct {
        let directory: Endpoint = args
            .via
            .as_deref()
            .unwrap_or(config.directory.advertised_addr.as_str())
            .parse()?;
        let mut cache = Registry::with_store(&config.client.cache_file);
        cache.load()?;
        let mut resolver = ServiceResolver::new(directory, cache, client);
        resolver.call(&args.service, payload).await?
    } else {
        let broker: Endpoint = args
            .via
            .as_deref()
            .unwrap_or(config.broker.frontend_addr.as_str())
            .parse()?;
        client
            .call_via(&broker, &args.service, payload, &args.service)
            .await?
    };

    for frame in reply {
        println!("{}", String::from_utf8_lossy(&frame));
    }
    Ok(())
}
