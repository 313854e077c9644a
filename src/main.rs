use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fabgate::network::{run_cluster_server, run_http_gateway, Forwarder, Gateway, GrpcTransport};
use fabgate::{ClusterNode, GatewayConfig, Settings};

#[derive(Parser)]
#[command(name = "fabgate")]
#[command(about = "Clustered blockchain gateway with a replicated configuration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a gateway node
    Serve(Settings),

    /// Show a node's role and term from its HTTP endpoint
    Status {
        /// Gateway HTTP address, e.g. 127.0.0.1:8080
        #[arg(long)]
        http: String,
    },

    /// Show the membership a node currently knows
    Cluster {
        /// Gateway HTTP address, e.g. 127.0.0.1:8080
        #[arg(long)]
        http: String,
    },
}

fn init_logging() {
    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

async fn http_get(host_port: &str, path: &str) -> anyhow::Result<String> {
    let uri: hyper::Uri = format!("http://{host_port}{path}")
        .parse()
        .context("invalid gateway address")?;
    let response = hyper::Client::new()
        .get(uri)
        .await
        .with_context(|| format!("failed to reach {host_port}"))?;
    let body = hyper::body::to_bytes(response.into_body()).await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let config = GatewayConfig::resolve(&settings, std::env::var("HOSTNAME").ok())?;
    let seed = config.load_seed()?;

    info!(
        "Starting gateway {} ({} peers, standalone={})",
        config.raft.local.id,
        config.raft.peers.len(),
        config.raft.standalone
    );

    let transport = Arc::new(GrpcTransport::new(config.raft.rpc_timeout()));
    let node = ClusterNode::new(config.raft.clone(), transport)
        .with_seed(seed)
        .await;

    let rpc = tokio::spawn(run_cluster_server(config.rpc_listen, node.clone()));
    let gateway = Arc::new(Gateway::new(
        node.clone(),
        Forwarder::new(node.id(), config.forward_timeout),
    ));
    let http = tokio::spawn(run_http_gateway(config.http_listen, gateway));

    node.start().await;

    tokio::select! {
        res = rpc => match res {
            Ok(Ok(())) => info!("Cluster RPC server exited"),
            Ok(Err(e)) => error!("Cluster RPC server failed: {e}"),
            Err(e) => error!("Cluster RPC task panicked: {e}"),
        },
        res = http => match res {
            Ok(Ok(())) => info!("HTTP gateway exited"),
            Ok(Err(e)) => error!("HTTP gateway failed: {e}"),
            Err(e) => error!("HTTP gateway task panicked: {e}"),
        },
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    node.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(settings) => serve(settings).await?,
        Command::Status { http } => println!("{}", http_get(&http, "/health").await?),
        Command::Cluster { http } => println!("{}", http_get(&http, "/cluster").await?),
    }

    Ok(())
}
