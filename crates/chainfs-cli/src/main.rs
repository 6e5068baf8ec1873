mod cli;
mod client;
mod coordinator;
mod daemon;
mod net;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use chainfs_rs::namesystem::{Namesystem, NamesystemConfig};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, ClientArgs, Command, CoordinatorArgs, DaemonArgs};
use crate::client::{Client, ClientConfig};
use crate::daemon::{Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Coordinator(args) => run_coordinator(args).await,
        Command::Daemon(args) => run_daemon(args).await,
        Command::Put(args) => {
            client(&args.client)
                .put_file(&args.local, &args.remote)
                .await?;
            Ok(())
        }
        Command::Get(args) => {
            client(&args.client)
                .get_file(&args.remote, &args.local)
                .await?;
            Ok(())
        }
    }
}

fn client(args: &ClientArgs) -> Client {
    Client::new(
        args.coordinator.clone(),
        ClientConfig {
            block_size: args.block_size,
            packet_size: args.packet_size,
            queue_capacity: args.queue_capacity,
        },
    )
}

async fn run_coordinator(args: CoordinatorArgs) -> anyhow::Result<()> {
    let config = NamesystemConfig {
        meta_dir: args.meta_dir,
        replication: args.replication,
        block_size: args.block_size,
        base_dir: args.base_dir,
    };
    let namesystem = Namesystem::open(config).context("open namesystem")?;
    let shared = Arc::new(Mutex::new(namesystem));
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;

    tokio::select! {
        res = coordinator::serve(listener, Arc::clone(&shared)) => res?,
        res = shutdown_signal() => {
            res?;
            coordinator::checkpoint(&shared)?;
            info!("coordinator stopped");
        }
    }
    Ok(())
}

async fn run_daemon(args: DaemonArgs) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    let config = DaemonConfig {
        name: args.name,
        data_dir: args.data_dir,
        coordinator: args.coordinator,
        advertise: args.advertise,
    };
    let daemon = Daemon::register(listener, &config).await?;
    info!(id = daemon.info().id, "daemon serving");

    tokio::select! {
        res = daemon.serve() => res?,
        res = shutdown_signal() => {
            res?;
            info!(name = %config.name, "daemon stopped");
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown: ctrl-c");
        }
        _ = term.recv() => info!("shutdown: SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown: ctrl-c");
    Ok(())
}
