use std::path::PathBuf;

use chainfs_rs::constants::{
    DEFAULT_BASE_DIR, DEFAULT_BLOCK_SIZE, DEFAULT_COORDINATOR_ADDR, DEFAULT_PACKET_SIZE,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLICATION,
};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Chained-replication distributed file system")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the metadata coordinator.
    Coordinator(CoordinatorArgs),

    /// Run a storage daemon.
    Daemon(DaemonArgs),

    /// Copy a local file into the file system.
    Put(PutArgs),

    /// Copy a file out of the file system.
    Get(GetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CoordinatorArgs {
    #[arg(long, env = "CHAINFS_LISTEN", default_value = DEFAULT_COORDINATOR_ADDR)]
    pub listen: String,

    #[arg(long, env = "CHAINFS_META_DIR", default_value = "metadata")]
    pub meta_dir: PathBuf,

    #[arg(long, env = "CHAINFS_REPLICATION", default_value_t = DEFAULT_REPLICATION)]
    pub replication: usize,

    #[arg(long, env = "CHAINFS_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    #[arg(long, env = "CHAINFS_BASE_DIR", default_value = DEFAULT_BASE_DIR)]
    pub base_dir: String,
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    #[arg(long, env = "CHAINFS_DAEMON_LISTEN", default_value = "127.0.0.1:9100")]
    pub listen: String,

    #[arg(long, env = "CHAINFS_DAEMON_NAME")]
    pub name: String,

    #[arg(long, env = "CHAINFS_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "CHAINFS_COORDINATOR", default_value = DEFAULT_COORDINATOR_ADDR)]
    pub coordinator: String,

    /// Address other nodes use to reach this daemon, if not the listen address.
    #[arg(long, env = "CHAINFS_ADVERTISE")]
    pub advertise: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    #[arg(long, env = "CHAINFS_COORDINATOR", default_value = DEFAULT_COORDINATOR_ADDR)]
    pub coordinator: String,

    #[arg(long, env = "CHAINFS_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    #[arg(long, env = "CHAINFS_PACKET_SIZE", default_value_t = DEFAULT_PACKET_SIZE)]
    pub packet_size: usize,

    #[arg(long, env = "CHAINFS_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct PutArgs {
    pub local: PathBuf,

    pub remote: String,

    #[command(flatten)]
    pub client: ClientArgs,
}

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    pub remote: String,

    pub local: PathBuf,

    #[command(flatten)]
    pub client: ClientArgs,
}
