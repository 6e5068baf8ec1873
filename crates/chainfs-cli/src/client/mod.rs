//! Client: whole-file writes through the data streamer and block-wise reads.

pub mod coordinator;
pub mod reader;
pub mod streamer;

use std::path::Path;

use anyhow::Context;
use chainfs_rs::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_PACKET_SIZE, DEFAULT_QUEUE_CAPACITY};
use rand::seq::IndexedRandom;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use coordinator::CoordinatorClient;
use streamer::{DataStreamer, StreamSummary};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub block_size: u64,
    pub packet_size: usize,
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            packet_size: DEFAULT_PACKET_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

pub struct Client {
    coordinator: CoordinatorClient,
    config: ClientConfig,
}

impl Client {
    pub fn new(coordinator_addr: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            coordinator: CoordinatorClient::new(coordinator_addr),
            config,
        }
    }

    pub const fn coordinator(&self) -> &CoordinatorClient {
        &self.coordinator
    }

    /// Create `path` and fill it from `source`.
    pub async fn put<R: AsyncRead + Unpin>(&self, path: &str, source: R) -> anyhow::Result<StreamSummary> {
        let inode = self.coordinator.create(path).await?;
        let summary = DataStreamer::new(self.coordinator.clone(), inode, self.config.clone())
            .write_all(source)
            .await
            .with_context(|| format!("write {path}"))?;
        self.coordinator.create_complete(path).await?;
        Ok(summary)
    }

    pub async fn put_file(&self, local: &Path, remote: &str) -> anyhow::Result<StreamSummary> {
        let file = File::open(local)
            .await
            .with_context(|| format!("open {}", local.display()))?;
        let summary = self.put(remote, file).await?;
        info!(
            local = %local.display(),
            remote,
            bytes = summary.bytes,
            blocks = summary.blocks.len(),
            "put complete"
        );
        Ok(summary)
    }

    /// Read every block of `path` from a randomly chosen replica.
    ///
    /// There is no failover: a missing replica yields a short result.
    pub async fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let blocks = self.coordinator.block_locations(path).await?;
        let mut data = Vec::new();
        for block in blocks {
            let Some(daemon) = block.locations.choose(&mut rand::rng()).cloned() else {
                warn!(block = block.block_id, path, "block has no live replica");
                continue;
            };
            let bytes = reader::read_block(&daemon, block.block_id, 0, block.num_bytes).await?;
            data.extend_from_slice(&bytes);
        }
        Ok(data)
    }

    pub async fn get_file(&self, remote: &str, local: &Path) -> anyhow::Result<u64> {
        let data = self.read_file(remote).await?;
        tokio::fs::write(local, &data)
            .await
            .with_context(|| format!("write {}", local.display()))?;
        info!(remote, local = %local.display(), bytes = data.len(), "get complete");
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use chainfs_rs::constants::block_file_name;
    use chainfs_rs::namesystem::{Namesystem, NamesystemConfig};
    use chainfs_rs::protocol::{Request, Response};
    use rand::RngCore;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    use super::*;
    use crate::daemon::{Daemon, DaemonConfig};

    struct Cluster {
        addr: String,
        dir: TempDir,
        daemons: Vec<String>,
    }

    async fn cluster(daemons: usize, replication: usize) -> Cluster {
        let dir = TempDir::new().expect("tempdir");
        let mut config = NamesystemConfig::new(dir.path().join("meta"));
        config.replication = replication;
        let ns = Namesystem::open(config).expect("open namesystem");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        tokio::spawn(crate::coordinator::serve(listener, Arc::new(Mutex::new(ns))));

        let mut names = Vec::new();
        for i in 0..daemons {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let config = DaemonConfig {
                name: format!("dn{i}"),
                data_dir: dir.path().join("data"),
                coordinator: addr.clone(),
                advertise: None,
            };
            let daemon = Daemon::register(listener, &config).await.expect("register");
            names.push(daemon.info().name.clone());
            tokio::spawn(daemon.serve());
        }
        Cluster {
            addr,
            dir,
            daemons: names,
        }
    }

    fn small(block_size: u64) -> ClientConfig {
        ClientConfig {
            block_size,
            packet_size: 16,
            queue_capacity: 2,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::rng().fill_bytes(&mut data);
        data
    }

    #[tokio::test]
    async fn three_replica_round_trip() {
        let cluster = cluster(3, 3).await;
        let client = Client::new(cluster.addr.clone(), small(1024));
        let resp = client
            .coordinator()
            .request(&Request::Mkdir { path: "/a".into() })
            .await
            .expect("mkdir");
        assert!(matches!(resp, Response::Created { .. }));

        let data = payload(2560);
        let summary = client.put("/a/b.txt", &data[..]).await.expect("put");
        assert_eq!(summary.blocks.len(), 3);
        assert_eq!(summary.bytes, 2560);

        let blocks = client
            .coordinator()
            .block_locations("/a/b.txt")
            .await
            .expect("locations");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks.iter().map(|b| b.num_bytes).sum::<u64>(), 2560);
        for block in &blocks {
            let ids: HashSet<_> = block.locations.iter().map(|d| d.id).collect();
            assert_eq!(ids.len(), 3);
            for name in &cluster.daemons {
                let path = cluster
                    .dir
                    .path()
                    .join("data")
                    .join(name)
                    .join(block_file_name(block.block_id));
                let len = std::fs::metadata(&path).expect("replica on disk").len();
                assert_eq!(len, block.num_bytes);
            }
        }

        assert_eq!(client.read_file("/a/b.txt").await.expect("read"), data);
    }

    #[tokio::test]
    async fn block_count_matches_size() {
        let block = 64u64;
        let cluster = cluster(3, 2).await;
        let client = Client::new(cluster.addr.clone(), small(block));
        for (i, size) in [0, block - 1, block, block + 1, 3 * block + 7].into_iter().enumerate() {
            let path = format!("/f{i}");
            let data = payload(size as usize);
            let summary = client.put(&path, &data[..]).await.expect("put");
            assert_eq!(summary.blocks.len() as u64, size.div_ceil(block), "size {size}");
            for located in &summary.blocks {
                assert_eq!(located.locations.len(), 2);
            }
            assert_eq!(client.read_file(&path).await.expect("read"), data, "size {size}");
        }
    }

    #[tokio::test]
    async fn put_to_existing_path_fails() {
        let cluster = cluster(1, 1).await;
        let client = Client::new(cluster.addr.clone(), small(64));
        client.put("/f", &b"one"[..]).await.expect("first put");
        let err = client.put("/f", &b"two"[..]).await.unwrap_err();
        assert!(format!("{err:#}").contains("AlreadyExists"));
    }

    #[tokio::test]
    async fn too_few_daemons_aborts_write() {
        let cluster = cluster(1, 2).await;
        let client = Client::new(cluster.addr.clone(), small(64));
        let err = client.put("/f", &b"data"[..]).await.unwrap_err();
        assert!(format!("{err:#}").contains("Configuration"));
    }

    #[tokio::test]
    async fn unreachable_replica_aborts_write() {
        let cluster = cluster(1, 2).await;
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr").to_string()
        };
        let config = DaemonConfig {
            name: "gone".into(),
            data_dir: cluster.dir.path().join("data"),
            coordinator: cluster.addr.clone(),
            advertise: Some(dead.clone()),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        Daemon::register(listener, &config).await.expect("register");

        let client = Client::new(cluster.addr.clone(), small(64));
        let err = client.put("/f", &b"data"[..]).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("connect to") && msg.contains(&dead), "{msg}");

        let head = cluster.dir.path().join("data").join(&cluster.daemons[0]);
        let written = std::fs::read_dir(head)
            .expect("daemon dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("blk_"))
            .count();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn missing_replica_gives_short_read() {
        let cluster = cluster(1, 1).await;
        let client = Client::new(cluster.addr.clone(), small(64));
        let data = payload(100);
        let summary = client.put("/f", &data[..]).await.expect("put");
        let first = &summary.blocks[0];
        let replica = cluster
            .dir
            .path()
            .join("data")
            .join(&cluster.daemons[0])
            .join(block_file_name(first.block_id));
        std::fs::remove_file(replica).expect("drop replica");

        let read = client.read_file("/f").await.expect("read");
        assert_eq!(read, data[64..].to_vec());
    }

    #[tokio::test]
    async fn get_file_writes_local_copy() {
        let cluster = cluster(2, 2).await;
        let client = Client::new(cluster.addr.clone(), small(32));
        let local = cluster.dir.path().join("in.bin");
        let data = payload(90);
        std::fs::write(&local, &data).expect("write local");
        client.put_file(&local, "/copy").await.expect("put_file");

        let out = cluster.dir.path().join("out.bin");
        assert_eq!(client.get_file("/copy", &out).await.expect("get_file"), 90);
        assert_eq!(std::fs::read(out).expect("read local"), data);
    }
}
