//! Cluster-wide constants and on-disk naming.

/// ROOT_ID is the inode ID for the namespace root.
pub const ROOT_ID: u64 = 1;
/// BLOCK_ID_START is the last-assigned block ID of an empty registry.
pub const BLOCK_ID_START: u64 = 0;
/// DEFAULT_REPLICATION is the number of replicas allocated per block.
pub const DEFAULT_REPLICATION: usize = 3;
/// DEFAULT_BLOCK_SIZE is the target block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;
/// DEFAULT_PACKET_SIZE is the maximum payload carried by one pipeline packet.
pub const DEFAULT_PACKET_SIZE: usize = 64 * 1024;
/// DEFAULT_QUEUE_CAPACITY bounds the streamer work and pending-ack queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// BUF_LEN is the socket read size and the chunk size used when serving reads.
pub const BUF_LEN: usize = 64 * 1024;
/// MAX_FRAME_LEN caps a single length-prefixed frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
/// FRAME_HEADER_LEN is the size of the big-endian length prefix.
pub const FRAME_HEADER_LEN: usize = 4;
/// DEFAULT_BASE_DIR is the directory a leading `.` path segment refers to.
pub const DEFAULT_BASE_DIR: &str = "/";
/// DEFAULT_COORDINATOR_ADDR is where daemons and clients find the coordinator.
pub const DEFAULT_COORDINATOR_ADDR: &str = "127.0.0.1:9000";

/// IMAGE_FILENAME is the namespace snapshot file inside the metadata directory.
pub const IMAGE_FILENAME: &str = "fsimage.json";
/// EDIT_LOG_PREFIX prefixes every edit record file.
pub const EDIT_LOG_PREFIX: &str = "edits_";
/// BLOCK_PREFIX prefixes every block file held by a storage daemon.
pub const BLOCK_PREFIX: &str = "blk_";

/// block_file_name returns the zero-padded on-disk name of a block.
#[must_use]
pub fn block_file_name(block_id: u64) -> String {
    format!("{BLOCK_PREFIX}{block_id:020}")
}

/// parse_block_file_name recovers a block ID from a block file name.
#[must_use]
pub fn parse_block_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(BLOCK_PREFIX)?.parse().ok()
}

/// edit_log_file_name returns the zero-padded name of an edit record.
#[must_use]
pub fn edit_log_file_name(seq: u64) -> String {
    format!("{EDIT_LOG_PREFIX}{seq:08}")
}

/// parse_edit_log_file_name recovers the sequence number of an edit record.
#[must_use]
pub fn parse_edit_log_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(EDIT_LOG_PREFIX)?.parse().ok()
}
