//! Process configuration: the JSON file every replica and client loads
//! at startup, and the local/remote network address tables derived
//! from it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bft::error::*;
use crate::bft::ordering::SeqNo;

/// Deployment topology: `Local` runs every replica and the client on
/// `localhost`, distinguished only by port; `Remote` assumes one node
/// per machine on a fixed private subnet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NetworkMode {
    Local,
    Remote,
}

impl NetworkMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(NetworkMode::Local),
            "remote" => Ok(NetworkMode::Remote),
            other => Err(format!("unknown network mode '{}'", other))
                .simple_msg(ErrorKind::Config, "unknown network mode"),
        }
    }
}

/// The configuration every node and client process loads from disk
/// before joining the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    pub max_tx_num: i64,
    pub inject_speed: i64,
    pub max_block_size: i64,

    pub node_num: i64,

    #[serde(default)]
    pub election_method: String,

    pub expire_time: i64,
    pub seq_number_upper_bound: i64,
    pub seq_number_lower_bound: i64,

    /// Checkpoint interval `K`: every `K`-th committed sequence number
    /// triggers a checkpoint vote. Not present in the distilled
    /// configuration format; defaults to the window span if omitted.
    #[serde(default)]
    pub checkpoint_interval: i64,

    /// Number of Byzantine replicas this deployment tolerates,
    /// derived from `node_num`, never read from the file.
    #[serde(skip, default)]
    pub faulty_nodes_num: i64,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Config {
    /// Reads and parses a JSON configuration file, deriving
    /// `faulty_nodes_num = (node_num - 1) / 3` and defaulting
    /// `checkpoint_interval` to the sequence window's span when it is
    /// absent or zero.
    pub fn read(path: impl AsRef<Path>) -> Result<Config> {
        let raw = fs::read_to_string(path).simple(ErrorKind::Config)?;
        let mut cfg: Config = serde_json::from_str(&raw).simple(ErrorKind::Config)?;

        if cfg.node_num < 4 {
            return Err("node_num must be at least 4 to tolerate any faults")
                .simple_msg(ErrorKind::Config, "node_num too small");
        }

        cfg.faulty_nodes_num = (cfg.node_num - 1) / 3;

        if cfg.checkpoint_interval <= 0 {
            cfg.checkpoint_interval =
                (cfg.seq_number_upper_bound - cfg.seq_number_lower_bound).max(1);
        }

        Ok(cfg)
    }

    /// `N = 3f + 1`, the total replica count.
    pub fn n(&self) -> i64 {
        self.node_num
    }

    /// `f`, the maximum number of Byzantine replicas tolerated.
    pub fn f(&self) -> i64 {
        self.faulty_nodes_num
    }

    /// `2f + 1`, the quorum size required for prepare/commit/checkpoint
    /// certificates.
    pub fn quorum(&self) -> i64 {
        2 * self.faulty_nodes_num + 1
    }

    /// The admission window a fresh replica starts with.
    pub fn initial_window(&self) -> (SeqNo, SeqNo) {
        (
            SeqNo::new(self.seq_number_lower_bound as i32),
            SeqNo::new(self.seq_number_upper_bound as i32),
        )
    }
}

/// The address every replica and the client dial to reach each other.
#[derive(Debug, Clone)]
pub struct NetworkTable {
    pub client_addr: String,
    pub node_addr: HashMap<i64, String>,
}

impl NetworkTable {
    /// Builds the address table for the given topology.
    pub fn generate(mode: NetworkMode, node_num: i64) -> NetworkTable {
        match mode {
            NetworkMode::Local => Self::generate_local(node_num),
            NetworkMode::Remote => Self::generate_remote(node_num),
        }
    }

    fn generate_local(node_num: i64) -> NetworkTable {
        let client_addr = "localhost:20000".to_string();
        let mut node_addr = HashMap::new();
        for i in 0..node_num {
            node_addr.insert(i, format!("localhost:{}", 28000 + i * 100));
        }
        NetworkTable {
            client_addr,
            node_addr,
        }
    }

    fn generate_remote(node_num: i64) -> NetworkTable {
        let client_addr = "172.17.8.1:20000".to_string();
        let mut node_addr = HashMap::new();
        for i in 0..node_num {
            node_addr.insert(i, format!("172.17.8.{}:28000", i + 2));
        }
        NetworkTable {
            client_addr,
            node_addr,
        }
    }
}
