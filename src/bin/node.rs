//! Runs one PBFT replica process: loads the deployment configuration,
//! binds its transport, and drives the agreement state machine until
//! the client broadcasts `Close`.

use std::collections::HashMap;
use std::net::SocketAddr;

use clap::Parser;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use tokio::sync::mpsc;

use pbft_smr::bft::communication::{Node, NodeConfig, NodeId};
use pbft_smr::bft::config::{Config, NetworkMode, NetworkTable};
use pbft_smr::bft::core::server::Replica;
use pbft_smr::bft::{self, InitConfig};

#[derive(Parser, Debug)]
#[command(name = "pbft-node", about = "Runs one replica of a pbft-smr deployment")]
struct Args {
    /// Path to the deployment's JSON configuration file.
    #[arg(long)]
    config: String,

    /// This replica's id, in the range `0..node_num`.
    #[arg(long)]
    node_id: i64,

    /// Network topology: `local` (everyone on localhost) or `remote`.
    #[arg(long, default_value = "local")]
    mode: String,

    /// Directory log files are written under.
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

fn init_logging(log_dir: &str, file_name: &str) {
    let path = format!("{}/{}", log_dir, file_name);
    let pattern = "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}";

    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build(&path)
        .unwrap_or_else(|e| panic!("failed to open log file {}: {}", path, e));
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let config = LogConfig::builder()
        .appender(Appender::builder().build("file", Box::new(file)))
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(
            Root::builder()
                .appender("file")
                .appender("console")
                .build(log::LevelFilter::Info),
        )
        .expect("failed to assemble logging configuration");

    log4rs::init_config(config).expect("failed to install logger");
}

fn main() {
    let args = Args::parse();

    std::fs::create_dir_all(&args.log_dir).expect("failed to create log directory");
    init_logging(&args.log_dir, &format!("node_{}.log", args.node_id));

    let config = match Config::read(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to read configuration: {:?}", e);
            std::process::exit(1);
        }
    };

    let mode = match NetworkMode::parse(&args.mode) {
        Ok(m) => m,
        Err(e) => {
            log::error!("invalid network mode '{}': {:?}", args.mode, e);
            std::process::exit(1);
        }
    };

    let _guard = bft::init(InitConfig { async_threads: 4 }).expect("failed to init runtime");

    let table = NetworkTable::generate(mode, config.n());
    let mut addrs: HashMap<NodeId, SocketAddr> = HashMap::new();
    for (id, addr) in &table.node_addr {
        let socket_addr: SocketAddr = addr
            .parse()
            .unwrap_or_else(|e| panic!("invalid node address '{}': {}", addr, e));
        addrs.insert(NodeId::from(*id as u32), socket_addr);
    }
    let client_id = NodeId::from(config.n() as u32);
    let client_addr: SocketAddr = table
        .client_addr
        .parse()
        .unwrap_or_else(|e| panic!("invalid client address '{}': {}", table.client_addr, e));
    addrs.insert(client_id, client_addr);

    let own_id = NodeId::from(args.node_id as u32);

    bft::async_runtime::block_on(async move {
        let (sink, inbound) = mpsc::unbounded_channel();
        let node = Node::bootstrap(NodeConfig { id: own_id, addrs }, sink)
            .await
            .expect("failed to bootstrap transport");

        let (replica, timer_events) = Replica::new(node, config).expect("failed to build replica");
        log::info!("replica {} ready, view {}", replica.id(), replica.view());
        replica.run(inbound, timer_events).await;
    });

    log::info!("replica {} shutting down", args.node_id);
}
