use core::net::IpAddr;
use std::fs::create_dir_all;

use arbor_config::{ConfigFile, NetworkConfig};
use arbor_network_primitives::config::{
    split_peer_addr, BootstrapConfig, BootstrapNodes, DiscoveryConfig, SwarmConfig, DEFAULT_PORT,
};
use arbor_tree::config::{DEFAULT_TREE_MAX_WIDTH, DEFAULT_TREE_WIDTH};
use arbor_tree::TreeConfig;
use clap::Parser;
use eyre::{bail, Result as EyreResult, WrapErr};
use libp2p_identity::Keypair;
use multiaddr::{Multiaddr, Protocol};
use tracing::{info, warn};

use crate::cli::RootArgs;

/// Initialize node configuration
#[derive(Debug, Parser)]
pub struct InitCommand {
    /// Host to listen on for peer connections
    #[arg(long, value_name = "HOST", default_value = "0.0.0.0")]
    pub swarm_host: IpAddr,

    /// Port to listen on for peer connections
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Node to join the tree through, ending in /p2p/<peer id>
    #[arg(long = "boot-node", value_name = "ADDR")]
    pub boot_nodes: Vec<Multiaddr>,

    /// Children a node accepts before redirecting joiners
    #[arg(long, value_name = "WIDTH", default_value_t = DEFAULT_TREE_WIDTH)]
    pub tree_width: usize,

    /// Children a node may hold while repairing the tree
    #[arg(long, value_name = "WIDTH", default_value_t = DEFAULT_TREE_MAX_WIDTH)]
    pub tree_max_width: usize,

    /// Disable mDNS peer discovery
    #[arg(long)]
    pub no_mdns: bool,

    /// Overwrite an existing configuration
    #[arg(short, long)]
    pub force: bool,
}

impl InitCommand {
    pub fn run(&self, root_args: &RootArgs) -> EyreResult<()> {
        let path = root_args.home.join(&root_args.node_name);

        if !path.exists() {
            create_dir_all(&path)
                .wrap_err_with(|| format!("failed to create directory {path:?}"))?;
        }

        if ConfigFile::exists(&path) {
            if !self.force {
                bail!("Node is already initialized in {:?}", path);
            }

            warn!("Overriding config.toml file in {:?}", path);
        }

        for addr in &self.boot_nodes {
            if split_peer_addr(addr).is_none() {
                bail!("Boot node {} does not end in /p2p/<peer id>", addr);
            }
        }

        let tree = TreeConfig::new(self.tree_width, self.tree_max_width);
        let _protocol = tree.validate().wrap_err("invalid tree parameters")?;

        let identity = Keypair::generate_ed25519();
        info!("Generated identity: {:?}", identity.public().to_peer_id());

        let listen = vec![Multiaddr::from(self.swarm_host).with(Protocol::Tcp(self.port))];

        let config = ConfigFile::new(
            identity,
            NetworkConfig::new(
                SwarmConfig::new(listen),
                BootstrapConfig::new(BootstrapNodes::new(self.boot_nodes.clone())),
                DiscoveryConfig::new(!self.no_mdns),
            ),
            tree,
        );

        config.save(&path)?;

        info!("Initialized a node in {:?}", path);

        Ok(())
    }
}
