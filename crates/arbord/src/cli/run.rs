use std::sync::Arc;

use arbor_config::ConfigFile;
use arbor_network::client::NetworkClient;
use arbor_network::types::NetworkEvent;
use arbor_network_primitives::config::{split_peer_addr, NetworkConfig};
use arbor_tree::{Subtree, TreeEvent};
use clap::Parser;
use eyre::{bail, Result as EyreResult};
use multiaddr::Multiaddr;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::signal::ctrl_c;
use tokio::{select, spawn};
use tracing::{debug, info, warn};

use crate::cli::RootArgs;

/// Run a node
#[derive(Debug, Parser)]
pub struct RunCommand {
    /// Join through this node instead of the configured boot nodes
    #[arg(long = "join", value_name = "ADDR")]
    pub join: Vec<Multiaddr>,

    /// Start a new tree rooted at this node, ignoring boot nodes
    #[arg(long, conflicts_with = "join")]
    pub root: bool,
}

impl RunCommand {
    pub async fn run(self, root_args: RootArgs) -> EyreResult<()> {
        let path = root_args.home.join(root_args.node_name);

        if !ConfigFile::exists(&path) {
            bail!("Node is not initialized in {:?}", path);
        }

        let config = ConfigFile::load(&path)?;

        let entry_points = if self.root {
            Vec::new()
        } else if self.join.is_empty() {
            config.network.bootstrap.nodes.list.clone()
        } else {
            self.join
        };

        let network = config.network;
        let (client, mut network_events) = arbor_network::run(&NetworkConfig::new(
            config.identity.clone(),
            network.swarm,
            network.bootstrap,
            network.discovery,
        ))
        .await?;

        let peer_id = client.local_peer_id();
        info!("Peer ID: {}", peer_id);

        let (tree, mut tree_events) = Subtree::new(peer_id, &config.tree, Arc::new(client.clone()))?;

        drop(spawn(join_tree(Arc::clone(&tree), client, entry_points)));
        drop(spawn(publish_stdin(Arc::clone(&tree))));

        #[expect(clippy::redundant_pub_crate, reason = "Tokio code")]
        loop {
            select! {
                event = network_events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    handle_network_event(&tree, event);
                }
                event = tree_events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    handle_tree_event(event);
                }
                result = ctrl_c() => {
                    result?;
                    info!("Leaving the tree");
                    break;
                }
            }
        }

        tree.close().await?;

        Ok(())
    }
}

/// Attaches through the first entry point that lets us in. A node that gets
/// in nowhere stays the root of its own tree.
async fn join_tree(tree: Arc<Subtree>, client: NetworkClient, entry_points: Vec<Multiaddr>) {
    if entry_points.is_empty() {
        info!("No boot nodes configured, starting a new tree");
        return;
    }

    for addr in entry_points {
        let Some((peer, _)) = split_peer_addr(&addr) else {
            warn!(%addr, "Boot node address names no peer");
            continue;
        };

        if peer == tree.local_peer() {
            continue;
        }

        if let Err(err) = client.dial(addr.clone()).await {
            warn!(%addr, ?err, "Failed to dial boot node");
            continue;
        }

        let stream = match client.open_stream(peer, tree.protocol().clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%peer, %err, "Failed to open tree stream to boot node");
                continue;
            }
        };

        match tree.attach(stream).await {
            Ok(parent) => {
                let peers = client.peer_count().await.unwrap_or_default();
                info!(%parent, introducer = %peer, peers, "Joined tree");
                return;
            }
            Err(err) => warn!(introducer = %peer, %err, "Failed to join tree"),
        }
    }

    warn!("No boot node let us in, starting a new tree");
}

fn handle_network_event(tree: &Arc<Subtree>, event: NetworkEvent) {
    match event {
        NetworkEvent::ListeningOn { address, .. } => info!("Listening on: {}", address),
        NetworkEvent::StreamOpened { peer_id, stream } => {
            let tree = Arc::clone(tree);

            drop(spawn(async move {
                match tree.handle_inbound(*stream).await {
                    Ok(outcome) => debug!(%peer_id, ?outcome, "Served tree stream"),
                    Err(err) => warn!(%peer_id, %err, "Failed to serve tree stream"),
                }
            }));
        }
        event => debug!(?event, "Unhandled network event"),
    }
}

fn handle_tree_event(event: TreeEvent) {
    match event {
        TreeEvent::Attached { parent } => info!(%parent, "Attached below parent"),
        TreeEvent::ParentLost { parent } => {
            warn!(%parent, "Lost parent, now serving a detached subtree");
        }
        TreeEvent::Delivered { data } => {
            info!(message = %String::from_utf8_lossy(&data), "Received message");
        }
        event => debug!(?event, "Unhandled tree event"),
    }
}

/// Publishes every stdin line below this node, in order. Runs apart from the
/// event loop so that a broadcast stuck on repair dials never stops network
/// events from being drained.
async fn publish_stdin(tree: Arc<Subtree>) {
    let mut lines = BufReader::new(stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => publish(&tree, line).await,
            Ok(None) => {
                debug!("stdin closed, nothing more to publish");
                return;
            }
            Err(err) => {
                warn!(%err, "Failed to read from stdin, no longer publishing");
                return;
            }
        }
    }
}

async fn publish(tree: &Subtree, line: String) {
    if line.trim().is_empty() || tree.is_closed() {
        return;
    }

    let forwarded = tree.publish(line.into_bytes()).await;

    info!(
        delivered = forwarded.delivered,
        dead = forwarded.dead.len(),
        repaired = forwarded.repaired.len(),
        "Published message"
    );
}
