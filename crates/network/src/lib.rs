#![allow(
    clippy::allow_attributes,
    reason = "Needed for lints that don't follow expect"
)]
//! The libp2p side of an arbor node: one swarm carrying identify, kademlia,
//! mdns and ping for connectivity, plus the raw stream protocol the tree
//! speaks over.

use std::collections::hash_map::HashMap;

use arbor_network_primitives::config::{split_peer_addr, NetworkConfig};
use arbor_network_primitives::stream::ARBOR_TREE_PROTOCOL;
use eyre::{bail, Result as EyreResult};
use futures_util::StreamExt;
use libp2p::identify::{Behaviour as IdentifyBehaviour, Config as IdentifyConfig};
use libp2p::kad::store::MemoryStore;
use libp2p::kad::{Behaviour as KadBehaviour, Config as KadConfig, Mode, QueryId};
use libp2p::mdns::tokio::Behaviour as MdnsTokioBehaviour;
use libp2p::mdns::Config as MdnsConfig;
use libp2p::noise::Config as NoiseConfig;
use libp2p::ping::Behaviour as PingBehaviour;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{NetworkBehaviour, Swarm};
use libp2p::tcp::Config as TcpConfig;
use libp2p::yamux::Config as YamuxConfig;
use libp2p::{PeerId, StreamProtocol, SwarmBuilder};
use libp2p_stream::{Behaviour as StreamBehaviour, IncomingStreams};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio::{select, spawn};
use tracing::{info, warn};

use crate::client::{Command, NetworkClient};
use crate::types::NetworkEvent;

pub mod client;
mod commands;
mod events;
mod stream;
pub mod types;

#[cfg(test)]
#[path = "tests/lib.rs"]
mod tests;

const PROTOCOL_VERSION: &str = concat!("/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const ARBOR_KAD_PROTO_NAME: StreamProtocol = StreamProtocol::new("/arbor/kad/1.0.0");

#[derive(NetworkBehaviour)]
struct Behaviour {
    identify: IdentifyBehaviour,
    kad: KadBehaviour<MemoryStore>,
    mdns: Toggle<MdnsTokioBehaviour>,
    ping: PingBehaviour,
    stream: StreamBehaviour,
}

/// Starts the swarm on a background task and returns a handle to it together
/// with the stream of events it produces, inbound tree streams included.
pub async fn run(config: &NetworkConfig) -> EyreResult<(NetworkClient, mpsc::Receiver<NetworkEvent>)> {
    let peer_id = config.identity.public().to_peer_id();

    let (client, event_receiver, event_loop) = init(peer_id, config)?;

    drop(spawn(event_loop.run()));

    for addr in &config.swarm.listen {
        client.listen_on(addr.clone()).await?;
    }

    if let Err(err) = client.bootstrap().await {
        warn!(%err, "Failed to bootstrap with Kademlia");
    }

    Ok((client, event_receiver))
}

fn init(
    peer_id: PeerId,
    config: &NetworkConfig,
) -> EyreResult<(NetworkClient, mpsc::Receiver<NetworkEvent>, EventLoop)> {
    let bootstrap_peers = {
        let mut peers = vec![];

        for addr in &config.bootstrap.nodes.list {
            let Some(peer) = split_peer_addr(addr) else {
                bail!("Failed to parse peer id from addr {:?}", addr);
            };

            peers.push(peer);
        }

        peers
    };

    let swarm = SwarmBuilder::with_existing_identity(config.identity.clone())
        .with_tokio()
        .with_tcp(TcpConfig::default(), NoiseConfig::new, YamuxConfig::default)?
        .with_behaviour(|key| Behaviour {
            identify: IdentifyBehaviour::new(
                IdentifyConfig::new(PROTOCOL_VERSION.to_owned(), key.public())
                    .with_push_listen_addr_updates(true),
            ),
            mdns: config
                .discovery
                .mdns
                .then_some(())
                .and_then(|()| MdnsTokioBehaviour::new(MdnsConfig::default(), peer_id).ok())
                .into(),
            kad: {
                let kad_config = KadConfig::new(ARBOR_KAD_PROTO_NAME);

                let mut kad = KadBehaviour::with_config(peer_id, MemoryStore::new(peer_id), kad_config);

                kad.set_mode(Some(Mode::Server));

                for (peer_id, addr) in bootstrap_peers {
                    let _ignored = kad.add_address(&peer_id, addr);
                }

                kad
            },
            ping: PingBehaviour::default(),
            stream: StreamBehaviour::new(),
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    let control = swarm.behaviour().stream.new_control();

    let incoming_streams = match control.clone().accept(ARBOR_TREE_PROTOCOL) {
        Ok(incoming_streams) => incoming_streams,
        Err(err) => {
            bail!("Failed to setup control for stream protocol: {:?}", err)
        }
    };

    let (command_sender, command_receiver) = mpsc::channel(32);
    let (event_sender, event_receiver) = mpsc::channel(32);

    let client = NetworkClient::new(peer_id, command_sender, control);

    let event_loop = EventLoop::new(swarm, incoming_streams, command_receiver, event_sender);

    Ok((client, event_receiver, event_loop))
}

pub(crate) struct EventLoop {
    swarm: Box<Swarm<Behaviour>>,
    incoming_streams: Box<IncomingStreams>,
    command_receiver: mpsc::Receiver<Command>,
    event_sender: mpsc::Sender<NetworkEvent>,
    pending_dial: HashMap<PeerId, oneshot::Sender<EyreResult<()>>>,
    pending_bootstrap: HashMap<QueryId, oneshot::Sender<EyreResult<()>>>,
}

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Currently necessary due to code structure"
)]
impl EventLoop {
    fn new(
        swarm: Swarm<Behaviour>,
        incoming_streams: IncomingStreams,
        command_receiver: mpsc::Receiver<Command>,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            swarm: Box::new(swarm),
            incoming_streams: Box::new(incoming_streams),
            command_receiver,
            event_sender,
            pending_dial: HashMap::default(),
            pending_bootstrap: HashMap::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
        loop {
            select! {
                event = self.swarm.next() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.handle_swarm_event(event).await;
                },
                incoming_stream = self.incoming_streams.next() => {
                    let Some(incoming_stream) = incoming_stream else {
                        break;
                    };
                    self.handle_incoming_stream(incoming_stream).await;
                },
                command = self.command_receiver.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command);
                }
            }
        }

        info!("Network event loop stopped");
    }
}
