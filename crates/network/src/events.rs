use libp2p::swarm::SwarmEvent;
use multiaddr::Protocol;
use owo_colors::OwoColorize;
use tracing::{debug, error, info, trace};

use super::{BehaviourEvent, EventLoop};
use crate::types::NetworkEvent;

mod identify;
mod kad;
mod mdns;
mod ping;

pub(crate) trait EventHandler<E> {
    async fn handle(&mut self, event: E);
}

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Currently necessary due to code structure"
)]
impl EventLoop {
    pub(crate) async fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => match event {
                BehaviourEvent::Identify(event) => self.handle(event).await,
                BehaviourEvent::Kad(event) => self.handle(event).await,
                BehaviourEvent::Mdns(event) => self.handle(event).await,
                BehaviourEvent::Ping(event) => self.handle(event).await,
                BehaviourEvent::Stream(()) => {}
            },
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                let local_peer_id = *self.swarm.local_peer_id();
                let address = address.with(Protocol::P2p(local_peer_id));

                info!("{}: {}", "listening on".green(), address);

                if self
                    .event_sender
                    .send(NetworkEvent::ListeningOn {
                        listener_id,
                        address,
                    })
                    .await
                    .is_err()
                {
                    error!("Failed to send listening on event");
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                debug!(%peer_id, address = %endpoint.get_remote_address(), "Connection established");

                if let Some(sender) = self.pending_dial.remove(&peer_id) {
                    let _ignored = sender.send(Ok(()));
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(%peer_id, ?cause, "Connection closed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(?peer_id, %error, "Outgoing connection error");

                if let Some(peer_id) = peer_id {
                    if let Some(sender) = self.pending_dial.remove(&peer_id) {
                        let _ignored = sender.send(Err(error.into()));
                    }
                }
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                debug!(%error, "Incoming connection error");
            }
            SwarmEvent::Dialing {
                peer_id: Some(peer_id),
                ..
            } => trace!("Dialing peer: {}", peer_id),
            event => trace!(?event, "Unhandled swarm event"),
        }
    }
}
