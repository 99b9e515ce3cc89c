use libp2p::mdns::Event;
use owo_colors::OwoColorize;
use tracing::debug;

use super::{EventHandler, EventLoop};

impl EventHandler<Event> for EventLoop {
    async fn handle(&mut self, event: Event) {
        debug!("{}: {:?}", "mdns".yellow(), event);

        match event {
            Event::Discovered(peers) => {
                for (peer_id, addr) in peers {
                    debug!("Discovered {} at {}", peer_id, addr);

                    let _ignored = self.swarm.behaviour_mut().kad.add_address(&peer_id, addr);
                }
            }
            Event::Expired(peers) => {
                for (peer_id, addr) in peers {
                    debug!("Expired {} at {}", peer_id, addr);

                    let _ignored = self.swarm.behaviour_mut().kad.remove_address(&peer_id, &addr);
                }
            }
        }
    }
}
