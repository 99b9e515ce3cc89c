use libp2p::identify::Event;
use owo_colors::OwoColorize;
use tracing::debug;

use super::{EventHandler, EventLoop};

impl EventHandler<Event> for EventLoop {
    async fn handle(&mut self, event: Event) {
        debug!("{}: {:?}", "identify".yellow(), event);

        if let Event::Received { peer_id, info, .. } = event {
            for addr in info.listen_addrs {
                let _ignored = self.swarm.behaviour_mut().kad.add_address(&peer_id, addr);
            }
        }
    }
}
