use arbor_network_primitives::stream::Stream;
use libp2p::{PeerId, Stream as P2pStream};
use tracing::{debug, warn};

use crate::types::NetworkEvent;
use crate::EventLoop;

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Currently needed due to code structure"
)]
impl EventLoop {
    pub(crate) async fn handle_incoming_stream(&mut self, (peer, stream): (PeerId, P2pStream)) {
        debug!(%peer, "Accepted tree stream");

        let event = NetworkEvent::StreamOpened {
            peer_id: peer,
            stream: Box::new(Stream::new(peer, stream)),
        };

        if self.event_sender.send(event).await.is_err() {
            warn!(%peer, "Dropping inbound stream, nobody is listening for network events");
        }
    }
}
