use arbor_network_primitives::stream::Stream;
use libp2p::core::transport;
pub use libp2p::identity::PeerId;
use libp2p::Multiaddr;

#[derive(Debug)]
#[non_exhaustive]
pub enum NetworkEvent {
    ListeningOn {
        listener_id: transport::ListenerId,
        address: Multiaddr,
    },
    /// A remote peer opened a tree stream to this node.
    StreamOpened {
        peer_id: PeerId,
        stream: Box<Stream>,
    },
}
