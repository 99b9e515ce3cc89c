use arbor_network_primitives::connector::{Connector, OpenStreamError};
use arbor_network_primitives::stream::Stream;
use async_trait::async_trait;
use eyre::{eyre, Result as EyreResult};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use libp2p_stream::{Control, OpenStreamError as P2pOpenStreamError};
use tokio::sync::{mpsc, oneshot};

/// Requests served by the network event loop.
#[derive(Debug)]
pub(crate) enum Command {
    ListenOn {
        addr: Multiaddr,
        sender: oneshot::Sender<EyreResult<()>>,
    },
    Dial {
        peer_addr: Multiaddr,
        sender: oneshot::Sender<EyreResult<()>>,
    },
    Bootstrap {
        sender: oneshot::Sender<EyreResult<()>>,
    },
    PeerCount {
        sender: oneshot::Sender<usize>,
    },
}

/// Cheap handle to a running swarm.
#[derive(Clone)]
pub struct NetworkClient {
    peer_id: PeerId,
    sender: mpsc::Sender<Command>,
    control: Control,
}

impl NetworkClient {
    pub(crate) const fn new(peer_id: PeerId, sender: mpsc::Sender<Command>, control: Control) -> Self {
        Self {
            peer_id,
            sender,
            control,
        }
    }

    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub async fn listen_on(&self, addr: Multiaddr) -> EyreResult<()> {
        let (sender, receiver) = oneshot::channel();

        self.send(Command::ListenOn { addr, sender }).await?;

        receiver.await?
    }

    /// Connects to the peer named by the trailing `/p2p/` component of
    /// `peer_addr`, resolving once the connection is up.
    pub async fn dial(&self, peer_addr: Multiaddr) -> EyreResult<()> {
        let (sender, receiver) = oneshot::channel();

        self.send(Command::Dial { peer_addr, sender }).await?;

        receiver.await?
    }

    pub async fn bootstrap(&self) -> EyreResult<()> {
        let (sender, receiver) = oneshot::channel();

        self.send(Command::Bootstrap { sender }).await?;

        receiver.await?
    }

    pub async fn peer_count(&self) -> EyreResult<usize> {
        let (sender, receiver) = oneshot::channel();

        self.send(Command::PeerCount { sender }).await?;

        Ok(receiver.await?)
    }

    /// Opens a tree stream to `peer`, dialing it first if needed.
    pub async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol) -> Result<Stream, OpenStreamError> {
        let stream = self
            .control
            .clone()
            .open_stream(peer, protocol)
            .await
            .map_err(|err| match err {
                P2pOpenStreamError::UnsupportedProtocol(protocol) => {
                    OpenStreamError::UnsupportedProtocol { peer, protocol }
                }
                err => OpenStreamError::Unreachable {
                    peer,
                    reason: err.to_string(),
                },
            })?;

        Ok(Stream::new(peer, stream))
    }

    async fn send(&self, command: Command) -> EyreResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| eyre!("Network event loop is not running"))
    }
}

impl core::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for NetworkClient {
    async fn open(&self, peer: PeerId, protocol: StreamProtocol) -> Result<Stream, OpenStreamError> {
        self.open_stream(peer, protocol).await
    }
}
