//! In-memory network for driving real and scripted tree nodes.

#![allow(dead_code, reason = "Not every test binary uses every helper")]

use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbor_network_primitives::connector::{Connector, OpenStreamError};
use arbor_network_primitives::stream::{Stream, MEMORY_PIPE_CAPACITY};
use arbor_primitives::identity::{self, PeerId};
use arbor_primitives::message::{Message, MessageType};
use arbor_tree::{InboundOutcome, Subtree, TreeConfig, TreeError, TreeEvent};
use async_trait::async_trait;
use libp2p::StreamProtocol;
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Registry {
    listeners: HashMap<PeerId, mpsc::UnboundedSender<Stream>>,
    dials: Vec<(PeerId, PeerId)>,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams opened towards `peer` from now on arrive on the receiver.
    pub fn listen(&self, peer: PeerId) -> mpsc::UnboundedReceiver<Stream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(self.registry.lock().unwrap().listeners.insert(peer, sender));
        receiver
    }

    pub fn connector(&self, local: PeerId) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            local,
            network: self.clone(),
        })
    }

    /// Peers `local` tried to open a stream to, in order.
    pub fn dials_from(&self, local: PeerId) -> Vec<PeerId> {
        self.registry
            .lock()
            .unwrap()
            .dials
            .iter()
            .filter(|(from, _)| *from == local)
            .map(|(_, to)| *to)
            .collect()
    }

    pub async fn open(&self, from: PeerId, to: PeerId) -> Stream {
        self.connector(from)
            .open(to, StreamProtocol::new("/arbor/tree/0.1.0"))
            .await
            .unwrap()
    }

    /// A real node reachable on this network, serving every inbound stream.
    pub fn spawn_node(&self, config: &TreeConfig) -> TestNode {
        let id = PeerId::random();
        let (node, events) = Subtree::new(id, config, self.connector(id)).unwrap();
        let mut incoming = self.listen(id);

        let serving = Arc::clone(&node);
        drop(tokio::spawn(async move {
            while let Some(stream) = incoming.recv().await {
                let node = Arc::clone(&serving);
                drop(tokio::spawn(async move {
                    let _outcome = node.handle_inbound(stream).await;
                }));
            }
        }));

        TestNode { id, node, events }
    }

    /// A node that is not reachable through the network.
    pub fn detached_node(&self, config: &TreeConfig) -> TestNode {
        let id = PeerId::random();
        let (node, events) = Subtree::new(id, config, self.connector(id)).unwrap();

        TestNode { id, node, events }
    }

    /// Attaches `joiner` through `introducer` over this network.
    pub async fn attach(&self, joiner: &TestNode, introducer: PeerId) -> Result<PeerId, TreeError> {
        let stream = self.open(joiner.id, introducer).await;
        joiner.node.attach(stream).await
    }
}

struct MemoryConnector {
    local: PeerId,
    network: MemoryNetwork,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, peer: PeerId, _protocol: StreamProtocol) -> Result<Stream, OpenStreamError> {
        let mut registry = self.network.registry.lock().unwrap();
        registry.dials.push((self.local, peer));

        let unreachable = || OpenStreamError::Unreachable {
            peer,
            reason: "no such peer".to_owned(),
        };

        let listener = registry.listeners.get(&peer).ok_or_else(unreachable)?;
        let (local_end, remote_end) = Stream::pair(self.local, peer);
        listener.send(remote_end).map_err(|_| unreachable())?;

        Ok(local_end)
    }
}

pub struct TestNode {
    pub id: PeerId,
    pub node: Arc<Subtree>,
    pub events: mpsc::Receiver<TreeEvent>,
}

impl TestNode {
    /// Waits for an event matching `wanted`, skipping others.
    pub async fn expect_event(&mut self, wanted: impl Fn(&TreeEvent) -> bool) -> TreeEvent {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event channel open");
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event did not arrive in time")
    }
}

/// Polls `check` until it holds, panicking after [`WAIT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = timeout(WAIT, async {
        while !check().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(polled.is_ok(), "timed out waiting for: {what}");
}

/// Plays a joining peer against `node` over a private stream pair. Returns
/// the joiner's end, the node's verdict, and the reply the joiner saw.
pub async fn join_directly(
    node: &Arc<Subtree>,
    joiner: PeerId,
) -> (Stream, Result<InboundOutcome, TreeError>, Message) {
    let (mut joiner_end, node_end) = Stream::pair(joiner, node.local_peer());

    joiner_end.send(Message::join()).await.unwrap();
    let outcome = node.handle_inbound(node_end).await;
    let reply = joiner_end.recv().await.unwrap().expect("node replied");

    (joiner_end, outcome, reply)
}

/// Sends a `State` report as `children` would from a child's end.
pub async fn report_state(stream: &mut Stream, children: &[PeerId], num_peers: usize) {
    let peers = children.iter().map(identity::encode).collect();
    stream.send(Message::state(peers, num_peers)).await.unwrap();
}

/// Plays a parent that accepts the first join arriving on `incoming`.
pub async fn accept_as_parent(
    incoming: &mut mpsc::UnboundedReceiver<Stream>,
    parent: PeerId,
    width: usize,
    max_width: usize,
) -> Stream {
    let mut stream = timeout(WAIT, incoming.recv())
        .await
        .expect("join arrived in time")
        .expect("listener open");

    let join = stream.recv().await.unwrap().expect("join message");
    assert_eq!(join.kind, MessageType::Join, "first message is a join");

    stream
        .send(Message::update(
            vec![identity::encode(&parent)],
            width,
            max_width,
        ))
        .await
        .unwrap();

    stream
}

pub fn names(peers: &[PeerId]) -> Vec<String> {
    peers.iter().map(identity::encode).collect()
}

pub fn sorted(mut peers: Vec<PeerId>) -> Vec<PeerId> {
    peers.sort_unstable();
    peers
}

/// Transport that reads normally but fails every write, so a link over it
/// looks alive until something is sent on it.
struct WriteFails(DuplexStream);

impl AsyncRead for WriteFails {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for WriteFails {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Has `node` adopt a scripted parent whose link takes no writes. The
/// returned parent end must be kept alive for the link to stay up.
pub async fn adopt_by_broken_parent(node: &Arc<Subtree>) -> (Stream, PeerId) {
    let parent = PeerId::random();
    let (parent_io, node_io) = duplex(MEMORY_PIPE_CAPACITY);
    let mut parent_end = Stream::from_io(node.local_peer(), parent_io);
    let node_end = Stream::from_io(parent, WriteFails(node_io));

    let fanout = node.fanout().await;
    parent_end
        .send(Message::update(
            vec![identity::encode(&parent)],
            fanout.width,
            fanout.max_width,
        ))
        .await
        .unwrap();

    let outcome = node.handle_inbound(node_end).await.unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Adopted { parent },
        "scripted parent installed"
    );

    (parent_end, parent)
}
