#![allow(
    clippy::allow_attributes,
    reason = "Needed for lints that don't follow expect"
)]
#![allow(
    clippy::multiple_inherent_impl,
    reason = "Subtree operations are split across modules by responsibility"
)]
//! Membership and propagation for a bounded fan-out publish/subscribe tree.
//!
//! A [`Subtree`] is one node's view of the overlay: its children, its link to
//! its parent, and the fan-out caps of the tree. A node either starts as the
//! root or [attaches](Subtree::attach) below an existing node, after which it
//! serves joins from new peers ([`Subtree::handle_inbound`]), collects size
//! reports from its children and forwards messages downward
//! ([`Subtree::forward_message`]), repairing around children whose stream has
//! died.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use arbor_network_primitives::connector::Connector;
use arbor_primitives::identity::PeerId;
use libp2p::StreamProtocol;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

mod admission;
mod attach;
mod broadcast;
pub mod config;
mod error;
mod membership;
mod parent;
mod report;

pub use admission::{Admission, InboundOutcome};
pub use broadcast::Forwarded;
pub use config::TreeConfig;
pub use error::{ProtocolViolation, TreeError};
pub use membership::{ChildSnapshot, Fanout};

use membership::Membership;
use parent::ParentLink;

#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TreeEvent {
    /// A parent link was installed, by attachment or by adoption.
    Attached { parent: PeerId },
    /// The parent link ended; the node keeps serving its own subtree.
    ParentLost { parent: PeerId },
    /// Payload of a `Data` message received from the parent.
    Delivered { data: Vec<u8> },
}

pub struct Subtree {
    local: PeerId,
    protocol: StreamProtocol,
    max_redirect_hops: usize,
    connector: Arc<dyn Connector>,
    members: Mutex<Membership>,
    parent: Mutex<Option<ParentLink>>,
    parent_generation: AtomicU64,
    events: mpsc::Sender<TreeEvent>,
    token: CancellationToken,
}

impl Subtree {
    /// Creates a node that is the root of its own (so far empty) tree.
    pub fn new(
        local: PeerId,
        config: &TreeConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TreeEvent>), TreeError> {
        let protocol = config.validate()?;
        let (events, event_receiver) = mpsc::channel(config.event_buffer);

        let subtree = Self {
            local,
            protocol,
            max_redirect_hops: config.max_redirect_hops,
            connector,
            members: Mutex::new(Membership::new(Fanout::new(
                config.tree_width,
                config.tree_max_width,
            ))),
            parent: Mutex::default(),
            parent_generation: AtomicU64::new(0),
            events,
            token: CancellationToken::new(),
        };

        Ok((Arc::new(subtree), event_receiver))
    }

    #[must_use]
    pub const fn local_peer(&self) -> PeerId {
        self.local
    }

    #[must_use]
    pub const fn protocol(&self) -> &StreamProtocol {
        &self.protocol
    }

    /// Subtree size estimate: this node plus its children's latest reports.
    pub async fn size(&self) -> usize {
        self.members.lock().await.size()
    }

    pub async fn fanout(&self) -> Fanout {
        self.members.lock().await.fanout()
    }

    pub async fn children(&self) -> Vec<PeerId> {
        self.members.lock().await.ids()
    }

    pub async fn child_reports(&self) -> Vec<ChildSnapshot> {
        self.members.lock().await.snapshots()
    }

    pub async fn parent(&self) -> Option<PeerId> {
        self.parent.lock().await.as_ref().map(ParentLink::peer)
    }

    pub async fn is_root(&self) -> bool {
        self.parent.lock().await.is_none()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn emit(&self, event: TreeEvent) {
        // Nobody listening is fine.
        let _ignored = self.events.send(event).await;
    }
}

impl core::fmt::Debug for Subtree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subtree")
            .field("local", &self.local)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}
