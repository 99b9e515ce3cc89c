//! Node-local membership state.
//!
//! [`Membership`] is only ever reached through the node-wide lock in
//! [`Subtree`](crate::Subtree), which serializes structural changes,
//! admission decisions and broadcast passes. Each child's reported size and
//! children sit behind their own lock so that the child's report loop can
//! update them while a broadcast is writing to other children.

#[cfg(test)]
#[path = "tests/membership.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use arbor_network_primitives::stream::StreamSender;
use arbor_primitives::identity::{self, PeerId};
use arbor_primitives::message::Message;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProtocolViolation;

/// Fan-out caps of the tree this node belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fanout {
    /// Cap for ordinary admission.
    pub width: usize,
    /// Cap for priority admission during repair.
    pub max_width: usize,
}

impl Fanout {
    #[must_use]
    pub const fn new(width: usize, max_width: usize) -> Self {
        Self { width, max_width }
    }

    #[must_use]
    pub const fn cap(&self, priority: bool) -> usize {
        if priority {
            self.max_width
        } else {
            self.width
        }
    }

    pub(crate) const fn from_welcome(welcome: &Message) -> Result<Self, ProtocolViolation> {
        if welcome.tree_width == 0 || welcome.tree_max_width < welcome.tree_width {
            return Err(ProtocolViolation::InvalidFanout {
                tree_width: welcome.tree_width,
                tree_max_width: welcome.tree_max_width,
            });
        }

        Ok(Self::new(welcome.tree_width, welcome.tree_max_width))
    }
}

/// What a child last told us about its own subtree.
#[derive(Debug)]
pub(crate) struct ChildReport {
    /// Subtree size rooted at the child, the child included.
    pub(crate) size: usize,
    /// Identifiers of the child's own children, as sent on the wire.
    pub(crate) children: Vec<String>,
}

impl Default for ChildReport {
    fn default() -> Self {
        Self {
            size: 1,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Child {
    id: PeerId,
    sender: StreamSender,
    report: Arc<Mutex<ChildReport>>,
    token: CancellationToken,
}

impl Child {
    pub(crate) fn new(sender: StreamSender, token: CancellationToken) -> Self {
        Self {
            id: sender.remote_peer(),
            sender,
            report: Arc::default(),
            token,
        }
    }

    pub(crate) const fn id(&self) -> PeerId {
        self.id
    }

    pub(crate) fn sender_mut(&mut self) -> &mut StreamSender {
        &mut self.sender
    }

    pub(crate) fn report(&self) -> Arc<Mutex<ChildReport>> {
        Arc::clone(&self.report)
    }

    pub(crate) fn size(&self) -> usize {
        self.report.lock().size
    }

    /// Stops the child's report loop and hands back the last reported
    /// children of the child, which become orphans once the child is gone.
    pub(crate) fn retire(self) -> Vec<String> {
        self.token.cancel();

        let mut report = self.report.lock();
        core::mem::take(&mut report.children)
    }

    /// Stops the child's report loop and closes the stream to it.
    pub(crate) async fn shut(self) {
        self.token.cancel();

        let peer = self.id;
        if let Err(err) = self.sender.close().await {
            debug!(%peer, %err, "error closing stream to child");
        }
    }
}

/// Point-in-time view of one child, for introspection.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct ChildSnapshot {
    pub peer: PeerId,
    pub size: usize,
    pub children: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct Membership {
    children: HashMap<PeerId, Child>,
    fanout: Fanout,
}

impl Membership {
    pub(crate) fn new(fanout: Fanout) -> Self {
        Self {
            children: HashMap::new(),
            fanout,
        }
    }

    pub(crate) const fn fanout(&self) -> Fanout {
        self.fanout
    }

    pub(crate) fn set_fanout(&mut self, fanout: Fanout) {
        self.fanout = fanout;
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn contains(&self, peer: &PeerId) -> bool {
        self.children.contains_key(peer)
    }

    /// Registers a child, returning the entry it replaced if the same peer
    /// joined again.
    pub(crate) fn insert(&mut self, child: Child) -> Option<Child> {
        self.children.insert(child.id(), child)
    }

    pub(crate) fn remove(&mut self, peer: &PeerId) -> Option<Child> {
        self.children.remove(peer)
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut Child> {
        self.children.values_mut()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Child> + '_ {
        self.children.drain().map(|(_, child)| child)
    }

    pub(crate) fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.children.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of peers below this node, from the children's latest reports.
    pub(crate) fn descendants(&self) -> usize {
        self.children
            .values()
            .fold(0_usize, |total, child| total.saturating_add(child.size()))
    }

    /// This node's subtree size estimate: itself plus its descendants.
    pub(crate) fn size(&self) -> usize {
        self.descendants().saturating_add(1)
    }

    /// Picks the child with the smallest reported subtree and optimistically
    /// counts the redirected peer against it. Ties go to whichever child the
    /// scan meets first.
    pub(crate) fn least_loaded(&mut self) -> Option<PeerId> {
        let mut lightest: Option<(&Child, usize)> = None;

        for child in self.children.values() {
            let size = child.size();

            if lightest.map_or(true, |(_, min)| size < min) {
                lightest = Some((child, size));
            }
        }

        let (child, _) = lightest?;

        let mut report = child.report.lock();
        report.size = report.size.saturating_add(1);

        Some(child.id())
    }

    /// The `State` message describing this node's subtree to its parent.
    pub(crate) fn state_report(&self) -> Message {
        let children = self.ids().iter().map(identity::encode).collect();

        Message::state(children, self.descendants())
    }

    pub(crate) fn snapshots(&self) -> Vec<ChildSnapshot> {
        let mut snapshots: Vec<_> = self
            .children
            .values()
            .map(|child| {
                let report = child.report.lock();

                ChildSnapshot {
                    peer: child.id(),
                    size: report.size,
                    children: report.children.clone(),
                }
            })
            .collect();

        snapshots.sort_unstable_by_key(|snapshot| snapshot.peer);
        snapshots
    }
}
