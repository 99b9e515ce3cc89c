use arbor_primitives::identity::{self, PeerId};
use arbor_primitives::message::Message;
use tracing::{debug, error, info, warn};

use crate::admission::Admission;
use crate::Subtree;

/// Outcome of one broadcast pass over this node's children.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Forwarded {
    /// Children the message was written to.
    pub delivered: usize,
    /// Children whose stream failed and which were dropped.
    pub dead: Vec<PeerId>,
    /// Grandchildren reattached directly below this node, including those
    /// whose admission could not be reported further up.
    pub repaired: Vec<PeerId>,
}

impl Subtree {
    /// Publishes `data` to everything below this node.
    pub async fn publish(&self, data: Vec<u8>) -> Forwarded {
        self.forward_message(&Message::data(data)).await
    }

    /// Writes `message` to every child. A failed write is how a dead child is
    /// detected: it is dropped and the children it last reported are asked
    /// to attach directly below this node under the repair cap. Reattached
    /// peers do not receive `message`. A closed node forwards nothing.
    pub async fn forward_message(&self, message: &Message) -> Forwarded {
        let mut members = self.members.lock().await;
        let mut forwarded = Forwarded::default();

        if self.token.is_cancelled() {
            debug!("node is closed, not forwarding");
            return forwarded;
        }

        for child in members.children_mut() {
            let peer = child.id();

            match child.sender_mut().send(message.clone()).await {
                Ok(()) => forwarded.delivered = forwarded.delivered.saturating_add(1),
                Err(err) => {
                    debug!(%peer, %err, "write to child failed");
                    forwarded.dead.push(peer);
                }
            }
        }

        for dead in forwarded.dead.clone() {
            let Some(child) = members.remove(&dead) else {
                continue;
            };

            let orphans = child.retire();
            warn!(child = %dead, orphans = orphans.len(), "child unreachable, repairing tree");

            for orphan in orphans {
                if self.token.is_cancelled() {
                    return forwarded;
                }

                let peer = match identity::decode(&orphan) {
                    Ok(peer) => peer,
                    Err(err) => {
                        error!(%err, "error decoding child's child id");
                        continue;
                    }
                };

                if peer == self.local || members.contains(&peer) {
                    continue;
                }

                let stream = match self.connector.open(peer, self.protocol.clone()).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(%peer, %err, "error opening stream for tree repair");
                        continue;
                    }
                };

                match self.admit(&mut members, stream, true).await {
                    Ok(Admission::Accepted) => {
                        info!(%peer, "reattached orphan");
                        forwarded.repaired.push(peer);
                    }
                    Ok(Admission::Redirected { to }) => {
                        info!(%peer, %to, "orphan redirected during repair");
                    }
                    // Admission reports to our parent after registering the
                    // orphan, so a failed report still leaves it reattached.
                    Err(err) if members.contains(&peer) => {
                        warn!(%peer, %err, "reattached orphan, but reporting to parent failed");
                        forwarded.repaired.push(peer);
                    }
                    Err(err) => error!(%peer, %err, "repairing child"),
                }
            }
        }

        forwarded
    }
}
