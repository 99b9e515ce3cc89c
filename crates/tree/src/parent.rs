use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use arbor_network_primitives::stream::{CodecError, Stream, StreamReceiver, StreamSender};
use arbor_primitives::identity::PeerId;
use arbor_primitives::message::{Message, MessageType};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TreeError;
use crate::{Subtree, TreeEvent};

/// The single outbound link from this node to its parent.
#[derive(Debug)]
pub(crate) struct ParentLink {
    sender: StreamSender,
    generation: u64,
    token: CancellationToken,
}

impl ParentLink {
    pub(crate) const fn peer(&self) -> PeerId {
        self.sender.remote_peer()
    }

    pub(crate) async fn send(&mut self, message: Message) -> Result<(), CodecError> {
        self.sender.send(message).await
    }

    async fn shut(self) {
        self.token.cancel();

        let peer = self.peer();
        if let Err(err) = self.sender.close().await {
            debug!(%peer, %err, "error closing previous parent link");
        }
    }
}

impl Subtree {
    /// Makes `stream` this node's parent link, replacing any previous one,
    /// and starts listening for messages coming down from it.
    pub(crate) async fn install_parent(self: &Arc<Self>, stream: Stream) -> PeerId {
        let peer = stream.remote_peer();
        let (sender, receiver) = stream.split();

        let generation = self.parent_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.token.child_token();

        let mut link = ParentLink {
            sender,
            generation,
            token: token.clone(),
        };

        let report = {
            let members = self.members.lock().await;
            (!members.is_empty()).then(|| members.state_report())
        };

        if let Some(report) = report {
            if let Err(err) = link.send(report).await {
                warn!(%peer, %err, "failed to report subtree to new parent");
            }
        }

        let previous = self.parent.lock().await.replace(link);

        if let Some(previous) = previous {
            info!(old = %previous.peer(), new = %peer, "replacing parent link");
            previous.shut().await;
        }

        drop(tokio::spawn(listen_to_parent(
            Arc::downgrade(self),
            receiver,
            generation,
            token,
        )));

        info!(parent = %peer, "attached to tree");
        self.emit(TreeEvent::Attached { parent: peer }).await;

        peer
    }

    async fn handle_parent_message(&self, message: Message) {
        match message.kind {
            MessageType::Data => {
                self.emit(TreeEvent::Delivered {
                    data: message.data.clone(),
                })
                .await;

                let forwarded = self.forward_message(&message).await;
                debug!(
                    delivered = forwarded.delivered,
                    dead = forwarded.dead.len(),
                    "forwarded message from parent"
                );
            }
            kind => warn!(?kind, "got unexpected message from parent"),
        }
    }

    async fn parent_lost(&self, generation: u64) {
        let lost = {
            let mut parent = self.parent.lock().await;

            match parent.as_ref() {
                Some(link) if link.generation == generation => parent.take(),
                _ => None,
            }
        };

        if let Some(link) = lost {
            let parent = link.peer();
            warn!(%parent, "lost parent link");
            link.token.cancel();
            self.emit(TreeEvent::ParentLost { parent }).await;
        }
    }

    /// Leaves the tree: stops every loop of this node, drops and closes the
    /// streams to its children and, if it has a parent, sends it `Part` and
    /// closes the link. Children are not sent anything before their stream
    /// ends.
    pub async fn close(&self) -> Result<(), TreeError> {
        self.token.cancel();

        let children: Vec<_> = self.members.lock().await.drain().collect();

        for child in children {
            child.shut().await;
        }

        let link = self.parent.lock().await.take();

        let Some(mut link) = link else {
            return Ok(());
        };

        if let Err(err) = link.send(Message::part()).await {
            error!(parent = %link.peer(), %err, "sending part message to parent");
        }

        link.sender.close().await.map_err(Into::into)
    }
}

async fn listen_to_parent(
    node: Weak<Subtree>,
    mut receiver: StreamReceiver,
    generation: u64,
    token: CancellationToken,
) {
    let parent = receiver.remote_peer();

    loop {
        let message = select! {
            () = token.cancelled() => return,
            message = receiver.recv() => message,
        };

        match message {
            Ok(Some(message)) => {
                let Some(node) = node.upgrade() else {
                    return;
                };

                node.handle_parent_message(message).await;
            }
            Ok(None) => {
                debug!(%parent, "parent closed the stream");
                break;
            }
            Err(err) => {
                error!(%parent, %err, "error reading message from parent");
                break;
            }
        }
    }

    if let Some(node) = node.upgrade() {
        node.parent_lost(generation).await;
    }
}
