use std::sync::Arc;

use arbor_network_primitives::stream::Stream;
use arbor_primitives::identity::{self, PeerId};
use arbor_primitives::message::{Message, MessageType};
use tokio::select;
use tracing::{debug, info, warn};

use crate::error::{ProtocolViolation, TreeError};
use crate::membership::{Child, Membership};
use crate::report::run_report_loop;
use crate::Subtree;

/// How a join request was settled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Admission {
    /// The requester became a child of this node.
    Accepted,
    /// This node was full; the requester was sent on to `to`.
    Redirected { to: PeerId },
}

/// What became of a fresh inbound stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum InboundOutcome {
    Joined(Admission),
    /// The stream was an adoption offer from a repairing ancestor and now
    /// links this node to `parent`.
    Adopted { parent: PeerId },
}

impl Subtree {
    /// Serves a stream opened to this node by another peer, dispatching on
    /// the first message it carries.
    pub async fn handle_inbound(self: &Arc<Self>, mut stream: Stream) -> Result<InboundOutcome, TreeError> {
        let peer = stream.remote_peer();

        let first = select! {
            biased;
            () = self.token.cancelled() => return Err(TreeError::Cancelled),
            first = stream.recv() => first?,
        };

        let Some(first) = first else {
            return Err(ProtocolViolation::StreamEnded.into());
        };

        match first.kind {
            MessageType::Join => {
                let mut members = self.members.lock().await;

                self.admit(&mut members, stream, false)
                    .await
                    .map(InboundOutcome::Joined)
            }
            MessageType::Update => {
                let parent = self.adopt(stream, first).await?;

                Ok(InboundOutcome::Adopted { parent })
            }
            received => {
                warn!(%peer, ?received, "unexpected first message on inbound stream");
                close_quietly(stream).await;

                Err(ProtocolViolation::UnexpectedMessage {
                    expected: MessageType::Join,
                    received,
                }
                .into())
            }
        }
    }

    /// Inserts the peer behind `stream` below this node, or redirects it to
    /// the least loaded child when the applicable cap is reached. Priority
    /// admission is measured against the larger repair cap.
    pub(crate) async fn admit(
        &self,
        members: &mut Membership,
        mut stream: Stream,
        priority: bool,
    ) -> Result<Admission, TreeError> {
        let fanout = members.fanout();
        let joiner = stream.remote_peer();

        if members.len() >= fanout.cap(priority) {
            let to = self.redirect(members, stream).await?;
            info!(%joiner, %to, priority, "redirected join");
            return Ok(Admission::Redirected { to });
        }

        let welcome = Message::update(
            vec![identity::encode(&self.local)],
            fanout.width,
            fanout.max_width,
        );

        if let Err(err) = stream.send(welcome).await {
            close_quietly(stream).await;
            return Err(err.into());
        }

        let (sender, receiver) = stream.split();
        let token = self.token.child_token();
        let child = Child::new(sender, token.clone());

        drop(tokio::spawn(run_report_loop(child.report(), receiver, token)));

        if let Some(previous) = members.insert(child) {
            debug!(%joiner, "peer joined again, replacing its previous entry");
            drop(previous.retire());
        }

        info!(%joiner, priority, children = members.len(), "accepted child");

        self.report_to_parent(members).await?;

        Ok(Admission::Accepted)
    }

    async fn redirect(&self, members: &mut Membership, mut stream: Stream) -> Result<PeerId, TreeError> {
        let fanout = members.fanout();

        let result = async {
            let to = members.least_loaded().ok_or(TreeError::NoChildren)?;

            let redirect = Message::update(vec![identity::encode(&to)], fanout.width, fanout.max_width);
            stream.send(redirect).await?;

            Ok::<_, TreeError>(to)
        }
        .await;

        close_quietly(stream).await;

        result
    }

    /// Tells the parent, if any, what this node's subtree now looks like.
    pub(crate) async fn report_to_parent(&self, members: &Membership) -> Result<(), TreeError> {
        let mut parent = self.parent.lock().await;

        let Some(link) = parent.as_mut() else {
            return Ok(());
        };

        link.send(members.state_report()).await?;

        Ok(())
    }
}

pub(crate) async fn close_quietly(stream: Stream) {
    let peer = stream.remote_peer();

    if let Err(err) = stream.close().await {
        debug!(%peer, %err, "error closing stream");
    }
}
