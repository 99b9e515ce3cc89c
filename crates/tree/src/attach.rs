use std::sync::Arc;

use arbor_network_primitives::stream::Stream;
use arbor_primitives::identity::{self, PeerId};
use arbor_primitives::message::{Message, MessageType};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::admission::close_quietly;
use crate::error::{ProtocolViolation, TreeError};
use crate::membership::Fanout;
use crate::Subtree;

impl Subtree {
    /// Joins the tree reachable through `introducer`, following redirects
    /// until some node accepts this one as a child. Returns the new parent.
    ///
    /// Abandons the attempt with [`TreeError::Cancelled`] if the node is
    /// closed meanwhile.
    pub async fn attach(self: &Arc<Self>, introducer: Stream) -> Result<PeerId, TreeError> {
        if self.parent.lock().await.is_some() {
            close_quietly(introducer).await;
            return Err(TreeError::AlreadyAttached);
        }

        let token = self.token.clone();

        select! {
            biased;
            () = token.cancelled() => Err(TreeError::Cancelled),
            parent = self.join_through(introducer) => parent,
        }
    }

    async fn join_through(self: &Arc<Self>, mut introducer: Stream) -> Result<PeerId, TreeError> {
        let welcome = match request_join(&mut introducer).await {
            Ok(welcome) => welcome,
            Err(err) => {
                close_quietly(introducer).await;
                return Err(err);
            }
        };

        let fanout = match Fanout::from_welcome(&welcome) {
            Ok(fanout) => fanout,
            Err(err) => {
                close_quietly(introducer).await;
                return Err(err.into());
            }
        };

        self.members.lock().await.set_fanout(fanout);

        let parent = self.resolve(introducer, welcome, 0).await?;

        Ok(self.install_parent(parent).await)
    }

    /// Accepts a welcome that arrived unrequested on an inbound stream: a
    /// repairing ancestor offering to take this node in.
    pub(crate) async fn adopt(self: &Arc<Self>, stream: Stream, welcome: Message) -> Result<PeerId, TreeError> {
        let from = stream.remote_peer();
        debug!(%from, "received adoption offer");

        let token = self.token.clone();

        let parent = select! {
            biased;
            () = token.cancelled() => return Err(TreeError::Cancelled),
            parent = self.resolve(stream, welcome, 0) => parent?,
        };

        Ok(self.install_parent(parent).await)
    }

    /// Turns a welcome received over `introducer` into a stream to this
    /// node's actual parent.
    ///
    /// Candidates are tried in order. A candidate that is the introducer
    /// itself accepted us already; any other is asked to take us in and may
    /// in turn redirect, which is followed recursively up to the hop limit.
    /// Streams that do not end up as the parent link are closed.
    fn resolve(
        &self,
        introducer: Stream,
        welcome: Message,
        depth: usize,
    ) -> BoxFuture<'_, Result<Stream, TreeError>> {
        async move {
            if depth >= self.max_redirect_hops {
                close_quietly(introducer).await;
                return Err(TreeError::HopLimit {
                    limit: self.max_redirect_hops,
                });
            }

            let candidates = match identity::decode_all(&welcome.peers) {
                Ok(candidates) if candidates.is_empty() => {
                    close_quietly(introducer).await;
                    return Err(ProtocolViolation::EmptyCandidates.into());
                }
                Ok(candidates) => candidates,
                Err(err) => {
                    close_quietly(introducer).await;
                    return Err(ProtocolViolation::BadPeer(err).into());
                }
            };

            let mut last_err = None;

            for candidate in candidates {
                if candidate == introducer.remote_peer() {
                    return Ok(introducer);
                }

                match self.try_candidate(candidate, depth).await {
                    Ok(parent) => {
                        close_quietly(introducer).await;
                        return Ok(parent);
                    }
                    Err(err) => {
                        warn!(%candidate, %err, depth, "candidate parent unusable");
                        last_err = Some(err);
                    }
                }
            }

            close_quietly(introducer).await;

            Err(last_err.unwrap_or(TreeError::NoUsableParent))
        }
        .boxed()
    }

    async fn try_candidate(&self, candidate: PeerId, depth: usize) -> Result<Stream, TreeError> {
        let mut stream = match self.connector.open(candidate, self.protocol.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(%candidate, %err, "failed to connect to tree parent");
                return Err(err.into());
            }
        };

        let welcome = match request_join(&mut stream).await {
            Ok(welcome) => welcome,
            Err(err) => {
                close_quietly(stream).await;
                return Err(err);
            }
        };

        if let [only] = welcome.peers.as_slice() {
            if *only == identity::encode(&candidate) {
                info!(%candidate, "candidate accepted join");
                return Ok(stream);
            }
        }

        debug!(%candidate, next = ?welcome.peers, "candidate redirected join");

        self.resolve(stream, welcome, depth.saturating_add(1)).await
    }
}

/// Sends `Join` and waits for the `Update` that must answer it.
async fn request_join(stream: &mut Stream) -> Result<Message, TreeError> {
    stream.send(Message::join()).await?;

    let reply = stream
        .recv()
        .await?
        .ok_or(ProtocolViolation::StreamEnded)?;

    if reply.kind != MessageType::Update {
        return Err(ProtocolViolation::UnexpectedMessage {
            expected: MessageType::Update,
            received: reply.kind,
        }
        .into());
    }

    Ok(reply)
}
