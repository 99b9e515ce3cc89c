//! Opening outbound tree streams.
//!
//! The tree logic only ever needs to reach a peer by its identifier. The
//! production implementation lives in `arbor-network` on top of
//! `libp2p-stream`; tests plug in an in-memory network instead.

use arbor_primitives::identity::PeerId;
use async_trait::async_trait;
use libp2p::StreamProtocol;
use thiserror::Error as ThisError;

use crate::stream::Stream;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new stream to `peer` speaking `protocol`.
    async fn open(&self, peer: PeerId, protocol: StreamProtocol) -> Result<Stream, OpenStreamError>;
}

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum OpenStreamError {
    #[error("peer {peer} does not support protocol {protocol}")]
    UnsupportedProtocol {
        peer: PeerId,
        protocol: StreamProtocol,
    },
    #[error("failed to reach peer {peer}: {reason}")]
    Unreachable { peer: PeerId, reason: String },
}
