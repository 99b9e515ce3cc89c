use arbor_network_primitives::connector::OpenStreamError;
use arbor_network_primitives::stream::CodecError;
use arbor_primitives::identity::PeerIdError;
use arbor_primitives::message::MessageType;
use thiserror::Error as ThisError;

use crate::config::InvalidTreeConfig;

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum TreeError {
    #[error("invalid tree configuration: {0}")]
    Config(#[from] InvalidTreeConfig),
    #[error("transport failure: {0}")]
    Codec(#[from] CodecError),
    #[error("transport failure: {0}")]
    Open(#[from] OpenStreamError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("critical: fan-out cap reached with no child to redirect to")]
    NoChildren,
    #[error("could not get connection to tree: no usable parent")]
    NoUsableParent,
    #[error("redirect chain exceeded {limit} hops")]
    HopLimit { limit: usize },
    #[error("node already has a parent link")]
    AlreadyAttached,
    #[error("node is shutting down")]
    Cancelled,
}

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum ProtocolViolation {
    #[error("expected {expected:?} but received {received:?}")]
    UnexpectedMessage {
        expected: MessageType,
        received: MessageType,
    },
    #[error("welcome named no candidate parents")]
    EmptyCandidates,
    #[error("welcome named an undecodable peer")]
    BadPeer(#[source] PeerIdError),
    #[error("welcome carried invalid fan-out {tree_width}/{tree_max_width}")]
    InvalidFanout {
        tree_width: usize,
        tree_max_width: usize,
    },
    #[error("stream ended before the expected message")]
    StreamEnded,
}
