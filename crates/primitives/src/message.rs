//! The tree protocol envelope.
//!
//! Field names are serialized in `PascalCase` so that the envelope reads the
//! same on the wire as in the protocol description (`Type`, `Peers`,
//! `NumPeers`, `TreeWidth`, `TreeMaxWidth`).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum MessageType {
    /// Request to attach below the receiver.
    Join,
    /// Welcome or redirect, naming one or more candidate parents.
    Update,
    /// Upward report of a subtree's size and immediate children.
    State,
    /// Departure notification sent to a parent.
    Part,
    /// Application payload flowing down the tree.
    Data,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub struct Message {
    #[serde(rename = "Type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
    #[serde(default)]
    pub num_peers: usize,
    #[serde(default)]
    pub tree_width: usize,
    #[serde(default)]
    pub tree_max_width: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

impl Message {
    #[must_use]
    pub const fn new(kind: MessageType) -> Self {
        Self {
            kind,
            peers: Vec::new(),
            num_peers: 0,
            tree_width: 0,
            tree_max_width: 0,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub const fn join() -> Self {
        Self::new(MessageType::Join)
    }

    #[must_use]
    pub const fn part() -> Self {
        Self::new(MessageType::Part)
    }

    /// A welcome (or redirect) naming the candidate parents in order of
    /// preference, together with the fan-out parameters of the tree.
    #[must_use]
    pub fn update(peers: Vec<String>, tree_width: usize, tree_max_width: usize) -> Self {
        Self {
            peers,
            tree_width,
            tree_max_width,
            ..Self::new(MessageType::Update)
        }
    }

    /// `num_peers` counts the sender's descendants, excluding the sender itself.
    #[must_use]
    pub fn state(children: Vec<String>, num_peers: usize) -> Self {
        Self {
            peers: children,
            num_peers,
            ..Self::new(MessageType::State)
        }
    }

    #[must_use]
    pub fn data(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new(MessageType::Data)
        }
    }
}
