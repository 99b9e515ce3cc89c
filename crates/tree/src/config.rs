use libp2p::StreamProtocol;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub const DEFAULT_PROTOCOL: &str = "/arbor/tree/0.1.0";
pub const DEFAULT_TREE_WIDTH: usize = 4;
pub const DEFAULT_TREE_MAX_WIDTH: usize = 8;
pub const DEFAULT_MAX_REDIRECT_HOPS: usize = 16;
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Parameters of a single tree. Only the root's fan-out matters in the long
/// run: joiners adopt whatever the welcome they receive carries.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct TreeConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_tree_width")]
    pub tree_width: usize,

    #[serde(default = "default_tree_max_width")]
    pub tree_max_width: usize,

    /// How deep a chain of redirecting welcomes is followed before giving up.
    #[serde(default = "default_max_redirect_hops")]
    pub max_redirect_hops: usize,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl TreeConfig {
    #[must_use]
    pub fn new(tree_width: usize, tree_max_width: usize) -> Self {
        Self {
            tree_width,
            tree_max_width,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    #[must_use]
    pub const fn with_max_redirect_hops(mut self, hops: usize) -> Self {
        self.max_redirect_hops = hops;
        self
    }

    /// Checks the invariants between the parameters and resolves the protocol
    /// name.
    pub fn validate(&self) -> Result<StreamProtocol, InvalidTreeConfig> {
        if self.tree_width == 0 {
            return Err(InvalidTreeConfig::ZeroWidth);
        }

        if self.tree_max_width < self.tree_width {
            return Err(InvalidTreeConfig::MaxBelowWidth {
                tree_width: self.tree_width,
                tree_max_width: self.tree_max_width,
            });
        }

        if self.max_redirect_hops == 0 {
            return Err(InvalidTreeConfig::ZeroHops);
        }

        if self.event_buffer == 0 {
            return Err(InvalidTreeConfig::ZeroEventBuffer);
        }

        StreamProtocol::try_from_owned(self.protocol.clone()).map_err(|err| {
            InvalidTreeConfig::Protocol {
                protocol: self.protocol.clone(),
                reason: err.to_string(),
            }
        })
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            tree_width: DEFAULT_TREE_WIDTH,
            tree_max_width: DEFAULT_TREE_MAX_WIDTH,
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[non_exhaustive]
pub enum InvalidTreeConfig {
    #[error("tree width must be at least 1")]
    ZeroWidth,
    #[error("tree max width {tree_max_width} is below tree width {tree_width}")]
    MaxBelowWidth {
        tree_width: usize,
        tree_max_width: usize,
    },
    #[error("redirect hop limit must be at least 1")]
    ZeroHops,
    #[error("event buffer must hold at least one event")]
    ZeroEventBuffer,
    #[error("invalid protocol name `{protocol}`: {reason}")]
    Protocol { protocol: String, reason: String },
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_owned()
}

const fn default_tree_width() -> usize {
    DEFAULT_TREE_WIDTH
}

const fn default_tree_max_width() -> usize {
    DEFAULT_TREE_MAX_WIDTH
}

const fn default_max_redirect_hops() -> usize {
    DEFAULT_MAX_REDIRECT_HOPS
}

const fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
