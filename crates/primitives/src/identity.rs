//! Textual encoding of peer identifiers as they appear in envelopes.

pub use libp2p_identity::PeerId;
use libp2p_identity::ParseError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("invalid peer identifier `{input}`")]
pub struct PeerIdError {
    input: String,
    #[source]
    source: ParseError,
}

impl PeerIdError {
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }
}

#[must_use]
pub fn encode(peer: &PeerId) -> String {
    peer.to_base58()
}

pub fn decode(input: &str) -> Result<PeerId, PeerIdError> {
    input.parse().map_err(|source| PeerIdError {
        input: input.to_owned(),
        source,
    })
}

/// Decodes every entry, failing on the first one that is not a peer id.
pub fn decode_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PeerId>, PeerIdError> {
    inputs.iter().map(|input| decode(input.as_ref())).collect()
}
