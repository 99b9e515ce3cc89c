use arbor_primitives::message::Message;
use bytes::{Bytes, BytesMut};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum CodecError {
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
    #[error("malformed envelope: {0}")]
    SerDe(serde_json::Error),
}

#[derive(Debug)]
pub(crate) struct MessageCodec {
    length_codec: LengthDelimitedCodec,
}

impl MessageCodec {
    pub(crate) fn new(max_message_size: usize) -> Self {
        Self {
            length_codec: LengthDelimitedCodec::builder()
                .max_frame_length(max_message_size)
                .new_codec(),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.length_codec.decode(src)? else {
            return Ok(None);
        };

        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(CodecError::SerDe)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(CodecError::SerDe)?;

        self.length_codec
            .encode(Bytes::from(json), dst)
            .map_err(CodecError::StdIo)
    }
}
