use core::fmt::{self, Debug, Formatter};
use core::pin::Pin;
use core::task::{Context, Poll};

use arbor_primitives::identity::PeerId;
use arbor_primitives::message::Message;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink as FuturesSink, SinkExt, Stream as FuturesStream, StreamExt, TryStreamExt};
use libp2p::{Stream as P2pStream, StreamProtocol};
use tokio::io::{duplex, AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::compat::FuturesAsyncReadCompatExt;

mod codec;

use codec::MessageCodec;
pub use codec::CodecError;

pub const MAX_MESSAGE_SIZE: usize = 8 * 1_024 * 1_024;

/// Capacity of each direction of an in-memory [`Stream::pair`].
pub const MEMORY_PIPE_CAPACITY: usize = 64 * 1_024;

pub const ARBOR_TREE_PROTOCOL: StreamProtocol = StreamProtocol::new("/arbor/tree/0.1.0");

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

type Transport = Framed<Box<dyn AsyncReadWrite>, MessageCodec>;

/// An ordered, bidirectional envelope stream to a single remote peer.
pub struct Stream {
    remote: PeerId,
    inner: Transport,
}

impl Stream {
    #[must_use]
    pub fn new(remote: PeerId, stream: P2pStream) -> Self {
        Self::from_io(remote, stream.compat())
    }

    #[must_use]
    pub fn from_io<T: AsyncReadWrite + 'static>(remote: PeerId, io: T) -> Self {
        let io: Box<dyn AsyncReadWrite> = Box::new(io);

        Self {
            remote,
            inner: Framed::new(io, MessageCodec::new(MAX_MESSAGE_SIZE)),
        }
    }

    /// Connected in-memory streams: the first is held by `local` and talks to
    /// `remote`, the second is held by `remote` and talks to `local`.
    #[must_use]
    pub fn pair(local: PeerId, remote: PeerId) -> (Self, Self) {
        let (local_io, remote_io) = duplex(MEMORY_PIPE_CAPACITY);

        (
            Self::from_io(remote, local_io),
            Self::from_io(local, remote_io),
        )
    }

    #[must_use]
    pub const fn remote_peer(&self) -> PeerId {
        self.remote
    }

    pub async fn send(&mut self, message: Message) -> Result<(), CodecError> {
        self.inner.send(message).await
    }

    /// `Ok(None)` signals a clean end of stream.
    pub async fn recv(&mut self) -> Result<Option<Message>, CodecError> {
        self.inner.try_next().await
    }

    pub async fn close(mut self) -> Result<(), CodecError> {
        SinkExt::close(&mut self.inner).await
    }

    /// Splits the stream so that one task can keep reading while another writes.
    #[must_use]
    pub fn split(self) -> (StreamSender, StreamReceiver) {
        let (sink, stream) = self.inner.split();

        (
            StreamSender {
                remote: self.remote,
                inner: sink,
            },
            StreamReceiver {
                remote: self.remote,
                inner: stream,
            },
        )
    }
}

impl Debug for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl FuturesStream for Stream {
    type Item = Result<Message, CodecError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl FuturesSink<Message> for Stream {
    type Error = CodecError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready_unpin(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.inner.start_send_unpin(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_flush_unpin(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_close_unpin(cx)
    }
}

/// Write half of a split [`Stream`].
pub struct StreamSender {
    remote: PeerId,
    inner: SplitSink<Transport, Message>,
}

impl StreamSender {
    #[must_use]
    pub const fn remote_peer(&self) -> PeerId {
        self.remote
    }

    pub async fn send(&mut self, message: Message) -> Result<(), CodecError> {
        self.inner.send(message).await
    }

    pub async fn close(mut self) -> Result<(), CodecError> {
        self.inner.close().await
    }
}

impl Debug for StreamSender {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSender")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Read half of a split [`Stream`].
pub struct StreamReceiver {
    remote: PeerId,
    inner: SplitStream<Transport>,
}

impl StreamReceiver {
    #[must_use]
    pub const fn remote_peer(&self) -> PeerId {
        self.remote
    }

    /// `Ok(None)` signals a clean end of stream.
    pub async fn recv(&mut self) -> Result<Option<Message>, CodecError> {
        self.inner.try_next().await
    }
}

impl Debug for StreamReceiver {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReceiver")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_connected_both_ways() {
        let (alice, bob) = (PeerId::random(), PeerId::random());
        let (mut alice_end, mut bob_end) = Stream::pair(alice, bob);

        assert_eq!(alice_end.remote_peer(), bob, "alice talks to bob");
        assert_eq!(bob_end.remote_peer(), alice, "bob talks to alice");

        alice_end.send(Message::join()).await.unwrap();
        assert_eq!(
            bob_end.recv().await.unwrap(),
            Some(Message::join()),
            "join reaches bob"
        );

        bob_end.send(Message::part()).await.unwrap();
        assert_eq!(
            alice_end.recv().await.unwrap(),
            Some(Message::part()),
            "part reaches alice"
        );
    }

    #[tokio::test]
    async fn test_close_is_end_of_stream() {
        let (alice_end, mut bob_end) = Stream::pair(PeerId::random(), PeerId::random());

        alice_end.close().await.unwrap();

        assert!(bob_end.recv().await.unwrap().is_none(), "close reads as EOF");
    }

    #[tokio::test]
    async fn test_split_halves_work_concurrently() {
        let (alice_end, mut bob_end) = Stream::pair(PeerId::random(), PeerId::random());
        let (mut sender, mut receiver) = alice_end.split();

        bob_end.send(Message::data(b"down".to_vec())).await.unwrap();
        sender.send(Message::data(b"up".to_vec())).await.unwrap();

        assert_eq!(
            receiver.recv().await.unwrap(),
            Some(Message::data(b"down".to_vec())),
            "read half sees bob's message"
        );
        assert_eq!(
            bob_end.recv().await.unwrap(),
            Some(Message::data(b"up".to_vec())),
            "write half reaches bob"
        );
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_fails() {
        let (mut alice_end, bob_end) = Stream::pair(PeerId::random(), PeerId::random());
        drop(bob_end);

        assert!(
            alice_end.send(Message::join()).await.is_err(),
            "writes to a vanished peer must fail"
        );
    }
}
