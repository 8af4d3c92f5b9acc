//! Plain TCP transport, framed by a [`Codec`].

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::SinkExt;
use murmur_protocol::{Codec, Message};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// A TCP [`Transport`] that hands out [`TcpConnection`]s speaking codec `C`.
pub struct TcpTransport<C: Codec> {
    listener: TcpListener,
    _codec: PhantomData<fn() -> C>,
}

impl<C: Codec> TcpTransport<C> {
    /// Binds a new listener to the given address.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Ok(local) = listener.local_addr() {
            tracing::info!(%local, protocol = %C::KIND, "TCP transport listening");
        }
        Ok(Self {
            listener,
            _codec: PhantomData,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

impl<C: Codec> Transport for TcpTransport<C> {
    type Connection = TcpConnection<C>;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        let conn = TcpConnection::from_stream(stream, peer);
        tracing::debug!(id = %conn.id(), %peer, "accepted TCP connection");
        Ok(conn)
    }

    async fn shutdown(self) -> Result<(), Self::Error> {
        tracing::info!("TCP transport shutting down");
        drop(self.listener);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TcpConnection
// ---------------------------------------------------------------------------

/// One framed TCP connection.
///
/// The socket is split so reads and writes never wait on each other. Each
/// half sits behind its own mutex: the write mutex is the connection's send
/// lock, so two tasks sending at once produce two whole frames one after the
/// other, never interleaved bytes.
pub struct TcpConnection<C: Codec> {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<FrameReader<C>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, C>>,
}

impl<C: Codec> TcpConnection<C> {
    /// Opens an outgoing connection (the client side).
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionLost(format!("connect failed: {e}")))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        Ok(Self::from_stream(stream, peer))
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        // Chat frames are small and latency matters more than batching.
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            peer,
            reader: Mutex::new(FrameReader::new(read_half, C::default())),
            writer: Mutex::new(FramedWrite::new(write_half, C::default())),
        }
    }

    /// The remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Binds a session identifier into the outgoing codec.
    ///
    /// Only the write half is touched: the read half learns the identifier
    /// by itself when it decodes `LoginSuccess`, and its lock may be held by
    /// a pending read.
    pub async fn bind_session(&self, session_id: &str) {
        self.writer.lock().await.encoder_mut().bind_session(session_id);
    }

    /// [`send`](Connection::send) with a deadline.
    pub async fn send_within(
        &self,
        message: Message,
        limit: Duration,
    ) -> Result<(), TransportError> {
        tokio::time::timeout(limit, self.send(message))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }

    /// [`recv`](Connection::recv) with a deadline.
    pub async fn recv_within(
        &self,
        limit: Duration,
    ) -> Result<Option<Message>, TransportError> {
        tokio::time::timeout(limit, self.recv())
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }
}

impl<C: Codec> Connection for TcpConnection<C> {
    type Error = TransportError;

    async fn send(&self, message: Message) -> Result<(), Self::Error> {
        let mut writer = self.writer.lock().await;
        writer
            .send(message)
            .await
            .map_err(TransportError::from_write)
    }

    async fn recv(&self) -> Result<Option<Message>, Self::Error> {
        self.reader.lock().await.next_message().await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let mut writer = self.writer.lock().await;
        SinkExt::<Message>::close(&mut *writer)
            .await
            .map_err(TransportError::from_write)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// FrameReader
// ---------------------------------------------------------------------------

/// Pulls decoded messages off the read half.
///
/// Unlike `FramedRead`, a decode error does not end the stream: after an
/// unsupported-but-well-framed message the next call picks up at the
/// following frame. Whether to keep reading is the caller's decision.
struct FrameReader<C> {
    half: OwnedReadHalf,
    buffer: BytesMut,
    codec: C,
    eof: bool,
}

impl<C: Codec> FrameReader<C> {
    fn new(half: OwnedReadHalf, codec: C) -> Self {
        Self {
            half,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            codec,
            eof: false,
        }
    }

    async fn next_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            if self.eof {
                return self
                    .codec
                    .decode_eof(&mut self.buffer)
                    .map_err(TransportError::from_read);
            }
            if let Some(message) = self
                .codec
                .decode(&mut self.buffer)
                .map_err(TransportError::from_read)?
            {
                return Ok(Some(message));
            }

            let read = self
                .half
                .read_buf(&mut self.buffer)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if read == 0 {
                self.eof = true;
            }
        }
    }
}
