//! Duplex message channel over one WebSocket connection.
//!
//! A [`Channel`] owns two background tasks: a reader that decodes inbound
//! frames into an unbounded queue and a writer that drains outbound frames
//! into the socket. Closure is a [`CancellationToken`] that either side, or an
//! explicit [`Channel::close`], can trip. It is never reset.

mod codec;

pub use codec::WireFormat;

use crate::error::RelayError;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, Role};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Typed duplex channel: sends `S`, receives `R`.
///
/// Construction is the readiness point: [`Channel::accept`] and
/// [`Channel::connect`] return only after the WebSocket handshake completed,
/// and fail if the connection dies first.
pub struct Channel<S, R> {
    id: Uuid,
    format: WireFormat,
    outbound: mpsc::UnboundedSender<WsMessage>,
    inbound: Mutex<mpsc::UnboundedReceiver<R>>,
    closed: CancellationToken,
    _send: PhantomData<fn(S)>,
}

impl<S, R> Channel<S, R>
where
    S: Serialize,
    R: DeserializeOwned + Send + 'static,
{
    /// Wait for a pending HTTP upgrade and wrap the upgraded connection.
    ///
    /// Fails if the connection dies before the upgrade completes.
    pub async fn accept(upgrade: OnUpgrade, format: WireFormat) -> Result<Self, RelayError> {
        let upgraded = upgrade.await?;
        let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        Ok(Self::from_stream(ws, format))
    }

    /// Open a client channel to `url`.
    pub async fn connect(url: &str, format: WireFormat) -> Result<Self, RelayError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self::from_stream(ws, format))
    }

    /// Wrap an established WebSocket.
    pub fn from_stream<T>(ws: WebSocketStream<T>, format: WireFormat) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = Uuid::new_v4();
        let closed = CancellationToken::new();
        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(id, sink, out_rx, closed.clone()));
        tokio::spawn(read_loop(id, format, stream, in_tx, closed.clone()));

        Self {
            id,
            format,
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            closed,
            _send: PhantomData,
        }
    }

    /// Queue `message` for transmission.
    ///
    /// Never suspends. Fails with [`RelayError::ChannelClosed`] once the channel
    /// has closed, whatever the wire format.
    pub fn send(&self, message: &S) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        let frame = self.format.encode(message)?;
        self.outbound
            .send(frame)
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Next inbound message in arrival order, or `ChannelClosed`.
    ///
    /// Closure wins over a message that is already queued.
    pub async fn recv(&self) -> Result<R, RelayError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(RelayError::ChannelClosed),
            msg = inbound.recv() => msg.ok_or(RelayError::ChannelClosed),
        }
    }
}

impl<S, R> Channel<S, R> {
    /// Connection identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(connection_id = %self.id, "Closing channel");
        }
        self.closed.cancel();
    }

    /// Whether the connection is established. Always true for a constructed
    /// channel; pair with [`Channel::is_closed`] for liveness.
    pub fn is_ready(&self) -> bool {
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token tripped when the channel closes; pass it into any wait that
    /// depends on this channel.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Resolves once the channel has closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl<S, R> Drop for Channel<S, R> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn write_loop<Si>(
    id: Uuid,
    mut sink: Si,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    closed: CancellationToken,
) where
    Si: Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        // Frames queued before closure are still flushed.
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            _ = closed.cancelled() => None,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = sink.send(frame).await {
            debug!(connection_id = %id, error = %e, "WebSocket send failed");
            break;
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}

async fn read_loop<St, R>(
    id: Uuid,
    format: WireFormat,
    mut stream: St,
    inbound: mpsc::UnboundedSender<R>,
    closed: CancellationToken,
) where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    R: DeserializeOwned,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Close(reason))) => {
                debug!(connection_id = %id, ?reason, "Peer closed WebSocket");
                break;
            }
            Some(Ok(frame)) => match format.decode::<R>(frame) {
                Ok(Some(msg)) => {
                    if inbound.send(msg).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Dropping connection");
                    break;
                }
            },
            Some(Err(e)) => {
                debug!(connection_id = %id, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
    }
    closed.cancel();
}

/// Two channels joined by an in-memory socket.
#[cfg(test)]
pub(crate) async fn test_pair<A, B>(format: WireFormat) -> (Channel<A, B>, Channel<B, A>)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
{
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (
        Channel::from_stream(server, format),
        Channel::from_stream(client, format),
    )
}
