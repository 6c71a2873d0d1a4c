//! Duplex line transport to the controller.
//!
//! The controller speaks one message per WebSocket text frame. Frames holding
//! several `\n`-separated lines are split so callers always see one line at a
//! time, in arrival order.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid controller url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect websocket {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("websocket send failed: {0}")]
    Send(String),
    #[error("websocket receive failed: {0}")]
    Receive(String),
    #[error("transport closed")]
    Closed,
}

#[async_trait]
pub trait LineSink: Send {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError>;
}

/// Source of inbound lines. `next_line` must be cancel safe: it is polled
/// inside `tokio::select!`.
#[async_trait]
pub trait LineSource: Send {
    /// `None` once the peer has closed the connection.
    async fn next_line(&mut self) -> Option<Result<String, TransportError>>;
}

/// Checks that `raw` is a `ws://` or `wss://` URL.
pub fn parse_controller_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw).map_err(|err| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}, expected ws or wss"),
        }),
    }
}

pub async fn connect_websocket(
    raw_url: &str,
) -> Result<(WsLineSink, WsLineSource), TransportError> {
    let url = parse_controller_url(raw_url)?;
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|source| TransportError::Connect {
            url: url.to_string(),
            source,
        })?;
    info!(url = %url, "transport: websocket connected");
    let (writer, reader) = ws_stream.split();
    Ok((
        WsLineSink { writer },
        WsLineSource {
            reader,
            buffered: VecDeque::new(),
        },
    ))
}

pub struct WsLineSink {
    writer: SplitSink<WsStream, Message>,
}

#[async_trait]
impl LineSink for WsLineSink {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer
            .send(Message::Text(line.to_string()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }
}

pub struct WsLineSource {
    reader: SplitStream<WsStream>,
    buffered: VecDeque<String>,
}

#[async_trait]
impl LineSource for WsLineSource {
    async fn next_line(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(line) = self.buffered.pop_front() {
                return Some(Ok(line));
            }
            let text = match self.reader.next().await? {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(error = %err, "transport: dropping non-utf8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
            };
            self.buffered.extend(text.lines().map(str::to_string));
        }
    }
}

/// Line sink backed by an in-process channel.
pub struct ChannelLineSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl LineSink for ChannelLineSink {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.tx
            .send(line.to_string())
            .map_err(|_| TransportError::Closed)
    }
}

/// Line source backed by an in-process channel.
pub struct ChannelLineSource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl LineSource for ChannelLineSource {
    async fn next_line(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// The far end of an in-process transport: what the session sent, and a way to
/// push inbound lines at it.
pub struct ChannelPeer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<String>,
}

pub fn channel_transport() -> (ChannelLineSink, ChannelLineSource, ChannelPeer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    (
        ChannelLineSink { tx: sent_tx },
        ChannelLineSource { rx: inbound_rx },
        ChannelPeer {
            sent: sent_rx,
            inbound: inbound_tx,
        },
    )
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
