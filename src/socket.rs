//! Socket.IO v4 over WebSocket.
//!
//! Only the subset the tracking channel needs: the default namespace, event
//! packets without acks, and Engine.IO heartbeats.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use tracking::{Frame, PushSession, PushTransport};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Decoded Engine.IO/Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake with session parameters.
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect acknowledgement.
    Connect(Value),
    ConnectError(Value),
    Disconnect,
    Event(Frame),
    /// Valid packet the channel does not use, e.g. acks and binary events.
    Ignored,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine = chars.next().ok_or_else(|| anyhow!("empty packet"))?;
    let rest = chars.as_str();

    match engine {
        '0' => Ok(Packet::Open(serde_json::from_str(rest).context("decoding open packet")?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(rest),
        '5' | '6' => Ok(Packet::Noop),
        other => bail!("unknown engine packet type {other}"),
    }
}

fn decode_message(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| anyhow!("empty message packet"))?;
    // namespace prefix and ack id are not used on the default namespace
    let body = chars.as_str().trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => Ok(Packet::Connect(parse_optional(body)?)),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let items: Vec<Value> = serde_json::from_str(body).context("decoding event packet")?;
            let mut items = items.into_iter();
            let Some(Value::String(event)) = items.next() else {
                bail!("event packet without a name");
            };
            Ok(Packet::Event(Frame::new(event, items.next().unwrap_or(Value::Null))))
        }
        '4' => Ok(Packet::ConnectError(parse_optional(body)?)),
        '3' | '5' | '6' => Ok(Packet::Ignored),
        other => bail!("unknown socket packet type {other}"),
    }
}

fn parse_optional(body: &str) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).context("decoding packet payload")
}

/// Namespace connect, carrying the bearer token as auth payload.
#[must_use]
pub fn encode_connect(token: Option<&str>) -> String {
    token.map_or_else(|| "40".to_string(), |token| format!("40{}", json!({ "token": token })))
}

#[must_use]
pub fn encode_event(frame: &Frame) -> String {
    format!("42{}", json!([frame.event, frame.payload]))
}

/// WebSocket endpoint for a Socket.IO server base URL.
#[must_use]
pub fn endpoint(url: &str) -> String {
    let url = url.trim_end_matches('/');
    let url = url
        .strip_prefix("https://")
        .map(|rest| format!("wss://{rest}"))
        .or_else(|| url.strip_prefix("http://").map(|rest| format!("ws://{rest}")))
        .unwrap_or_else(|| url.to_string());
    format!("{url}/socket.io/?EIO=4&transport=websocket")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SocketIoTransport;

impl PushTransport for SocketIoTransport {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Box<dyn PushSession>> {
        let endpoint = endpoint(url);
        debug!(endpoint = %endpoint, "opening websocket");
        let (mut stream, _) = connect_async(endpoint.as_str()).await.context("websocket connect")?;

        match next_packet(&mut stream).await? {
            Packet::Open(handshake) => trace!(sid = %handshake["sid"], "engine open"),
            other => bail!("expected open packet, got {other:?}"),
        }

        stream.send(Message::Text(encode_connect(token))).await.context("sending connect")?;
        loop {
            match next_packet(&mut stream).await? {
                Packet::Connect(_) => break,
                Packet::ConnectError(reason) => bail!("connect rejected: {reason}"),
                Packet::Ping => {
                    stream.send(Message::Text("3".to_string())).await.context("sending pong")?;
                }
                _ => {}
            }
        }

        Ok(Box::new(SocketIoSession { stream }))
    }
}

async fn next_packet(stream: &mut Stream) -> Result<Packet> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return decode(&text),
            Some(Ok(Message::Close(_))) | None => bail!("websocket closed during handshake"),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err).context("websocket read"),
        }
    }
}

struct SocketIoSession {
    stream: Stream,
}

#[async_trait]
impl PushSession for SocketIoSession {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.stream.send(Message::Text(encode_event(&frame))).await.context("sending event")
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let text = match self.stream.next().await? {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(err).context("websocket read")),
            };

            match decode(&text) {
                Ok(Packet::Event(frame)) => return Some(Ok(frame)),
                Ok(Packet::Ping) => {
                    if let Err(err) = self.stream.send(Message::Text("3".to_string())).await {
                        return Some(Err(err).context("sending pong"));
                    }
                }
                Ok(Packet::Close | Packet::Disconnect) => return None,
                Ok(packet) => trace!(?packet, "ignoring packet"),
                Err(err) => debug!(error = %err, "undecodable packet"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.send(Message::Text("41".to_string())).await.context("sending disconnect")?;
        self.stream.close(None).await.context("closing websocket")
    }
}
