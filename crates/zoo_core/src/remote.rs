//! Cross-board messages and the transport they travel on.
//!
//! A board whose neighbor lies on another board sends an `Evolve` request
//! carrying the source's state, and later receives a `Return` with the
//! source's new state. Sends are fire-and-forget; replies arrive on the
//! board's inbound queue and are fenced by the write counter recorded when
//! the request went out.

use super::topology::{Direction, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A cell on another board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteCellCoord {
    pub address: String,
    pub point: Point,
}

impl RemoteCellCoord {
    pub fn new(address: &str, point: Point) -> Self {
        Self {
            address: address.to_string(),
            point,
        }
    }
}

/// Messages exchanged between boards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    /// Ask the receiving board to transform `target` as the neighbor of a
    /// source in state `source_state`.
    Evolve {
        target: Point,
        source_state: String,
        dir: Direction,
        energy_barrier: f64,
        source: Point,
        return_addr: String,
        write_count: u64,
    },
    /// The source's state after an `Evolve` was handled.
    Return {
        source: Point,
        new_state: String,
        write_count: u64,
        energy: f64,
    },
}

impl RemoteMessage {
    pub fn to_json(&self) -> RemoteResult<String> {
        serde_json::to_string(self).map_err(|e| RemoteError::Encode(e.to_string()))
    }

    pub fn from_json(text: &str) -> RemoteResult<Self> {
        serde_json::from_str(text).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

/// Errors from encoding, decoding or delivering remote messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Encode(String),
    Decode(String),
    /// No route to the address
    UnknownAddress(String),
    /// The receiving end is gone
    Disconnected(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Encode(e) => write!(f, "encode error: {}", e),
            RemoteError::Decode(e) => write!(f, "decode error: {}", e),
            RemoteError::UnknownAddress(a) => write!(f, "unknown address '{}'", a),
            RemoteError::Disconnected(a) => write!(f, "'{}' disconnected", a),
        }
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Outbound side of the remote link.
pub trait RemoteTransport: Send {
    /// Queue a message for `address` without waiting for it.
    fn send(&self, address: &str, message: RemoteMessage) -> RemoteResult<()>;
}

/// In-process transport routing messages onto per-board channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelTransport {
    routes: HashMap<String, async_channel::Sender<RemoteMessage>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unbounded inbound queue for `address` and route to it.
    pub fn register(&mut self, address: &str) -> async_channel::Receiver<RemoteMessage> {
        let (tx, rx) = async_channel::unbounded();
        self.routes.insert(address.to_string(), tx);
        rx
    }
}

impl RemoteTransport for ChannelTransport {
    fn send(&self, address: &str, message: RemoteMessage) -> RemoteResult<()> {
        let tx = self
            .routes
            .get(address)
            .ok_or_else(|| RemoteError::UnknownAddress(address.to_string()))?;
        tx.try_send(message)
            .map_err(|_| RemoteError::Disconnected(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let msg = RemoteMessage::Return {
            source: Point::new(3, 4),
            new_state: "sand".into(),
            write_count: 9,
            energy: -0.5,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"return""#), "{}", json);
        assert_eq!(RemoteMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_garbled_json_is_a_decode_error() {
        assert!(matches!(
            RemoteMessage::from_json(r#"{"type": "teleport"}"#),
            Err(RemoteError::Decode(_))
        ));
        assert!(matches!(RemoteMessage::from_json("}{"), Err(RemoteError::Decode(_))));
    }

    #[test]
    fn test_channel_transport_routes() {
        let mut transport = ChannelTransport::new();
        let rx = transport.register("east");
        let msg = RemoteMessage::Return {
            source: Point::new(0, 0),
            new_state: "_".into(),
            write_count: 0,
            energy: 0.0,
        };
        transport.send("east", msg.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), msg);

        assert_eq!(
            transport.send("west", msg.clone()),
            Err(RemoteError::UnknownAddress("west".into()))
        );
        drop(rx);
        assert_eq!(
            transport.send("east", msg),
            Err(RemoteError::Disconnected("east".into()))
        );
    }
}
