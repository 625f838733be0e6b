//! Text-frame codec for the realtime channel: Engine.IO v4 transport packets
//! carrying Socket.IO v5 packets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const DEFAULT_NAMESPACE: &str = "/";
pub const ENGINE_PROTOCOL: &str = "4";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,
    #[error("frame exceeds max size: {size} > {limit}")]
    OversizedFrame { size: usize, limit: usize },
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("invalid packet json: {0}")]
    InvalidJson(String),
    #[error("event packet without a name")]
    MissingEventName,
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Handshake payload of the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenPayload),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn event(name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    fn encode(&self) -> String {
        let (kind, namespace) = match self {
            SocketPacket::Connect { namespace, .. } => ('0', namespace),
            SocketPacket::Disconnect { namespace } => ('1', namespace),
            SocketPacket::Event { namespace, .. } => ('2', namespace),
            SocketPacket::Ack { namespace, .. } => ('3', namespace),
            SocketPacket::ConnectError { namespace, .. } => ('4', namespace),
        };
        let mut out = String::new();
        out.push(kind);
        let has_namespace = namespace != DEFAULT_NAMESPACE && !namespace.is_empty();
        if has_namespace {
            out.push_str(namespace);
        }
        let body = match self {
            SocketPacket::Connect { data, .. } | SocketPacket::ConnectError { data, .. } => {
                data.as_ref().map(Value::to_string)
            }
            SocketPacket::Disconnect { .. } => None,
            SocketPacket::Event {
                ack_id, name, args, ..
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let ack = ack_id.map(|id| id.to_string()).unwrap_or_default();
                Some(format!("{ack}{}", Value::Array(items)))
            }
            SocketPacket::Ack { ack_id, args, .. } => {
                Some(format!("{ack_id}{}", Value::Array(args.clone())))
            }
        };
        if let Some(body) = body {
            if has_namespace {
                out.push(',');
            }
            out.push_str(&body);
        }
        out
    }
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(payload) => {
                format!("0{}", serde_json::to_string(payload).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

pub fn decode_frame(frame: &str) -> Result<EnginePacket, PacketError> {
    decode_frame_with_limit(frame, DEFAULT_MAX_FRAME_BYTES)
}

pub fn decode_frame_with_limit(frame: &str, limit: usize) -> Result<EnginePacket, PacketError> {
    if frame.len() > limit {
        return Err(PacketError::OversizedFrame {
            size: frame.len(),
            limit,
        });
    }
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();
    let data = || {
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    };
    match kind {
        '0' => serde_json::from_str::<OpenPayload>(rest)
            .map(EnginePacket::Open)
            .map_err(|err| PacketError::InvalidJson(err.to_string())),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(data())),
        '3' => Ok(EnginePacket::Pong(data())),
        '4' => decode_socket_packet(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(PacketError::UnknownEngineType(other)),
    }
}

fn decode_socket_packet(raw: &str) -> Result<SocketPacket, PacketError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        let namespace = rest[..end].to_string();
        rest = rest.get(end + 1..).unwrap_or_default();
        namespace
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let ack_id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    rest = &rest[digits..];

    let payload = if rest.trim().is_empty() {
        None
    } else {
        Some(
            serde_json::from_str::<Value>(rest)
                .map_err(|err| PacketError::InvalidJson(err.to_string()))?,
        )
    };

    match kind {
        '0' => Ok(SocketPacket::Connect {
            namespace,
            data: payload,
        }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let Some(Value::Array(mut items)) = payload else {
                return Err(PacketError::MissingEventName);
            };
            if items.is_empty() {
                return Err(PacketError::MissingEventName);
            }
            let Value::String(name) = items.remove(0) else {
                return Err(PacketError::MissingEventName);
            };
            Ok(SocketPacket::Event {
                namespace,
                ack_id,
                name,
                args: items,
            })
        }
        '3' => {
            let args = match payload {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            Ok(SocketPacket::Ack {
                namespace,
                ack_id: ack_id.unwrap_or_default(),
                args,
            })
        }
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            data: payload,
        }),
        other => Err(PacketError::UnknownSocketType(other)),
    }
}

/// Resolve the WebSocket transport URL for an HTTP(S) base endpoint.
pub fn websocket_url(endpoint: &str, path: &str) -> Result<Url, PacketError> {
    let invalid = |reason: &str| PacketError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(endpoint.trim()).map_err(|err| invalid(&err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("unsupported scheme")),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("unsupported scheme"))?;

    let trimmed = path.trim().trim_matches('/');
    let full_path = if trimmed.is_empty() {
        "/socket.io/".to_string()
    } else {
        format!("/{trimmed}/")
    };
    url.set_path(&full_path);
    url.set_query(Some(&format!("EIO={ENGINE_PROTOCOL}&transport=websocket")));
    url.set_fragment(None);
    Ok(url)
}
