//! Control-Nachrichten des Signaling-Protokolls
//!
//! Definiert die OpCodes und die Payload-Strukturen, die ueber den
//! Umschlag (`wire::Envelope`) transportiert werden.
//!
//! ## Richtungen
//! ```text
//! hello              Relay  -> Client
//! join               Viewer -> Relay
//! client_message     Viewer -> Relay -> Broadcaster
//! server_message     Broadcaster -> Relay -> Viewer
//! client_disconnect  Relay  -> Broadcaster | Viewer -> Relay (freiwilliges Verlassen)
//! join_ack           Relay  -> Viewer
//! client_join        Relay  -> Broadcaster
//! join_reject        Relay  -> Viewer
//! ```

use leinwand_core::PeerId;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// OpCodes
// ---------------------------------------------------------------------------

/// Alle bekannten Nachrichtentypen
///
/// Die Wire-Namen stehen allein in `as_str`; Serde und `Display` nutzen sie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Hello,
    Join,
    ClientMessage,
    ServerMessage,
    ClientDisconnect,
    JoinAck,
    ClientJoin,
    /// Join wurde verworfen, weil kein Broadcaster angemeldet ist
    JoinReject,
}

impl OpCode {
    /// Alle OpCodes in Protokoll-Reihenfolge
    pub const ALLE: [OpCode; 8] = [
        OpCode::Hello,
        OpCode::Join,
        OpCode::ClientMessage,
        OpCode::ServerMessage,
        OpCode::ClientDisconnect,
        OpCode::JoinAck,
        OpCode::ClientJoin,
        OpCode::JoinReject,
    ];

    /// Wire-Name des OpCodes
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::Hello => "hello",
            OpCode::Join => "join",
            OpCode::ClientMessage => "client_message",
            OpCode::ServerMessage => "server_message",
            OpCode::ClientDisconnect => "client_disconnect",
            OpCode::JoinAck => "join_ack",
            OpCode::ClientJoin => "client_join",
            OpCode::JoinReject => "join_reject",
        }
    }

    /// Sucht den OpCode zu einem Wire-Namen
    pub fn aus_str(name: &str) -> Option<Self> {
        Self::ALLE.into_iter().find(|op| op.as_str() == name)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::aus_str(&name)
            .ok_or_else(|| de::Error::custom(format!("Unbekannter OpCode: {name}")))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `hello` – weist dem Client seine ID zu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloDaten {
    pub id: PeerId,
}

/// `client_join` / `client_disconnect` an den Broadcaster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDaten {
    pub peer: PeerId,
}

/// `join_reject` an den Viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRejectDaten {
    pub grund: String,
}

/// Das einzige Feld, das der Relay aus einer `server_message` liest
///
/// Alle weiteren Felder werden ignoriert und unveraendert weitergeleitet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerZiel {
    pub peer: PeerId,
}

/// Art einer Verhandlungsnachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalTyp {
    /// Netzwerk-Kandidat
    Ice,
    /// Session-Beschreibung (Angebot oder Antwort)
    Sdp,
}

/// Verhandlungsnachricht zwischen Viewer und Broadcaster
///
/// Wird nur von den Clients interpretiert. Der Relay ergaenzt bei
/// `client_message` lediglich `peer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerId>,
    #[serde(rename = "type")]
    pub typ: SignalTyp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Signal {
    /// Signal ohne Peer-Angabe (Viewer -> Relay)
    pub fn neu(typ: SignalTyp, data: serde_json::Value) -> Self {
        Self {
            peer: None,
            typ,
            data: Some(data),
        }
    }

    /// Signal an einen bestimmten Peer (Broadcaster -> Relay)
    pub fn an_peer(peer: PeerId, typ: SignalTyp, data: serde_json::Value) -> Self {
        Self {
            peer: Some(peer),
            typ,
            data: Some(data),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
