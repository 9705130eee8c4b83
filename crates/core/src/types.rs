//! Identifikationstypen fuer Leinwand
//!
//! Peer-IDs verwenden das Newtype-Pattern. Der Inhalt ist fuer alle
//! Beteiligten opak; nur der Relay vergibt neue IDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reservierte ID des Broadcasters
pub const SERVER_PEER_ID: &str = "server";

/// Opaker Peer-Identifikator
///
/// Viewer-IDs werden vom Relay erzeugt und sind niemals gleich
/// [`SERVER_PEER_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Erzeugt eine neue, kollisionsfreie Viewer-ID
    pub fn neu() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Die reservierte ID des Broadcasters
    pub fn server() -> Self {
        Self(SERVER_PEER_ID.to_string())
    }

    /// Prueft ob dies die reservierte Broadcaster-ID ist
    pub fn ist_server(&self) -> bool {
        self.0 == SERVER_PEER_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rolle einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rolle {
    /// Socket akzeptiert, Rolle noch nicht festgelegt
    Unidentifiziert,
    /// Die einzige privilegierte Verbindung
    Broadcaster,
    /// Jede andere zugelassene Verbindung
    Viewer,
}

impl std::fmt::Display for Rolle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Rolle::Unidentifiziert => "unidentifiziert",
            Rolle::Broadcaster => "broadcaster",
            Rolle::Viewer => "viewer",
        };
        f.write_str(name)
    }
}
