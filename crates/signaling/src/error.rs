//! Fehlertypen fuer den Signaling-Relay
//!
//! Kein Fehler verlaesst den Relay in Richtung Client. Alle Varianten
//! werden lokal geloggt und fuehren hoechstens zum Verwerfen einer
//! Nachricht oder zum Schliessen einer einzelnen Verbindung.

use leinwand_core::PeerId;
use leinwand_protocol::DecodeError;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Relay
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Nachricht nicht dekodierbar (ungueltiges JSON, unbekannter OpCode)
    #[error("Dekodierfehler: {0}")]
    Decode(#[from] DecodeError),

    /// Serialisierung einer ausgehenden Nachricht fehlgeschlagen
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    /// Nachricht in der aktuellen Rolle oder im aktuellen Zustand nicht erlaubt
    #[error("Protokollverletzung: {0}")]
    Protokoll(String),

    /// Ziel-Peer ist nicht als Viewer angemeldet
    #[error("Unbekannter Peer: {0}")]
    UnbekannterPeer(PeerId),

    /// Kein Broadcaster angemeldet
    #[error("Kein Broadcaster angemeldet")]
    KeinBroadcaster,

    /// WebSocket-Handshake oder -Frame fehlerhaft
    #[error("WebSocket-Fehler: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Send-Queue einer Verbindung voll oder geschlossen
    #[error("Senden an {0} fehlgeschlagen")]
    SendFehler(PeerId),

    /// Ungueltige Konfiguration (z.B. Netzbereich)
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl SignalingError {
    /// Erstellt eine Protokollverletzung
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Relay
pub type SignalingResult<T> = Result<T, SignalingError>;
