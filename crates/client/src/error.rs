//! Fehlertypen der Client-Session

use leinwand_protocol::{DecodeError, OpCode};
use thiserror::Error;

use crate::session::SessionStatus;

/// Fehler der Verhandlungsbruecke (Medien oder Peer-Engine)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// Der Benutzer hat den Medienzugriff verweigert
    #[error("Medienzugriff abgelehnt: {0}")]
    MedienAbgelehnt(String),

    /// Angebot, Antwort, Beschreibung oder Kandidat fehlgeschlagen
    #[error("Peer-Engine-Fehler: {0}")]
    Engine(String),
}

impl NegotiationError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }
}

/// Fehler der Client-Session
///
/// Nur `UngueltigerZustand` und `SessionBeendet` erreichen den Aufrufer.
/// Alle anderen fuehren intern zu einem Neustart der Session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Aktion im aktuellen Zustand nicht erlaubt (Fehlbedienung)
    #[error("{aktion} nicht moeglich im Status {status}")]
    UngueltigerZustand {
        aktion: &'static str,
        status: SessionStatus,
    },

    /// Verbindung zum Relay fehlgeschlagen oder verloren
    #[error("Transportfehler: {0}")]
    Transport(String),

    #[error("Dekodierfehler: {0}")]
    Decode(#[from] DecodeError),

    /// Nachricht im aktuellen Zustand oder in dieser Rolle nicht erwartet
    #[error("Unerwartete Nachricht: {0}")]
    UnerwarteteNachricht(OpCode),

    #[error("Verhandlungsfehler: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Der Session-Task laeuft nicht mehr
    #[error("Session beendet")]
    SessionBeendet,
}

impl ClientError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Result-Typ der Client-Session
pub type ClientResult<T> = Result<T, ClientError>;
