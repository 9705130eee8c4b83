//! leinwand-client – Client-Session fuer Broadcaster und Viewer
//!
//! Die Session haelt die Verbindung zum Relay, fuehrt die Zustandsmaschine
//! und uebersetzt Signaling-Nachrichten in Aufrufe der Verhandlungsbruecke.
//! Peer-Engine und Medienaufnahme sind Traits und werden von aussen
//! eingesetzt.
//!
//! ## Architektur
//!
//! ```text
//! SessionHandle (Befehle, Status, Ereignisse)
//!     |
//!     v
//! ClientSession (ein Task)
//!     +-- Transport         (WebSocket zum Relay)
//!     +-- NegotiationBridge (PeerEngine + MedienQuelle)
//!     +-- Backoff           (Wartezeit bis zum Reconnect)
//! ```

pub mod backoff;
pub mod bridge;
pub mod error;
pub mod session;
pub mod transport;

pub use backoff::Backoff;
pub use bridge::{
    ist_angebot, KandidatenMelder, LokalesAngebot, MedienAnfrage, MedienQuelle, MedienStream,
    NegotiationBridge, PeerEngine, PeerHandle,
};
pub use error::{ClientError, ClientResult, NegotiationError};
pub use session::{
    session_starten, SessionEreignis, SessionHandle, SessionKonfiguration, SessionStatus,
};
pub use transport::{Transport, TransportVerbindung, WebSocketTransport};
