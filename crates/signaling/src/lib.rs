//! leinwand-signaling – Signaling-Relay
//!
//! Dieser Crate implementiert den Relay zwischen genau einem Broadcaster
//! und beliebig vielen Viewern. Der Relay vergibt Identitaeten und leitet
//! Verhandlungsnachrichten weiter, ohne sie zu interpretieren.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro WebSocket ein Task)
//!     |  Zulassung: Broadcaster | Viewer | Abgelehnt
//!     |
//!     v
//! MessageRouter (ein Schreiber zur Zeit)
//!     |
//!     +-- ConnectionRegistry (Broadcaster, angemeldete Verbindungen, Viewer)
//!     +-- VerbindungsHandle  (Send-Queue + Schliessen pro Verbindung)
//! ```

pub mod connection;
pub mod error;
pub mod registry;
pub mod router;
pub mod server_state;
pub mod tcp;
pub mod zugang;

// Bequeme Re-Exporte
pub use connection::ClientConnection;
pub use error::{SignalingError, SignalingResult};
pub use registry::{ConnectionRegistry, VerbindungsHandle};
pub use router::{Ablehnung, MessageRouter, VerbindungsKontext};
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
pub use zugang::{Netzbereich, Zugangsliste};
