//! leinwand-core – Gemeinsame Identitaetstypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Relay und Client
//! gemeinsam nutzen: Peer-Identifikatoren und Verbindungsrollen.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{PeerId, Rolle, SERVER_PEER_ID};
