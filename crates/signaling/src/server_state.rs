//! Gemeinsamer Zustand des Signaling-Relays
//!
//! Wird als `Arc` zwischen dem Listener und allen Verbindungs-Tasks geteilt.

use std::sync::Arc;
use std::time::Instant;

use crate::router::MessageRouter;
use crate::zugang::Zugangsliste;

/// Konfiguration fuer den Signaling-Relay
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Pfad, auf dem sich der Broadcaster verbindet
    pub broadcaster_pfad: String,
    /// Erlaubte Netze fuer den Broadcaster (leer = alle)
    pub broadcaster_zugang: Zugangsliste,
    /// Groesse der Send-Queue pro Verbindung
    pub sende_queue_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            broadcaster_pfad: "/_server".to_string(),
            broadcaster_zugang: Zugangsliste::default(),
            sende_queue_groesse: 64,
        }
    }
}

/// Gemeinsamer Relay-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Routing-Engine inkl. Registry
    pub router: MessageRouter,
    /// Startzeitpunkt (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    pub fn neu(config: SignalingConfig) -> Arc<Self> {
        let config = Arc::new(config);
        Arc::new(Self {
            router: MessageRouter::neu(Arc::clone(&config)),
            config,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
