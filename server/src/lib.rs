//! leinwand-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::ServerConfig;
use leinwand_signaling::{SignalingServer, SignalingState};
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Prueft die Konfiguration und bindet den Listener
    pub async fn binden(&self) -> Result<SignalingServer> {
        let adresse = self.config.bind_adresse()?;
        let state = SignalingState::neu(self.config.signaling_config()?);
        SignalingServer::binden(Arc::clone(&state), adresse)
            .await
            .with_context(|| format!("Listener auf {adresse} konnte nicht gebunden werden"))
    }

    /// Startet den Relay und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Konfiguration pruefen, Listener binden
    /// 2. Verbindungen annehmen
    /// 3. Auf Ctrl-C warten, dann Listener und alle Verbindungen schliessen
    pub async fn starten(self) -> Result<()> {
        let relay = self.binden().await?;
        tracing::info!(
            adresse = %relay.lokale_adresse()?,
            broadcaster_pfad = %self.config.signaling.broadcaster_pfad,
            broadcaster_netze = ?self.config.signaling.broadcaster_netze,
            "Server startet"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay_task = tokio::spawn(relay.starten(shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        relay_task.await??;
        Ok(())
    }
}
