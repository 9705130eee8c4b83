//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use std::net::SocketAddr;

use anyhow::Context;
use leinwand_signaling::{SignalingConfig, Zugangsliste};
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Einstellungen
    pub signaling: SignalingEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den WebSocket-Listener
    pub bind_adresse: String,
    /// Port fuer Broadcaster und Viewer
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// WebSocket-Pfad des Broadcasters
    pub broadcaster_pfad: String,
    /// Netze, aus denen sich der Broadcaster verbinden darf (CIDR, leer = alle)
    pub broadcaster_netze: Vec<String>,
    /// Send-Queue pro Verbindung
    pub sende_queue_groesse: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
            broadcaster_pfad: "/_server".into(),
            broadcaster_netze: vec![],
            sende_queue_groesse: 64,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse des Listeners zurueck
    pub fn bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{adresse}'"))
    }

    /// Baut die Relay-Konfiguration; ungueltige Netze sind ein Startfehler
    pub fn signaling_config(&self) -> anyhow::Result<SignalingConfig> {
        if !self.signaling.broadcaster_pfad.starts_with('/') {
            anyhow::bail!(
                "broadcaster_pfad muss mit '/' beginnen: '{}'",
                self.signaling.broadcaster_pfad
            );
        }
        if self.signaling.sende_queue_groesse == 0 {
            anyhow::bail!("sende_queue_groesse muss groesser als 0 sein");
        }

        let zugang = Zugangsliste::parsen(&self.signaling.broadcaster_netze)
            .context("Ungueltiger Eintrag in broadcaster_netze")?;

        Ok(SignalingConfig {
            broadcaster_pfad: self.signaling.broadcaster_pfad.clone(),
            broadcaster_zugang: zugang,
            sende_queue_groesse: self.signaling.sende_queue_groesse,
        })
    }
}
