//! Verhandlungsbruecke – Adapter zu Peer-Engine und Medienquelle
//!
//! Die eigentliche Peer-Verbindung und die Medienaufnahme liegen ausserhalb
//! dieses Crates. Die Session spricht sie nur ueber die Traits hier an.
//!
//! ## Ablauf (Viewer)
//! ```text
//! peer_erstellen -> angebot_vorbereiten (erfassen, Tracks, Angebot)
//!                -> remote_anwenden (Antwort des Broadcasters)
//!                -> kandidat_anwenden (beliebig oft, ungeordnet)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use leinwand_core::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::NegotiationError;

// ---------------------------------------------------------------------------
// Kollaborateure
// ---------------------------------------------------------------------------

/// Welche Medien erfasst werden sollen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedienAnfrage {
    pub video: bool,
    pub audio: bool,
}

impl Default for MedienAnfrage {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Ein erfasster lokaler Medienstrom
#[async_trait]
pub trait MedienStream: Send + Sync {
    fn id(&self) -> String;

    /// Beendet alle Tracks des Stroms
    fn stoppen(&self);

    /// Kehrt zurueck, sobald die Aufnahme endet (z.B. Freigabe beendet)
    async fn beendet(&self);
}

/// Lokale Medienaufnahme
#[async_trait]
pub trait MedienQuelle: Send + Sync {
    /// Darf vom Benutzer abgelehnt werden (`NegotiationError::MedienAbgelehnt`)
    async fn erfassen(&self, anfrage: &MedienAnfrage)
        -> Result<Arc<dyn MedienStream>, NegotiationError>;
}

/// Eine einzelne Peer-Verbindung der Engine
///
/// Beschreibungen und Kandidaten sind opakes JSON.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn tracks_hinzufuegen(&self, stream: Arc<dyn MedienStream>)
        -> Result<(), NegotiationError>;

    /// Erstellt ein Angebot und setzt es als lokale Beschreibung
    async fn angebot_erstellen(&self) -> Result<Value, NegotiationError>;

    /// Erstellt eine Antwort und setzt sie als lokale Beschreibung
    async fn antwort_erstellen(&self) -> Result<Value, NegotiationError>;

    async fn remote_beschreibung_setzen(&self, beschreibung: Value)
        -> Result<(), NegotiationError>;

    async fn kandidat_hinzufuegen(&self, kandidat: Value) -> Result<(), NegotiationError>;

    fn schliessen(&self);
}

/// Erzeugt Peer-Verbindungen
pub trait PeerEngine: Send + Sync {
    /// Lokal gefundene Kandidaten meldet die Engine ueber `melder`
    fn peer_erstellen(&self, melder: KandidatenMelder)
        -> Result<Arc<dyn PeerHandle>, NegotiationError>;
}

// ---------------------------------------------------------------------------
// KandidatenMelder
// ---------------------------------------------------------------------------

/// Lokal gefundener Kandidat auf dem Weg zur Session
#[derive(Debug, Clone)]
pub(crate) struct LokalerKandidat {
    pub epoche: u64,
    pub peer: Option<PeerId>,
    pub peer_nr: u64,
    pub kandidat: Option<Value>,
}

/// Rueckkanal der Engine fuer lokal gefundene Kandidaten
///
/// Jeder Melder gehoert zu genau einer Peer-Verbindung. Meldungen einer
/// bereits abgebauten Verbindung verwirft die Session.
#[derive(Debug, Clone)]
pub struct KandidatenMelder {
    epoche: u64,
    peer: Option<PeerId>,
    peer_nr: u64,
    tx: mpsc::UnboundedSender<LokalerKandidat>,
}

impl KandidatenMelder {
    pub(crate) fn neu(
        epoche: u64,
        peer: Option<PeerId>,
        peer_nr: u64,
        tx: mpsc::UnboundedSender<LokalerKandidat>,
    ) -> Self {
        Self {
            epoche,
            peer,
            peer_nr,
            tx,
        }
    }

    /// Meldet einen Kandidaten; `None` bedeutet Ende der Kandidaten
    ///
    /// Gibt `false` zurueck wenn die Session nicht mehr laeuft.
    pub fn melden(&self, kandidat: Option<Value>) -> bool {
        self.tx
            .send(LokalerKandidat {
                epoche: self.epoche,
                peer: self.peer.clone(),
                peer_nr: self.peer_nr,
                kandidat,
            })
            .is_ok()
    }

    /// Fuer welchen Viewer die Verbindung besteht (nur beim Broadcaster gesetzt)
    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }
}

// ---------------------------------------------------------------------------
// NegotiationBridge
// ---------------------------------------------------------------------------

/// Ergebnis von `angebot_vorbereiten`
pub struct LokalesAngebot {
    pub stream: Arc<dyn MedienStream>,
    pub angebot: Value,
}

/// Stoppt einen Strom beim Drop, solange er nicht uebergeben wurde
///
/// Greift auch wenn die Vorbereitung mittendrin abgebrochen wird.
struct StreamWaechter(Option<Arc<dyn MedienStream>>);

impl StreamWaechter {
    fn entschaerfen(mut self) {
        self.0 = None;
    }
}

impl Drop for StreamWaechter {
    fn drop(&mut self) {
        if let Some(stream) = self.0.take() {
            tracing::debug!(stream = %stream.id(), "Nicht uebergebener Medienstrom gestoppt");
            stream.stoppen();
        }
    }
}

/// Prueft ob eine Session-Beschreibung ein Angebot ist (`{"type":"offer",...}`)
pub fn ist_angebot(beschreibung: &Value) -> bool {
    beschreibung.get("type").and_then(Value::as_str) == Some("offer")
}

/// Duenner Adapter zwischen Session und Kollaborateuren
#[derive(Clone)]
pub struct NegotiationBridge {
    engine: Arc<dyn PeerEngine>,
    medien: Arc<dyn MedienQuelle>,
}

impl NegotiationBridge {
    pub fn neu(engine: Arc<dyn PeerEngine>, medien: Arc<dyn MedienQuelle>) -> Self {
        Self { engine, medien }
    }

    pub fn peer_erstellen(
        &self,
        melder: KandidatenMelder,
    ) -> Result<Arc<dyn PeerHandle>, NegotiationError> {
        self.engine.peer_erstellen(melder)
    }

    /// Erfasst lokale Medien, fuegt die Tracks hinzu und erstellt das Angebot
    ///
    /// Schlaegt ein Schritt nach dem Erfassen fehl, wird der Strom gestoppt.
    pub async fn angebot_vorbereiten(
        &self,
        peer: &Arc<dyn PeerHandle>,
        anfrage: &MedienAnfrage,
    ) -> Result<LokalesAngebot, NegotiationError> {
        let stream = self.medien.erfassen(anfrage).await?;
        tracing::debug!(stream = %stream.id(), "Lokaler Medienstrom erfasst");
        let waechter = StreamWaechter(Some(Arc::clone(&stream)));

        peer.tracks_hinzufuegen(Arc::clone(&stream)).await?;
        let angebot = peer.angebot_erstellen().await?;

        waechter.entschaerfen();
        Ok(LokalesAngebot { stream, angebot })
    }

    /// Setzt die Remote-Beschreibung; bei einem Angebot wird die Antwort erzeugt
    pub async fn remote_anwenden(
        &self,
        peer: &Arc<dyn PeerHandle>,
        beschreibung: Value,
    ) -> Result<Option<Value>, NegotiationError> {
        let angebot = ist_angebot(&beschreibung);
        peer.remote_beschreibung_setzen(beschreibung).await?;
        if angebot {
            Ok(Some(peer.antwort_erstellen().await?))
        } else {
            Ok(None)
        }
    }

    pub async fn kandidat_anwenden(
        &self,
        peer: &Arc<dyn PeerHandle>,
        kandidat: Value,
    ) -> Result<(), NegotiationError> {
        peer.kandidat_hinzufuegen(kandidat).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
