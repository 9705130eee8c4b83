//! Message-Router – Zulassung und Weiterleitung
//!
//! Jede Operation laeuft vollstaendig unter dem Registry-Mutex
//! (Lesen, Aendern, Einreihen). Einreihen ist nicht-blockierend, der Lock
//! wird also nie ueber einen await-Punkt gehalten.
//!
//! ## Regeln
//! ```text
//! join               Viewer      -> join_ack an Viewer, client_join an Broadcaster
//! client_message     Viewer      -> an Broadcaster, `peer` wird vom Relay gesetzt
//! server_message     Broadcaster -> unveraendert an data.peer
//! client_disconnect  Viewer      -> freiwilliges Verlassen, Broadcaster wird informiert
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use leinwand_core::{PeerId, Rolle};
use leinwand_protocol::{
    Envelope, HelloDaten, JoinRejectDaten, OpCode, PeerDaten, PeerZiel,
};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{SignalingError, SignalingResult};
use crate::registry::{ConnectionRegistry, VerbindungsHandle};
use crate::server_state::SignalingConfig;

// ---------------------------------------------------------------------------
// Kontext / Ablehnung
// ---------------------------------------------------------------------------

/// Identitaet einer zugelassenen Verbindung
///
/// Wird vom Verbindungs-Task gehalten und bei jeder Nachricht mitgegeben.
#[derive(Debug, Clone)]
pub struct VerbindungsKontext {
    pub peer_id: PeerId,
    pub rolle: Rolle,
    pub remote: SocketAddr,
    pub nr: u64,
    /// Eigener Sendeweg, unabhaengig vom Eintrag in der Registry
    pub handle: VerbindungsHandle,
}

/// Grund fuer das Abweisen einer neuen Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Ablehnung {
    #[error("Broadcaster bereits angemeldet")]
    BroadcasterAktiv,
    #[error("Netz fuer Broadcaster nicht erlaubt")]
    NetzNichtErlaubt,
    #[error("Kein Broadcaster angemeldet")]
    KeinBroadcaster,
}

// ---------------------------------------------------------------------------
// MessageRouter
// ---------------------------------------------------------------------------

/// Routing-Engine eines Relays
///
/// Besitzt die `ConnectionRegistry`. Mehrere Router sind voneinander
/// unabhaengig (z.B. in Tests).
pub struct MessageRouter {
    config: Arc<SignalingConfig>,
    registry: Mutex<ConnectionRegistry>,
    naechste_nr: AtomicU64,
}

impl MessageRouter {
    pub fn neu(config: Arc<SignalingConfig>) -> Self {
        Self {
            config,
            registry: Mutex::new(ConnectionRegistry::neu()),
            naechste_nr: AtomicU64::new(1),
        }
    }

    /// Entscheidet ueber die Rolle einer neuen Verbindung
    ///
    /// Bei Erfolg ist `hello` bereits in die Send-Queue eingereiht.
    pub fn zulassen(
        &self,
        pfad: &str,
        remote: SocketAddr,
        tx: mpsc::Sender<String>,
        token: CancellationToken,
    ) -> Result<VerbindungsKontext, Ablehnung> {
        let nr = self.naechste_nr.fetch_add(1, Ordering::Relaxed);
        let mut reg = self.registry.lock();

        let (peer_id, rolle, handle) = if pfad == self.config.broadcaster_pfad {
            if reg.hat_broadcaster() {
                tracing::warn!(remote = %remote, "Zweiter Broadcaster abgewiesen");
                return Err(Ablehnung::BroadcasterAktiv);
            }
            if !self.config.broadcaster_zugang.erlaubt(remote.ip()) {
                tracing::warn!(remote = %remote, "Broadcaster aus nicht erlaubtem Netz abgewiesen");
                return Err(Ablehnung::NetzNichtErlaubt);
            }
            let handle = VerbindungsHandle::neu(PeerId::server(), nr, tx, token);
            reg.broadcaster_setzen(handle.clone());
            tracing::info!(remote = %remote, "Broadcaster angemeldet");
            (PeerId::server(), Rolle::Broadcaster, handle)
        } else {
            if !reg.hat_broadcaster() {
                tracing::debug!(remote = %remote, "Verbindung ohne Broadcaster abgewiesen");
                return Err(Ablehnung::KeinBroadcaster);
            }
            let mut peer_id = PeerId::neu();
            while reg.ist_angemeldet(&peer_id) {
                peer_id = PeerId::neu();
            }
            let handle = VerbindungsHandle::neu(peer_id.clone(), nr, tx, token);
            reg.anmelden(handle.clone());
            tracing::debug!(remote = %remote, peer = %peer_id, "Viewer-Verbindung zugelassen");
            (peer_id, Rolle::Viewer, handle)
        };

        match Envelope::mit_daten(OpCode::Hello, &HelloDaten { id: peer_id.clone() }) {
            Ok(hello) => {
                handle.senden(&hello);
            }
            Err(e) => tracing::error!(fehler = %e, "Hello konnte nicht kodiert werden"),
        }

        Ok(VerbindungsKontext {
            peer_id,
            rolle,
            remote,
            nr,
            handle,
        })
    }

    /// Verarbeitet einen eingehenden Text-Frame
    ///
    /// Fehler werden nur geloggt; die Verbindung bleibt bestehen.
    pub fn verarbeiten(&self, ctx: &VerbindungsKontext, text: &str) {
        if let Err(e) = self.route(ctx, text) {
            match e {
                SignalingError::UnbekannterPeer(_) | SignalingError::SendFehler(_) => {
                    tracing::debug!(peer = %ctx.peer_id, fehler = %e, "Nachricht verworfen");
                }
                SignalingError::KeinBroadcaster => {
                    tracing::info!(peer = %ctx.peer_id, "Join ohne Broadcaster abgelehnt");
                }
                _ => {
                    tracing::warn!(peer = %ctx.peer_id, fehler = %e, "Nachricht verworfen");
                }
            }
        }
    }

    /// Raeumt nach dem Ende einer Verbindung auf
    pub fn getrennt(&self, ctx: &VerbindungsKontext) {
        let mut reg = self.registry.lock();

        match ctx.rolle {
            Rolle::Broadcaster => {
                if reg.broadcaster_entfernen(ctx.nr).is_none() {
                    return;
                }
                let verbindungen = reg.leeren();
                for handle in &verbindungen {
                    handle.schliessen();
                }
                tracing::info!(
                    geschlossen = verbindungen.len(),
                    "Broadcaster getrennt – alle Viewer-Verbindungen geschlossen"
                );
            }
            Rolle::Viewer => {
                if reg.abmelden(&ctx.peer_id) {
                    Self::trennung_melden(&reg, &ctx.peer_id);
                    tracing::info!(peer = %ctx.peer_id, "Viewer hat die Uebertragung verlassen");
                }
            }
            Rolle::Unidentifiziert => {}
        }
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn hat_broadcaster(&self) -> bool {
        self.registry.lock().hat_broadcaster()
    }

    /// Sortierte IDs aller beigetretenen Viewer
    pub fn viewer_ids(&self) -> Vec<PeerId> {
        self.registry.lock().viewer_ids()
    }

    pub fn verbindungs_anzahl(&self) -> usize {
        self.registry.lock().verbindungs_anzahl()
    }

    /// Verbindungsnummer des aktuellen Broadcasters
    pub fn broadcaster_nr(&self) -> Option<u64> {
        self.registry.lock().broadcaster().map(|b| b.nr)
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn route(&self, ctx: &VerbindungsKontext, text: &str) -> SignalingResult<()> {
        let envelope = Envelope::decode_str(text)?;
        let mut reg = self.registry.lock();

        tracing::trace!(peer = %ctx.peer_id, typ = %envelope.typ(), "Nachricht empfangen");

        match envelope.typ() {
            OpCode::Join => Self::join(&mut reg, ctx),
            OpCode::ClientMessage => Self::client_message(&reg, ctx, &envelope),
            OpCode::ServerMessage => Self::server_message(&reg, ctx, &envelope, text),
            OpCode::ClientDisconnect => Self::verlassen(&mut reg, ctx),
            op => Err(SignalingError::protokoll(format!(
                "{op} wird nur vom Relay gesendet"
            ))),
        }
    }

    fn join(reg: &mut ConnectionRegistry, ctx: &VerbindungsKontext) -> SignalingResult<()> {
        if ctx.rolle != Rolle::Viewer {
            return Err(SignalingError::protokoll("join vom Broadcaster"));
        }
        if reg.ist_viewer(&ctx.peer_id) {
            return Err(SignalingError::protokoll("bereits beigetreten"));
        }
        // Nach dem Abgang des Broadcasters ist die Registry leer; die Antwort
        // geht deshalb ueber den eigenen Sendeweg der Verbindung
        if !reg.hat_broadcaster() {
            let ablehnung = Envelope::mit_daten(
                OpCode::JoinReject,
                &JoinRejectDaten {
                    grund: Ablehnung::KeinBroadcaster.to_string(),
                },
            )?;
            ctx.handle.senden(&ablehnung);
            return Err(SignalingError::KeinBroadcaster);
        }
        if !reg.ist_angemeldet(&ctx.peer_id) {
            return Err(SignalingError::protokoll("Verbindung nicht mehr angemeldet"));
        }

        let client_join = Envelope::mit_daten(
            OpCode::ClientJoin,
            &PeerDaten {
                peer: ctx.peer_id.clone(),
            },
        )?;

        reg.viewer_hinzufuegen(&ctx.peer_id);
        if let Some(viewer) = reg.viewer(&ctx.peer_id) {
            viewer.senden(&Envelope::neu(OpCode::JoinAck));
        }
        if let Some(broadcaster) = reg.broadcaster() {
            broadcaster.senden(&client_join);
        }

        tracing::info!(peer = %ctx.peer_id, viewer = reg.viewer_anzahl(), "Viewer beigetreten");
        Ok(())
    }

    fn client_message(
        reg: &ConnectionRegistry,
        ctx: &VerbindungsKontext,
        envelope: &Envelope,
    ) -> SignalingResult<()> {
        if ctx.rolle != Rolle::Viewer || !reg.ist_viewer(&ctx.peer_id) {
            return Err(SignalingError::protokoll("client_message ohne Join"));
        }
        let broadcaster = reg.broadcaster().ok_or(SignalingError::KeinBroadcaster)?;

        // Felder bleiben byte-genau erhalten, nur `peer` wird ueberschrieben
        let mut felder: BTreeMap<String, Box<RawValue>> = match envelope.daten_roh() {
            None => BTreeMap::new(),
            Some(roh) if roh.get().trim() == "null" => BTreeMap::new(),
            Some(roh) => serde_json::from_str(roh.get()).map_err(|_| {
                SignalingError::protokoll("client_message: data ist kein Objekt")
            })?,
        };
        felder.insert(
            "peer".to_string(),
            serde_json::value::to_raw_value(&ctx.peer_id)?,
        );

        let weiter = Envelope::mit_daten(OpCode::ClientMessage, &felder)?;
        if broadcaster.senden(&weiter) {
            Ok(())
        } else {
            Err(SignalingError::SendFehler(broadcaster.peer_id.clone()))
        }
    }

    fn server_message(
        reg: &ConnectionRegistry,
        ctx: &VerbindungsKontext,
        envelope: &Envelope,
        original: &str,
    ) -> SignalingResult<()> {
        let ist_aktueller_broadcaster = ctx.rolle == Rolle::Broadcaster
            && reg.broadcaster().is_some_and(|b| b.nr == ctx.nr);
        if !ist_aktueller_broadcaster {
            return Err(SignalingError::protokoll("server_message nicht vom Broadcaster"));
        }

        let ziel: PeerZiel = envelope.daten_als()?;
        let viewer = reg
            .viewer(&ziel.peer)
            .ok_or_else(|| SignalingError::UnbekannterPeer(ziel.peer.clone()))?;

        tracing::trace!(peer = %ziel.peer, "server_message weitergeleitet");
        if viewer.text_senden(original.to_string()) {
            Ok(())
        } else {
            Err(SignalingError::SendFehler(ziel.peer))
        }
    }

    fn verlassen(reg: &mut ConnectionRegistry, ctx: &VerbindungsKontext) -> SignalingResult<()> {
        if ctx.rolle != Rolle::Viewer {
            return Err(SignalingError::protokoll("client_disconnect vom Broadcaster"));
        }
        if !reg.viewer_entfernen(&ctx.peer_id) {
            return Err(SignalingError::protokoll("client_disconnect ohne Join"));
        }
        Self::trennung_melden(reg, &ctx.peer_id);
        tracing::info!(peer = %ctx.peer_id, "Viewer hat die Uebertragung freiwillig verlassen");
        Ok(())
    }

    fn trennung_melden(reg: &ConnectionRegistry, peer_id: &PeerId) {
        let Some(broadcaster) = reg.broadcaster() else {
            return;
        };
        match Envelope::mit_daten(
            OpCode::ClientDisconnect,
            &PeerDaten {
                peer: peer_id.clone(),
            },
        ) {
            Ok(nachricht) => {
                broadcaster.senden(&nachricht);
            }
            Err(e) => tracing::error!(fehler = %e, "client_disconnect konnte nicht kodiert werden"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
