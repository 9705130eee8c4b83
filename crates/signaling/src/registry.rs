//! Connection-Registry – Wer ist Broadcaster, wer ist Viewer
//!
//! Die Registry haelt keine Sockets, sondern nur `VerbindungsHandle`s
//! (Send-Queue + Schliessen). Die Sockets gehoeren exklusiv dem
//! Verbindungs-Task.
//!
//! ## Mengen
//! - `broadcaster`: hoechstens eine Verbindung
//! - `angemeldet`:  jede zugelassene Nicht-Broadcaster-Verbindung
//! - `viewers`:     Teilmenge von `angemeldet`, nur nach erfolgreichem Join
//!
//! Die Registry selbst ist nicht synchronisiert. Der `MessageRouter` haelt
//! sie hinter einem Mutex fuer die gesamte Dauer einer Routing-Operation.

use std::collections::HashMap;

use leinwand_core::PeerId;
use leinwand_protocol::Envelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// VerbindungsHandle
// ---------------------------------------------------------------------------

/// Handle auf eine verbundene Gegenstelle
#[derive(Clone, Debug)]
pub struct VerbindungsHandle {
    pub peer_id: PeerId,
    /// Laufende Nummer der Verbindung (unterscheidet alte und neue Broadcaster)
    pub nr: u64,
    tx: mpsc::Sender<String>,
    token: CancellationToken,
}

impl VerbindungsHandle {
    pub fn neu(peer_id: PeerId, nr: u64, tx: mpsc::Sender<String>, token: CancellationToken) -> Self {
        Self {
            peer_id,
            nr,
            tx,
            token,
        }
    }

    /// Reiht einen Umschlag nicht-blockierend in die Send-Queue ein
    pub fn senden(&self, nachricht: &Envelope) -> bool {
        self.text_senden(nachricht.encode())
    }

    /// Reiht einen bereits kodierten Text-Frame ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn text_senden(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %self.peer_id, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer = %self.peer_id, "Send-Queue geschlossen (Verbindung getrennt)");
                false
            }
        }
    }

    /// Fordert den Verbindungs-Task auf, den Socket zu schliessen
    pub fn schliessen(&self) {
        self.token.cancel();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Registry aller zugelassenen Verbindungen eines Relays
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    broadcaster: Option<VerbindungsHandle>,
    angemeldet: HashMap<PeerId, VerbindungsHandle>,
    viewers: HashMap<PeerId, VerbindungsHandle>,
}

impl ConnectionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    // --- Broadcaster ---

    pub fn hat_broadcaster(&self) -> bool {
        self.broadcaster.is_some()
    }

    pub fn broadcaster(&self) -> Option<&VerbindungsHandle> {
        self.broadcaster.as_ref()
    }

    /// Setzt den Broadcaster
    ///
    /// Gibt `false` zurueck (und aendert nichts) wenn bereits einer aktiv ist.
    pub fn broadcaster_setzen(&mut self, handle: VerbindungsHandle) -> bool {
        if self.broadcaster.is_some() {
            return false;
        }
        self.broadcaster = Some(handle);
        true
    }

    /// Entfernt den Broadcaster, aber nur wenn `nr` zur aktuellen Verbindung passt
    pub fn broadcaster_entfernen(&mut self, nr: u64) -> Option<VerbindungsHandle> {
        match &self.broadcaster {
            Some(b) if b.nr == nr => self.broadcaster.take(),
            _ => None,
        }
    }

    // --- Zugelassene Verbindungen ---

    pub fn anmelden(&mut self, handle: VerbindungsHandle) {
        self.angemeldet.insert(handle.peer_id.clone(), handle);
    }

    /// Handle einer zugelassenen Verbindung (beigetreten oder nicht)
    pub fn verbindung(&self, peer_id: &PeerId) -> Option<&VerbindungsHandle> {
        self.angemeldet.get(peer_id)
    }

    pub fn ist_angemeldet(&self, peer_id: &PeerId) -> bool {
        self.angemeldet.contains_key(peer_id)
    }

    /// Entfernt eine Verbindung vollstaendig
    ///
    /// Gibt `true` zurueck wenn die Verbindung als Viewer beigetreten war.
    pub fn abmelden(&mut self, peer_id: &PeerId) -> bool {
        self.angemeldet.remove(peer_id);
        self.viewers.remove(peer_id).is_some()
    }

    // --- Viewer ---

    /// Nimmt eine angemeldete Verbindung in `viewers` auf
    ///
    /// Gibt `false` zurueck wenn die Verbindung nicht angemeldet ist oder
    /// bereits beigetreten war.
    pub fn viewer_hinzufuegen(&mut self, peer_id: &PeerId) -> bool {
        if peer_id.ist_server() || self.viewers.contains_key(peer_id) {
            return false;
        }
        match self.angemeldet.get(peer_id) {
            Some(handle) => {
                self.viewers.insert(peer_id.clone(), handle.clone());
                true
            }
            None => false,
        }
    }

    /// Entfernt einen Viewer aus `viewers`, die Verbindung bleibt angemeldet
    pub fn viewer_entfernen(&mut self, peer_id: &PeerId) -> bool {
        self.viewers.remove(peer_id).is_some()
    }

    pub fn viewer(&self, peer_id: &PeerId) -> Option<&VerbindungsHandle> {
        self.viewers.get(peer_id)
    }

    pub fn ist_viewer(&self, peer_id: &PeerId) -> bool {
        self.viewers.contains_key(peer_id)
    }

    /// Sortierte IDs aller beigetretenen Viewer
    pub fn viewer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.viewers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn viewer_anzahl(&self) -> usize {
        self.viewers.len()
    }

    /// Anzahl aller zugelassenen Verbindungen inkl. Broadcaster
    pub fn verbindungs_anzahl(&self) -> usize {
        self.angemeldet.len() + usize::from(self.broadcaster.is_some())
    }

    /// Leert die Registry und gibt alle Nicht-Broadcaster-Handles zurueck
    pub fn leeren(&mut self) -> Vec<VerbindungsHandle> {
        self.broadcaster = None;
        self.viewers.clear();
        self.angemeldet.drain().map(|(_, h)| h).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
