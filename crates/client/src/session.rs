//! Client-Session – Zustandsmaschine fuer Viewer und Broadcaster
//!
//! Eine Session ist ein einzelner tokio-Task (Actor). Er verarbeitet pro
//! Schleifendurchlauf genau ein Ereignis: Befehl, eingehende Nachricht,
//! Ergebnis einer Brueckenoperation oder lokaler Kandidat.
//!
//! ## Zustaende (Viewer)
//! ```text
//! Getrennt -> Verbindend -> Registriert -> Beitretend -> Verhandelnd -> Aktiv
//!     ^                                                                  |
//!     +------------------------ Neustart (jeder Fehler) -----------------+
//! ```
//!
//! ## Neustart
//! Jeder Fehlerpfad endet in `neustart`. Dort wird alles abgebaut (Transport,
//! Peer-Verbindungen, Medien), die Epoche erhoeht und genau ein Reconnect
//! geplant. Ergebnisse aus einer alten Epoche werden verworfen.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use leinwand_core::{PeerId, Rolle};
use leinwand_protocol::{
    Envelope, HelloDaten, JoinRejectDaten, OpCode, PeerDaten, PeerZiel, Signal, SignalTyp,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Sleep;

use crate::backoff::Backoff;
use crate::bridge::{
    KandidatenMelder, LokalerKandidat, LokalesAngebot, MedienAnfrage, MedienStream,
    NegotiationBridge, PeerHandle,
};
use crate::error::{ClientError, ClientResult, NegotiationError};
use crate::transport::{Transport, TransportVerbindung};

/// Kapazitaet des Ereignis-Kanals
const EREIGNIS_KAPAZITAET: usize = 64;

/// Kapazitaet der Befehls-Queue
const BEFEHL_KAPAZITAET: usize = 16;

// ---------------------------------------------------------------------------
// Status und Ereignisse
// ---------------------------------------------------------------------------

/// Sichtbarer Zustand der Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Kein Transport, ggf. wartet ein Reconnect
    Getrennt,
    /// Transport wird aufgebaut oder wartet auf `hello`
    Verbindend,
    /// `hello` erhalten, bereit
    Registriert,
    /// `join` gesendet, wartet auf `join_ack`
    Beitretend,
    /// Peer-Verbindung wird ausgehandelt
    Verhandelnd,
    /// Remote-Beschreibung angewendet, Uebertragung laeuft
    Aktiv,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Getrennt => "getrennt",
            SessionStatus::Verbindend => "verbindend",
            SessionStatus::Registriert => "registriert",
            SessionStatus::Beitretend => "beitretend",
            SessionStatus::Verhandelnd => "verhandelnd",
            SessionStatus::Aktiv => "aktiv",
        };
        f.write_str(name)
    }
}

/// Benachrichtigungen an die Oberflaeche
#[derive(Clone)]
pub enum SessionEreignis {
    StatusGeaendert(SessionStatus),
    /// Lokaler Medienstrom erfasst und bereit zur Anzeige
    VideoErhalten(Arc<dyn MedienStream>),
    /// Naechster Verbindungsversuch ist geplant
    VerbindungsVersuch { versuch: u32, verzoegerung: Duration },
    /// Relay hat den Join abgelehnt
    JoinAbgelehnt { grund: String },
    /// Broadcaster: Peer-Verbindung fuer einen Viewer angelegt
    PeerVerbunden(PeerId),
    /// Broadcaster: Peer-Verbindung eines Viewers abgebaut
    PeerGetrennt(PeerId),
}

impl std::fmt::Debug for SessionEreignis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatusGeaendert(s) => f.debug_tuple("StatusGeaendert").field(s).finish(),
            Self::VideoErhalten(stream) => f.debug_tuple("VideoErhalten").field(&stream.id()).finish(),
            Self::VerbindungsVersuch {
                versuch,
                verzoegerung,
            } => f
                .debug_struct("VerbindungsVersuch")
                .field("versuch", versuch)
                .field("verzoegerung", verzoegerung)
                .finish(),
            Self::JoinAbgelehnt { grund } => {
                f.debug_struct("JoinAbgelehnt").field("grund", grund).finish()
            }
            Self::PeerVerbunden(p) => f.debug_tuple("PeerVerbunden").field(p).finish(),
            Self::PeerGetrennt(p) => f.debug_tuple("PeerGetrennt").field(p).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration einer Session
#[derive(Debug, Clone)]
pub struct SessionKonfiguration {
    /// `Broadcaster` oder `Viewer` (alles andere wird als Viewer behandelt)
    pub rolle: Rolle,
    /// Wartezeit pro aufeinanderfolgendem Fehlschlag
    pub backoff_einheit: Duration,
    /// Obergrenze der Wartezeit
    pub backoff_maximum: Duration,
    /// Welche Medien der Viewer erfasst
    pub medien: MedienAnfrage,
}

impl Default for SessionKonfiguration {
    fn default() -> Self {
        Self {
            rolle: Rolle::Viewer,
            backoff_einheit: Duration::from_secs(1),
            backoff_maximum: Duration::from_secs(30),
            medien: MedienAnfrage::default(),
        }
    }
}

impl SessionKonfiguration {
    pub fn viewer() -> Self {
        Self::default()
    }

    pub fn broadcaster() -> Self {
        Self {
            rolle: Rolle::Broadcaster,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

enum Befehl {
    Starten(oneshot::Sender<ClientResult<()>>),
    Stoppen(oneshot::Sender<ClientResult<()>>),
    Beenden(oneshot::Sender<()>),
}

/// Steuer-Handle einer laufenden Session
///
/// Clone teilt dieselbe Session. Wird das letzte Handle fallen gelassen,
/// beendet sich die Session.
#[derive(Clone)]
pub struct SessionHandle {
    befehle: mpsc::Sender<Befehl>,
    status_rx: watch::Receiver<SessionStatus>,
    id_rx: watch::Receiver<Option<PeerId>>,
    ereignisse: broadcast::Sender<SessionEreignis>,
}

impl SessionHandle {
    /// Viewer: sendet `join` (nur im Status `Registriert` ohne Peer-Verbindung)
    pub async fn uebertragung_starten(&self) -> ClientResult<()> {
        self.anfrage(Befehl::Starten).await
    }

    /// Viewer: verlaesst die Uebertragung und kehrt nach `Registriert` zurueck
    pub async fn uebertragung_stoppen(&self) -> ClientResult<()> {
        self.anfrage(Befehl::Stoppen).await
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Vom Relay vergebene ID (nur im registrierten Zustand gesetzt)
    pub fn eigene_id(&self) -> Option<PeerId> {
        self.id_rx.borrow().clone()
    }

    pub fn status_beobachten(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    pub fn ereignisse_abonnieren(&self) -> broadcast::Receiver<SessionEreignis> {
        self.ereignisse.subscribe()
    }

    /// Beendet die Session ohne Reconnect
    pub async fn beenden(&self) {
        let (tx, rx) = oneshot::channel();
        if self.befehle.send(Befehl::Beenden(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn anfrage(
        &self,
        befehl: impl FnOnce(oneshot::Sender<ClientResult<()>>) -> Befehl,
    ) -> ClientResult<()> {
        let (tx, rx) = oneshot::channel();
        self.befehle
            .send(befehl(tx))
            .await
            .map_err(|_| ClientError::SessionBeendet)?;
        rx.await.map_err(|_| ClientError::SessionBeendet)?
    }
}

/// Startet eine Session als eigenen Task und verbindet sofort
pub fn session_starten(
    konfig: SessionKonfiguration,
    transport: Arc<dyn Transport>,
    bridge: NegotiationBridge,
) -> SessionHandle {
    let (befehl_tx, befehl_rx) = mpsc::channel(BEFEHL_KAPAZITAET);
    let (status_tx, status_rx) = watch::channel(SessionStatus::Getrennt);
    let (id_tx, id_rx) = watch::channel(None);
    let (ereignis_tx, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
    let (kandidaten_tx, kandidaten_rx) = mpsc::unbounded_channel();

    let session = ClientSession {
        backoff: Backoff::neu(konfig.backoff_einheit, konfig.backoff_maximum),
        konfig,
        transport,
        bridge,
        status_tx,
        id_tx,
        ereignisse: ereignis_tx.clone(),
        verbindung: None,
        epoche: 0,
        aufgaben: JoinSet::new(),
        kandidaten_tx,
        kandidaten_rx,
        neustart: None,
        peer: None,
        stream: None,
        verhandlung_laeuft: false,
        peers: HashMap::new(),
        naechste_peer_nr: 1,
    };
    tokio::spawn(session.ausfuehren(befehl_rx));

    SessionHandle {
        befehle: befehl_tx,
        status_rx,
        id_rx,
        ereignisse: ereignis_tx,
    }
}

// ---------------------------------------------------------------------------
// ClientSession (Actor)
// ---------------------------------------------------------------------------

/// Ergebnis einer nebenlaeufigen Operation
enum Intern {
    Verbunden(ClientResult<TransportVerbindung>),
    AngebotBereit(Result<LokalesAngebot, NegotiationError>),
    RemoteAngewendet {
        ziel: Option<(PeerId, u64)>,
        ergebnis: Result<Option<Value>, NegotiationError>,
    },
    KandidatAngewendet {
        ziel: Option<(PeerId, u64)>,
        ergebnis: Result<(), NegotiationError>,
    },
    MedienBeendet,
}

/// Peer-Verbindung des Broadcasters zu einem Viewer
struct PeerEintrag {
    nr: u64,
    handle: Arc<dyn PeerHandle>,
}

struct ClientSession {
    konfig: SessionKonfiguration,
    transport: Arc<dyn Transport>,
    bridge: NegotiationBridge,
    backoff: Backoff,
    status_tx: watch::Sender<SessionStatus>,
    id_tx: watch::Sender<Option<PeerId>>,
    ereignisse: broadcast::Sender<SessionEreignis>,

    verbindung: Option<TransportVerbindung>,
    /// Wird bei jedem Abbau erhoeht; aeltere Ergebnisse sind ungueltig
    epoche: u64,
    aufgaben: JoinSet<(u64, Intern)>,
    kandidaten_tx: mpsc::UnboundedSender<LokalerKandidat>,
    kandidaten_rx: mpsc::UnboundedReceiver<LokalerKandidat>,
    /// Geplanter Reconnect (hoechstens einer)
    neustart: Option<Pin<Box<Sleep>>>,

    // Viewer
    peer: Option<Arc<dyn PeerHandle>>,
    stream: Option<Arc<dyn MedienStream>>,
    verhandlung_laeuft: bool,

    // Broadcaster
    peers: HashMap<PeerId, PeerEintrag>,
    naechste_peer_nr: u64,
}

impl ClientSession {
    async fn ausfuehren(mut self, mut befehle: mpsc::Receiver<Befehl>) {
        tracing::info!(rolle = %self.konfig.rolle, "Session gestartet");
        self.verbindung_aufbauen();

        loop {
            tokio::select! {
                befehl = befehle.recv() => {
                    match befehl {
                        Some(Befehl::Starten(antwort)) => {
                            let _ = antwort.send(self.starten());
                        }
                        Some(Befehl::Stoppen(antwort)) => {
                            let _ = antwort.send(self.stoppen());
                        }
                        Some(Befehl::Beenden(antwort)) => {
                            self.beenden();
                            let _ = antwort.send(());
                            break;
                        }
                        None => {
                            self.beenden();
                            break;
                        }
                    }
                }

                text = Self::empfangen(&mut self.verbindung) => {
                    match text {
                        Some(text) => self.nachricht_verarbeiten(&text),
                        None => self.neustart("Verbindung zum Relay verloren"),
                    }
                }

                Some(ergebnis) = self.aufgaben.join_next() => {
                    match ergebnis {
                        Ok((epoche, intern)) => self.intern_verarbeiten(epoche, intern),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => {
                            tracing::error!(fehler = %e, "Brueckenoperation abgestuerzt");
                            self.neustart("Brueckenoperation abgestuerzt");
                        }
                    }
                }

                Some(kandidat) = self.kandidaten_rx.recv() => self.kandidat_weiterleiten(kandidat),

                _ = Self::warten(&mut self.neustart) => {
                    self.neustart = None;
                    self.verbindung_aufbauen();
                }
            }
        }

        tracing::info!("Session beendet");
    }

    async fn empfangen(verbindung: &mut Option<TransportVerbindung>) -> Option<String> {
        match verbindung {
            Some(v) => v.eingehend.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn warten(neustart: &mut Option<Pin<Box<Sleep>>>) {
        match neustart {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }

    fn ist_broadcaster(&self) -> bool {
        self.konfig.rolle == Rolle::Broadcaster
    }

    fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    fn status_setzen(&mut self, neu: SessionStatus) {
        let alt = self.status_tx.send_replace(neu);
        if alt != neu {
            tracing::info!(von = %alt, nach = %neu, "Statuswechsel");
            self.melden(SessionEreignis::StatusGeaendert(neu));
        }
    }

    fn melden(&self, ereignis: SessionEreignis) {
        // Ohne Abonnenten geht das Ereignis verloren
        let _ = self.ereignisse.send(ereignis);
    }

    // -----------------------------------------------------------------------
    // Verbindung und Neustart
    // -----------------------------------------------------------------------

    fn verbindung_aufbauen(&mut self) {
        self.status_setzen(SessionStatus::Verbindend);
        let transport = Arc::clone(&self.transport);
        let epoche = self.epoche;
        self.aufgaben
            .spawn(async move { (epoche, Intern::Verbunden(transport.verbinden().await)) });
    }

    /// Einziger Uebergang `* -> Getrennt -> Verbindend`
    ///
    /// Ist bereits ein Reconnect geplant, passiert nichts.
    fn neustart(&mut self, grund: &str) {
        if self.neustart.is_some() {
            tracing::debug!(grund, "Neustart bereits geplant");
            return;
        }
        tracing::warn!(grund, "Session wird neu gestartet");

        self.abbauen();
        self.status_setzen(SessionStatus::Getrennt);

        let verzoegerung = self.backoff.fehlschlag();
        let versuch = self.backoff.versuche();
        tracing::info!(versuch, verzoegerung_ms = verzoegerung.as_millis() as u64, "Reconnect geplant");
        self.melden(SessionEreignis::VerbindungsVersuch {
            versuch,
            verzoegerung,
        });
        self.neustart = Some(Box::pin(tokio::time::sleep(verzoegerung)));
    }

    /// Baut Transport, Peer-Verbindungen und Medien vollstaendig ab
    fn abbauen(&mut self) {
        let beigetreten = self.peer.is_some()
            || matches!(
                self.status(),
                SessionStatus::Beitretend | SessionStatus::Verhandelnd | SessionStatus::Aktiv
            );
        if !self.ist_broadcaster() && beigetreten {
            // Best effort: der Relay meldet die Trennung sonst beim Socket-Ende
            self.senden(Envelope::neu(OpCode::ClientDisconnect));
        }

        self.verhandlung_abbrechen();
        for (peer, eintrag) in self.peers.drain() {
            eintrag.handle.schliessen();
            let _ = self.ereignisse.send(SessionEreignis::PeerGetrennt(peer));
        }
        self.verbindung = None;
        self.id_tx.send_replace(None);
    }

    fn beenden(&mut self) {
        self.neustart = None;
        self.abbauen();
        self.status_setzen(SessionStatus::Getrennt);
    }

    /// Verwirft alle laufenden Operationen und die Peer-Verbindung des Viewers
    fn verhandlung_abbrechen(&mut self) {
        self.epoche += 1;
        self.aufgaben.abort_all();
        self.verhandlung_laeuft = false;
        if let Some(peer) = self.peer.take() {
            peer.schliessen();
        }
        if let Some(stream) = self.stream.take() {
            stream.stoppen();
        }
    }

    fn senden(&self, envelope: Envelope) -> bool {
        match &self.verbindung {
            Some(v) => v.ausgehend.send(envelope.encode()).is_ok(),
            None => false,
        }
    }

    fn signal_senden(&self, op: OpCode, signal: &Signal) {
        match Envelope::mit_daten(op, signal) {
            Ok(envelope) => {
                if !self.senden(envelope) {
                    tracing::debug!(typ = %op, "Senden ohne offene Verbindung verworfen");
                }
            }
            Err(e) => tracing::error!(fehler = %e, "Signal konnte nicht kodiert werden"),
        }
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    fn starten(&mut self) -> ClientResult<()> {
        let status = self.status();
        if self.ist_broadcaster()
            || status != SessionStatus::Registriert
            || self.peer.is_some()
            || self.verbindung.is_none()
        {
            return Err(ClientError::UngueltigerZustand {
                aktion: "uebertragung_starten",
                status,
            });
        }

        if !self.senden(Envelope::neu(OpCode::Join)) {
            self.neustart("join konnte nicht gesendet werden");
            return Err(ClientError::transport("Verbindung zum Relay verloren"));
        }
        self.status_setzen(SessionStatus::Beitretend);
        Ok(())
    }

    fn stoppen(&mut self) -> ClientResult<()> {
        let status = self.status();
        let erlaubt = matches!(
            status,
            SessionStatus::Beitretend | SessionStatus::Verhandelnd | SessionStatus::Aktiv
        );
        if self.ist_broadcaster() || !erlaubt {
            return Err(ClientError::UngueltigerZustand {
                aktion: "uebertragung_stoppen",
                status,
            });
        }

        self.senden(Envelope::neu(OpCode::ClientDisconnect));
        self.verhandlung_abbrechen();
        self.status_setzen(SessionStatus::Registriert);
        tracing::info!("Uebertragung gestoppt");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Eingehende Nachrichten
    // -----------------------------------------------------------------------

    fn nachricht_verarbeiten(&mut self, text: &str) {
        let ergebnis = Envelope::decode_str(text)
            .map_err(ClientError::from)
            .and_then(|envelope| {
                tracing::trace!(typ = %envelope.typ(), "Nachricht vom Relay");
                if self.ist_broadcaster() {
                    self.als_broadcaster(envelope)
                } else {
                    self.als_viewer(envelope)
                }
            });

        if let Err(e) = ergebnis {
            self.neustart(&e.to_string());
        }
    }

    fn hello(&mut self, envelope: &Envelope) -> ClientResult<()> {
        let hello: HelloDaten = envelope.daten_als()?;
        tracing::info!(id = %hello.id, "Beim Relay registriert");
        self.backoff.zuruecksetzen();
        self.id_tx.send_replace(Some(hello.id));
        if self.status() == SessionStatus::Verbindend {
            self.status_setzen(SessionStatus::Registriert);
        }
        Ok(())
    }

    fn als_viewer(&mut self, envelope: Envelope) -> ClientResult<()> {
        match envelope.typ() {
            OpCode::Hello => self.hello(&envelope),
            OpCode::JoinAck => self.join_ack(),
            OpCode::JoinReject => {
                if self.status() == SessionStatus::Beitretend {
                    let grund = envelope
                        .daten_als::<JoinRejectDaten>()
                        .map(|d| d.grund)
                        .unwrap_or_default();
                    tracing::info!(grund = %grund, "Join abgelehnt");
                    self.status_setzen(SessionStatus::Registriert);
                    self.melden(SessionEreignis::JoinAbgelehnt { grund });
                }
                Ok(())
            }
            OpCode::ServerMessage => {
                let Some(peer) = self.peer.clone() else {
                    tracing::debug!("server_message ohne Peer-Verbindung ignoriert");
                    return Ok(());
                };
                let signal: Signal = envelope.daten_als()?;
                self.signal_anwenden(peer, None, signal)
            }
            op => Err(ClientError::UnerwarteteNachricht(op)),
        }
    }

    fn join_ack(&mut self) -> ClientResult<()> {
        if self.status() != SessionStatus::Beitretend || self.verhandlung_laeuft || self.peer.is_some() {
            tracing::debug!(status = %self.status(), "join_ack ignoriert");
            return Ok(());
        }

        self.status_setzen(SessionStatus::Verhandelnd);
        let melder = KandidatenMelder::neu(self.epoche, None, 0, self.kandidaten_tx.clone());
        let peer = self.bridge.peer_erstellen(melder)?;
        self.peer = Some(Arc::clone(&peer));
        self.verhandlung_laeuft = true;

        let bridge = self.bridge.clone();
        let anfrage = self.konfig.medien.clone();
        let epoche = self.epoche;
        self.aufgaben.spawn(async move {
            let ergebnis = bridge.angebot_vorbereiten(&peer, &anfrage).await;
            (epoche, Intern::AngebotBereit(ergebnis))
        });
        Ok(())
    }

    /// Wendet ein eingehendes `ice`/`sdp`-Signal asynchron an
    fn signal_anwenden(
        &mut self,
        peer: Arc<dyn PeerHandle>,
        ziel: Option<(PeerId, u64)>,
        signal: Signal,
    ) -> ClientResult<()> {
        let bridge = self.bridge.clone();
        let epoche = self.epoche;

        match (signal.typ, signal.data) {
            (SignalTyp::Ice, None) | (SignalTyp::Ice, Some(Value::Null)) => {
                tracing::debug!("Ende der Remote-Kandidaten");
            }
            (SignalTyp::Ice, Some(kandidat)) => {
                self.aufgaben.spawn(async move {
                    let ergebnis = bridge.kandidat_anwenden(&peer, kandidat).await;
                    (epoche, Intern::KandidatAngewendet { ziel, ergebnis })
                });
            }
            (SignalTyp::Sdp, Some(beschreibung)) if !beschreibung.is_null() => {
                self.aufgaben.spawn(async move {
                    let ergebnis = bridge.remote_anwenden(&peer, beschreibung).await;
                    (epoche, Intern::RemoteAngewendet { ziel, ergebnis })
                });
            }
            (SignalTyp::Sdp, _) => {
                return Err(NegotiationError::engine("Leere Session-Beschreibung").into());
            }
        }
        Ok(())
    }

    fn als_broadcaster(&mut self, envelope: Envelope) -> ClientResult<()> {
        match envelope.typ() {
            OpCode::Hello => self.hello(&envelope),
            OpCode::ClientJoin => {
                let daten: PeerDaten = envelope.daten_als()?;
                self.peer_anlegen(daten.peer);
                Ok(())
            }
            OpCode::ClientMessage => {
                // Erst die Zuordnung lesen: ein kaputtes Signal betrifft nur diesen Viewer
                let Ok(PeerZiel { peer: peer_id }) = envelope.daten_als::<PeerZiel>() else {
                    tracing::warn!("client_message ohne peer ignoriert");
                    return Ok(());
                };
                let Some(eintrag) = self.peers.get(&peer_id) else {
                    tracing::debug!(peer = %peer_id, "client_message fuer unbekannten Peer ignoriert");
                    return Ok(());
                };
                let handle = Arc::clone(&eintrag.handle);
                let ziel = Some((peer_id.clone(), eintrag.nr));
                let signal: Signal = match envelope.daten_als() {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::warn!(peer = %peer_id, fehler = %e, "Ungueltiges Signal vom Viewer");
                        self.peer_schliessen(&peer_id);
                        return Ok(());
                    }
                };
                if let Err(e) = self.signal_anwenden(handle, ziel, signal) {
                    tracing::warn!(peer = %peer_id, fehler = %e, "Signal nicht anwendbar");
                    self.peer_schliessen(&peer_id);
                }
                Ok(())
            }
            OpCode::ClientDisconnect => {
                let daten: PeerDaten = envelope.daten_als()?;
                self.peer_schliessen(&daten.peer);
                Ok(())
            }
            op => Err(ClientError::UnerwarteteNachricht(op)),
        }
    }

    fn peer_anlegen(&mut self, peer_id: PeerId) {
        // Erneuter Join derselben ID ersetzt die alte Verbindung
        if let Some(alt) = self.peers.remove(&peer_id) {
            alt.handle.schliessen();
        }

        let nr = self.naechste_peer_nr;
        self.naechste_peer_nr += 1;
        let melder = KandidatenMelder::neu(
            self.epoche,
            Some(peer_id.clone()),
            nr,
            self.kandidaten_tx.clone(),
        );

        match self.bridge.peer_erstellen(melder) {
            Ok(handle) => {
                tracing::info!(peer = %peer_id, "Peer-Verbindung angelegt");
                self.peers.insert(peer_id.clone(), PeerEintrag { nr, handle });
                self.melden(SessionEreignis::PeerVerbunden(peer_id));
                self.status_setzen(SessionStatus::Aktiv);
            }
            Err(e) => {
                tracing::warn!(peer = %peer_id, fehler = %e, "Peer-Verbindung konnte nicht angelegt werden");
            }
        }
    }

    fn peer_schliessen(&mut self, peer_id: &PeerId) {
        if let Some(eintrag) = self.peers.remove(peer_id) {
            eintrag.handle.schliessen();
            tracing::info!(peer = %peer_id, "Peer-Verbindung geschlossen");
            self.melden(SessionEreignis::PeerGetrennt(peer_id.clone()));
        }
        if self.peers.is_empty() && self.status() == SessionStatus::Aktiv {
            self.status_setzen(SessionStatus::Registriert);
        }
    }

    /// Prueft ob ein Ergebnis noch zur aktuellen Peer-Verbindung gehoert
    fn peer_aktuell(&self, peer_id: &PeerId, nr: u64) -> bool {
        self.peers.get(peer_id).is_some_and(|e| e.nr == nr)
    }

    // -----------------------------------------------------------------------
    // Ergebnisse und Kandidaten
    // -----------------------------------------------------------------------

    fn intern_verarbeiten(&mut self, epoche: u64, intern: Intern) {
        if epoche != self.epoche {
            // Ressourcen veralteter Ergebnisse freigeben
            if let Intern::AngebotBereit(Ok(angebot)) = intern {
                angebot.stream.stoppen();
            }
            tracing::debug!(epoche, aktuell = self.epoche, "Veraltetes Ergebnis verworfen");
            return;
        }

        match intern {
            Intern::Verbunden(Ok(verbindung)) => {
                tracing::info!("Transport offen, warte auf hello");
                self.verbindung = Some(verbindung);
            }
            Intern::Verbunden(Err(e)) => {
                tracing::warn!(fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                self.neustart("Verbindungsaufbau fehlgeschlagen");
            }

            Intern::AngebotBereit(Ok(LokalesAngebot { stream, angebot })) => {
                self.verhandlung_laeuft = false;
                tracing::info!(stream = %stream.id(), "Lokales Angebot bereit");

                let beobachtet = Arc::clone(&stream);
                self.aufgaben.spawn(async move {
                    beobachtet.beendet().await;
                    (epoche, Intern::MedienBeendet)
                });
                self.stream = Some(Arc::clone(&stream));

                self.signal_senden(OpCode::ClientMessage, &Signal::neu(SignalTyp::Sdp, angebot));
                self.melden(SessionEreignis::VideoErhalten(stream));
            }
            Intern::AngebotBereit(Err(e)) => {
                self.neustart(&format!("Angebot fehlgeschlagen: {e}"));
            }

            Intern::RemoteAngewendet { ziel: None, ergebnis } => match ergebnis {
                Ok(antwort) => {
                    if let Some(antwort) = antwort {
                        self.signal_senden(OpCode::ClientMessage, &Signal::neu(SignalTyp::Sdp, antwort));
                    }
                    self.status_setzen(SessionStatus::Aktiv);
                }
                Err(e) => self.neustart(&format!("Remote-Beschreibung fehlgeschlagen: {e}")),
            },
            Intern::RemoteAngewendet {
                ziel: Some((peer_id, nr)),
                ergebnis,
            } => {
                if !self.peer_aktuell(&peer_id, nr) {
                    return;
                }
                match ergebnis {
                    Ok(Some(antwort)) => self.signal_senden(
                        OpCode::ServerMessage,
                        &Signal::an_peer(peer_id, SignalTyp::Sdp, antwort),
                    ),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(peer = %peer_id, fehler = %e, "Remote-Beschreibung fehlgeschlagen");
                        self.peer_schliessen(&peer_id);
                    }
                }
            }

            Intern::KandidatAngewendet { ziel: None, ergebnis } => {
                if let Err(e) = ergebnis {
                    self.neustart(&format!("Kandidat fehlgeschlagen: {e}"));
                }
            }
            Intern::KandidatAngewendet {
                ziel: Some((peer_id, nr)),
                ergebnis,
            } => {
                if let Err(e) = ergebnis {
                    if self.peer_aktuell(&peer_id, nr) {
                        tracing::warn!(peer = %peer_id, fehler = %e, "Kandidat fehlgeschlagen");
                        self.peer_schliessen(&peer_id);
                    }
                }
            }

            Intern::MedienBeendet => {
                if self.status() == SessionStatus::Aktiv {
                    self.neustart("Lokale Medien beendet");
                } else {
                    tracing::debug!("Lokale Medien beendet, keine aktive Uebertragung");
                }
            }
        }
    }

    fn kandidat_weiterleiten(&mut self, lokal: LokalerKandidat) {
        if lokal.epoche != self.epoche {
            return;
        }
        let Some(kandidat) = lokal.kandidat.filter(|k| !k.is_null()) else {
            tracing::debug!("Ende der lokalen Kandidaten");
            return;
        };

        match lokal.peer {
            None => {
                if self.peer.is_some() {
                    self.signal_senden(OpCode::ClientMessage, &Signal::neu(SignalTyp::Ice, kandidat));
                }
            }
            Some(peer_id) => {
                if self.peer_aktuell(&peer_id, lokal.peer_nr) {
                    self.signal_senden(
                        OpCode::ServerMessage,
                        &Signal::an_peer(peer_id, SignalTyp::Ice, kandidat),
                    );
                }
            }
        }
    }
}
