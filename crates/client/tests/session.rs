//! Integrationstests der Client-Session mit In-Memory-Transport und Test-Engine
//!
//! Alle Tests laufen mit pausierter Zeit; Backoff-Wartezeiten vergehen sofort.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leinwand_client::{
    session_starten, ClientError, ClientResult, KandidatenMelder, MedienAnfrage, MedienQuelle,
    MedienStream, NegotiationBridge, NegotiationError, PeerEngine, PeerHandle, SessionEreignis,
    SessionHandle, SessionKonfiguration, SessionStatus, Transport, TransportVerbindung,
};
use leinwand_core::PeerId;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout, Instant};

const WARTEZEIT: Duration = Duration::from_secs(60);
const STILLE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Relay-Seite einer In-Memory-Verbindung
struct ServerEnde {
    von_client: mpsc::UnboundedReceiver<String>,
    an_client: mpsc::UnboundedSender<String>,
}

impl ServerEnde {
    fn senden(&self, nachricht: Value) {
        self.senden_roh(&nachricht.to_string());
    }

    fn senden_roh(&self, text: &str) {
        self.an_client.send(text.to_string()).unwrap();
    }

    fn hello(&self, id: &str) {
        self.senden(json!({"type": "hello", "data": {"id": id}}));
    }

    async fn empfangen(&mut self) -> Value {
        let text = timeout(WARTEZEIT, self.von_client.recv())
            .await
            .expect("Timeout beim Warten auf Nachricht")
            .expect("Client hat die Verbindung geschlossen");
        serde_json::from_str(&text).unwrap()
    }

    /// Wartet bis der Client die Verbindung fallen laesst
    async fn wird_geschlossen(&mut self) {
        timeout(WARTEZEIT, async {
            while self.von_client.recv().await.is_some() {}
        })
        .await
        .expect("Verbindung wurde nicht geschlossen");
    }
}

struct TestTransport {
    fehlschlaege: AtomicU32,
    versuche: AtomicU32,
    verbindungen: mpsc::UnboundedSender<ServerEnde>,
}

#[async_trait]
impl Transport for TestTransport {
    async fn verbinden(&self) -> ClientResult<TransportVerbindung> {
        self.versuche.fetch_add(1, Ordering::SeqCst);
        let offen = self
            .fehlschlaege
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err();
        if !offen {
            return Err(ClientError::transport("Verbindung abgelehnt"));
        }

        let (ausgehend_tx, ausgehend_rx) = mpsc::unbounded_channel();
        let (eingehend_tx, eingehend_rx) = mpsc::unbounded_channel();
        let _ = self.verbindungen.send(ServerEnde {
            von_client: ausgehend_rx,
            an_client: eingehend_tx,
        });
        Ok(TransportVerbindung {
            ausgehend: ausgehend_tx,
            eingehend: eingehend_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Medien und Peer-Engine
// ---------------------------------------------------------------------------

struct MockStream {
    id: String,
    gestoppt: AtomicBool,
    ende: watch::Sender<bool>,
}

impl MockStream {
    fn ist_gestoppt(&self) -> bool {
        self.gestoppt.load(Ordering::SeqCst)
    }

    /// Simuliert das Ende der Aufnahme durch den Benutzer
    fn beenden(&self) {
        self.ende.send_replace(true);
    }
}

#[async_trait]
impl MedienStream for MockStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stoppen(&self) {
        self.gestoppt.store(true, Ordering::SeqCst);
    }

    async fn beendet(&self) {
        let mut rx = self.ende.subscribe();
        let _ = rx.wait_for(|beendet| *beendet).await;
    }
}

#[derive(Default)]
struct MockQuelle {
    ablehnen: AtomicBool,
    streams: Mutex<Vec<Arc<MockStream>>>,
}

impl MockQuelle {
    fn stream(&self, index: usize) -> Arc<MockStream> {
        Arc::clone(&self.streams.lock().unwrap()[index])
    }

    fn anzahl(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}

#[async_trait]
impl MedienQuelle for MockQuelle {
    async fn erfassen(
        &self,
        _anfrage: &MedienAnfrage,
    ) -> Result<Arc<dyn MedienStream>, NegotiationError> {
        if self.ablehnen.load(Ordering::SeqCst) {
            return Err(NegotiationError::MedienAbgelehnt("Freigabe abgebrochen".into()));
        }
        let mut streams = self.streams.lock().unwrap();
        let stream = Arc::new(MockStream {
            id: format!("stream-{}", streams.len()),
            gestoppt: AtomicBool::new(false),
            ende: watch::channel(false).0,
        });
        streams.push(Arc::clone(&stream));
        Ok(stream as Arc<dyn MedienStream>)
    }
}

/// Peer-Verbindung der Test-Engine
///
/// `sdp == "kaputt"` bzw. `candidate == "kaputt"` schlagen fehl.
struct MockPeer {
    melder: KandidatenMelder,
    angebot_haengt: bool,
    aufrufe: Mutex<Vec<String>>,
    geschlossen: AtomicBool,
}

impl MockPeer {
    fn aufruf(&self, name: &str) {
        self.aufrufe.lock().unwrap().push(name.to_string());
    }

    fn aufrufe(&self) -> Vec<String> {
        self.aufrufe.lock().unwrap().clone()
    }

    fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for MockPeer {
    async fn tracks_hinzufuegen(&self, _stream: Arc<dyn MedienStream>) -> Result<(), NegotiationError> {
        self.aufruf("tracks");
        Ok(())
    }

    async fn angebot_erstellen(&self) -> Result<Value, NegotiationError> {
        self.aufruf("angebot");
        if self.angebot_haengt {
            std::future::pending::<()>().await;
        }
        Ok(json!({"type": "offer", "sdp": "angebot"}))
    }

    async fn antwort_erstellen(&self) -> Result<Value, NegotiationError> {
        self.aufruf("antwort");
        Ok(json!({"type": "answer", "sdp": "antwort"}))
    }

    async fn remote_beschreibung_setzen(&self, beschreibung: Value) -> Result<(), NegotiationError> {
        self.aufruf("remote");
        if beschreibung["sdp"] == "kaputt" {
            return Err(NegotiationError::engine("ungueltige Beschreibung"));
        }
        Ok(())
    }

    async fn kandidat_hinzufuegen(&self, kandidat: Value) -> Result<(), NegotiationError> {
        self.aufruf("kandidat");
        if kandidat["candidate"] == "kaputt" {
            return Err(NegotiationError::engine("ungueltiger Kandidat"));
        }
        Ok(())
    }

    fn schliessen(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockEngine {
    angebot_haengt: AtomicBool,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockEngine {
    fn peer(&self, index: usize) -> Arc<MockPeer> {
        Arc::clone(&self.peers.lock().unwrap()[index])
    }

    fn anzahl(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

impl PeerEngine for MockEngine {
    fn peer_erstellen(
        &self,
        melder: KandidatenMelder,
    ) -> Result<Arc<dyn PeerHandle>, NegotiationError> {
        let peer = Arc::new(MockPeer {
            melder,
            angebot_haengt: self.angebot_haengt.load(Ordering::SeqCst),
            aufrufe: Mutex::new(Vec::new()),
            geschlossen: AtomicBool::new(false),
        });
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer as Arc<dyn PeerHandle>)
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

struct Aufbau {
    handle: SessionHandle,
    transport: Arc<TestTransport>,
    verbindungen: mpsc::UnboundedReceiver<ServerEnde>,
    engine: Arc<MockEngine>,
    quelle: Arc<MockQuelle>,
    ereignisse: broadcast::Receiver<SessionEreignis>,
}

impl Aufbau {
    async fn naechste_verbindung(&mut self) -> ServerEnde {
        timeout(WARTEZEIT, self.verbindungen.recv())
            .await
            .expect("Kein Verbindungsversuch")
            .expect("Transport verworfen")
    }

    async fn keine_verbindung(&mut self) {
        assert!(
            timeout(STILLE, self.verbindungen.recv()).await.is_err(),
            "Unerwarteter Verbindungsversuch"
        );
    }

    async fn status_abwarten(&self, ziel: SessionStatus) {
        let mut rx = self.handle.status_beobachten();
        timeout(WARTEZEIT, rx.wait_for(|s| *s == ziel))
            .await
            .unwrap_or_else(|_| panic!("Status {ziel} nicht erreicht"))
            .expect("Session beendet");
    }

    async fn ereignis_abwarten(
        &mut self,
        mut passt: impl FnMut(&SessionEreignis) -> bool,
    ) -> SessionEreignis {
        timeout(WARTEZEIT, async {
            loop {
                let ereignis = self.ereignisse.recv().await.expect("Ereigniskanal geschlossen");
                if passt(&ereignis) {
                    return ereignis;
                }
            }
        })
        .await
        .expect("Ereignis nicht eingetroffen")
    }

    fn ereignisse_leeren(&mut self) -> Vec<SessionEreignis> {
        let mut alle = Vec::new();
        while let Ok(e) = self.ereignisse.try_recv() {
            alle.push(e);
        }
        alle
    }

    /// Viewer bis zum gesendeten Angebot fuehren
    async fn bis_zum_angebot(&mut self, ende: &mut ServerEnde) -> Arc<MockPeer> {
        ende.hello("v1");
        self.status_abwarten(SessionStatus::Registriert).await;
        self.handle.uebertragung_starten().await.unwrap();
        assert_eq!(ende.empfangen().await, json!({"type": "join"}));

        ende.senden(json!({"type": "join_ack"}));
        assert_eq!(
            ende.empfangen().await,
            json!({"type": "client_message", "data": {"type": "sdp", "data": {"type": "offer", "sdp": "angebot"}}})
        );
        self.engine.peer(0)
    }

    /// Viewer bis `Aktiv` fuehren
    async fn bis_aktiv(&mut self, ende: &mut ServerEnde) -> Arc<MockPeer> {
        let peer = self.bis_zum_angebot(ende).await;
        ende.senden(json!({"type": "server_message", "data": {"type": "sdp", "data": {"type": "answer", "sdp": "antwort"}}}));
        self.status_abwarten(SessionStatus::Aktiv).await;
        peer
    }
}

fn aufbauen(konfig: SessionKonfiguration, fehlschlaege: u32) -> Aufbau {
    let (verbindungen_tx, verbindungen) = mpsc::unbounded_channel();
    let transport = Arc::new(TestTransport {
        fehlschlaege: AtomicU32::new(fehlschlaege),
        versuche: AtomicU32::new(0),
        verbindungen: verbindungen_tx,
    });
    let engine = Arc::new(MockEngine::default());
    let quelle = Arc::new(MockQuelle::default());
    let bridge = NegotiationBridge::neu(engine.clone(), quelle.clone());

    let handle = session_starten(konfig, transport.clone(), bridge);
    let ereignisse = handle.ereignisse_abonnieren();
    Aufbau {
        handle,
        transport,
        verbindungen,
        engine,
        quelle,
        ereignisse,
    }
}

async fn bis(mut bedingung: impl FnMut() -> bool) {
    timeout(WARTEZEIT, async {
        while !bedingung() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Bedingung nicht erfuellt");
}

fn ist_versuch(ereignis: &SessionEreignis) -> bool {
    matches!(ereignis, SessionEreignis::VerbindungsVersuch { .. })
}

// ---------------------------------------------------------------------------
// Viewer
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn viewer_kompletter_ablauf() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    assert_eq!(a.handle.eigene_id(), None);

    let peer = a.bis_zum_angebot(&mut ende).await;
    assert_eq!(a.handle.eigene_id(), Some(PeerId::from("v1")));
    assert_eq!(a.handle.status(), SessionStatus::Verhandelnd);

    // Lokale Kandidaten gehen als client_message raus, das Ende nicht
    assert!(peer.melder.melden(Some(json!({"candidate": "c1"}))));
    assert!(peer.melder.melden(None));
    assert_eq!(
        ende.empfangen().await,
        json!({"type": "client_message", "data": {"type": "ice", "data": {"candidate": "c1"}}})
    );

    ende.senden(json!({"type": "server_message", "data": {"type": "sdp", "data": {"type": "answer", "sdp": "antwort"}}}));
    a.status_abwarten(SessionStatus::Aktiv).await;

    ende.senden(json!({"type": "server_message", "data": {"type": "ice", "data": {"candidate": "r1"}}}));
    bis(|| peer.aufrufe().contains(&"kandidat".to_string())).await;
    assert_eq!(peer.aufrufe(), vec!["tracks", "angebot", "remote", "kandidat"]);

    let stati: Vec<SessionStatus> = a
        .ereignisse_leeren()
        .into_iter()
        .filter_map(|e| match e {
            SessionEreignis::StatusGeaendert(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        stati,
        vec![
            SessionStatus::Verbindend,
            SessionStatus::Registriert,
            SessionStatus::Beitretend,
            SessionStatus::Verhandelnd,
            SessionStatus::Aktiv,
        ]
    );
    assert_eq!(a.transport.versuche.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn video_erhalten_mit_lokalem_strom() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    a.bis_zum_angebot(&mut ende).await;

    let ereignis = a
        .ereignis_abwarten(|e| matches!(e, SessionEreignis::VideoErhalten(_)))
        .await;
    let SessionEreignis::VideoErhalten(stream) = ereignis else {
        unreachable!()
    };
    assert_eq!(stream.id(), "stream-0");
}

#[tokio::test(start_paused = true)]
async fn aktionen_im_falschen_zustand() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let ende = a.naechste_verbindung().await;

    // Vor hello
    assert!(matches!(
        a.handle.uebertragung_starten().await,
        Err(ClientError::UngueltigerZustand {
            status: SessionStatus::Verbindend,
            ..
        })
    ));

    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;
    assert!(matches!(
        a.handle.uebertragung_stoppen().await,
        Err(ClientError::UngueltigerZustand {
            status: SessionStatus::Registriert,
            ..
        })
    ));

    // Doppelter Start
    a.handle.uebertragung_starten().await.unwrap();
    assert!(matches!(
        a.handle.uebertragung_starten().await,
        Err(ClientError::UngueltigerZustand {
            status: SessionStatus::Beitretend,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn backoff_steigt_und_wird_durch_hello_zurueckgesetzt() {
    let start = Instant::now();
    let mut a = aufbauen(SessionKonfiguration::viewer(), 3);

    for erwartet in 1..=3u32 {
        let ereignis = a.ereignis_abwarten(ist_versuch).await;
        let SessionEreignis::VerbindungsVersuch {
            versuch,
            verzoegerung,
        } = ereignis
        else {
            unreachable!()
        };
        assert_eq!(versuch, erwartet);
        assert_eq!(verzoegerung, Duration::from_secs(u64::from(erwartet)));
    }

    let ende = a.naechste_verbindung().await;
    assert!(start.elapsed() >= Duration::from_secs(6));
    assert_eq!(a.transport.versuche.load(Ordering::SeqCst), 4);

    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    // Verbindungsverlust nach hello beginnt wieder beim ersten Versuch
    drop(ende);
    let ereignis = a.ereignis_abwarten(ist_versuch).await;
    assert!(matches!(
        ereignis,
        SessionEreignis::VerbindungsVersuch { versuch: 1, verzoegerung } if verzoegerung == Duration::from_secs(1)
    ));
    assert_eq!(a.handle.eigene_id(), None);
    a.naechste_verbindung().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_ist_gedeckelt() {
    let konfig = SessionKonfiguration {
        backoff_einheit: Duration::from_secs(10),
        backoff_maximum: Duration::from_secs(15),
        ..SessionKonfiguration::viewer()
    };
    let mut a = aufbauen(konfig, 3);

    let mut verzoegerungen = Vec::new();
    for _ in 0..3 {
        if let SessionEreignis::VerbindungsVersuch { verzoegerung, .. } =
            a.ereignis_abwarten(ist_versuch).await
        {
            verzoegerungen.push(verzoegerung);
        }
    }
    assert_eq!(
        verzoegerungen,
        vec![
            Duration::from_secs(10),
            Duration::from_secs(15),
            Duration::from_secs(15)
        ]
    );
    a.naechste_verbindung().await;
}

#[tokio::test(start_paused = true)]
async fn abgelehnte_medien_starten_neu() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    a.quelle.ablehnen.store(true, Ordering::SeqCst);
    let mut ende = a.naechste_verbindung().await;

    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;
    a.handle.uebertragung_starten().await.unwrap();
    assert_eq!(ende.empfangen().await, json!({"type": "join"}));
    ende.senden(json!({"type": "join_ack"}));

    // Verlassen wird noch gemeldet, dann faellt die Verbindung
    assert_eq!(ende.empfangen().await, json!({"type": "client_disconnect"}));
    ende.wird_geschlossen().await;
    assert!(a.engine.peer(0).ist_geschlossen());

    a.naechste_verbindung().await;
    assert_eq!(a.handle.status(), SessionStatus::Verbindend);
}

#[tokio::test(start_paused = true)]
async fn fehlerhafter_kandidat_startet_neu() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    let peer = a.bis_zum_angebot(&mut ende).await;

    ende.senden(json!({"type": "server_message", "data": {"type": "ice", "data": {"candidate": "kaputt"}}}));
    a.naechste_verbindung().await;
    assert!(peer.ist_geschlossen());
    assert!(a.quelle.stream(0).ist_gestoppt());
}

#[tokio::test(start_paused = true)]
async fn fehlerhafte_antwort_startet_neu() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    a.bis_zum_angebot(&mut ende).await;

    ende.senden(json!({"type": "server_message", "data": {"type": "sdp", "data": {"type": "answer", "sdp": "kaputt"}}}));
    a.naechste_verbindung().await;
    assert_ne!(a.handle.status(), SessionStatus::Aktiv);
}

#[tokio::test(start_paused = true)]
async fn ungueltiges_json_startet_neu() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let ende = a.naechste_verbindung().await;
    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden_roh("kein json");
    assert!(matches!(
        a.ereignis_abwarten(ist_versuch).await,
        SessionEreignis::VerbindungsVersuch { versuch: 1, .. }
    ));
    a.naechste_verbindung().await;
}

#[tokio::test(start_paused = true)]
async fn unerwarteter_opcode_startet_neu() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let ende = a.naechste_verbindung().await;
    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden(json!({"type": "client_join", "data": {"peer": "x"}}));
    a.naechste_verbindung().await;
}

#[tokio::test(start_paused = true)]
async fn mehrere_fehler_planen_einen_neustart() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let ende = a.naechste_verbindung().await;
    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden_roh("kaputt 1");
    ende.senden_roh("kaputt 2");
    drop(ende);

    let _zweite = a.naechste_verbindung().await;
    a.keine_verbindung().await;

    let versuche: Vec<_> = a
        .ereignisse_leeren()
        .into_iter()
        .filter(ist_versuch)
        .collect();
    assert_eq!(versuche.len(), 1);
    assert_eq!(a.transport.versuche.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn join_abgelehnt() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    a.handle.uebertragung_starten().await.unwrap();
    assert_eq!(ende.empfangen().await, json!({"type": "join"}));
    ende.senden(json!({"type": "join_reject", "data": {"grund": "kein Broadcaster"}}));

    let ereignis = a
        .ereignis_abwarten(|e| matches!(e, SessionEreignis::JoinAbgelehnt { .. }))
        .await;
    assert!(matches!(ereignis, SessionEreignis::JoinAbgelehnt { grund } if grund == "kein Broadcaster"));
    assert_eq!(a.handle.status(), SessionStatus::Registriert);

    // Erneuter Versuch ist erlaubt
    a.handle.uebertragung_starten().await.unwrap();
    assert_eq!(ende.empfangen().await, json!({"type": "join"}));
    assert_eq!(a.engine.anzahl(), 0);
}

#[tokio::test(start_paused = true)]
async fn stoppen_und_neu_starten() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    let peer = a.bis_aktiv(&mut ende).await;

    a.handle.uebertragung_stoppen().await.unwrap();
    assert_eq!(a.handle.status(), SessionStatus::Registriert);
    assert_eq!(ende.empfangen().await, json!({"type": "client_disconnect"}));
    assert!(peer.ist_geschlossen());
    assert!(a.quelle.stream(0).ist_gestoppt());

    // Kein Neustart, die ID bleibt
    assert_eq!(a.handle.eigene_id(), Some(PeerId::from("v1")));
    a.keine_verbindung().await;

    a.handle.uebertragung_starten().await.unwrap();
    assert_eq!(ende.empfangen().await, json!({"type": "join"}));
}

#[tokio::test(start_paused = true)]
async fn zweites_join_ack_wird_ignoriert() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    a.bis_zum_angebot(&mut ende).await;

    ende.senden(json!({"type": "join_ack"}));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(a.engine.anzahl(), 1);
    assert_eq!(a.quelle.anzahl(), 1);
    assert_eq!(a.handle.status(), SessionStatus::Verhandelnd);
}

#[tokio::test(start_paused = true)]
async fn server_message_ohne_peer_wird_ignoriert() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let ende = a.naechste_verbindung().await;
    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden(json!({"type": "server_message", "data": {"type": "sdp", "data": {"type": "answer", "sdp": "x"}}}));
    a.keine_verbindung().await;
    assert_eq!(a.handle.status(), SessionStatus::Registriert);
}

#[tokio::test(start_paused = true)]
async fn beendete_medien_starten_neu() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    let peer = a.bis_aktiv(&mut ende).await;

    a.quelle.stream(0).beenden();
    assert_eq!(ende.empfangen().await, json!({"type": "client_disconnect"}));
    a.naechste_verbindung().await;
    assert!(peer.ist_geschlossen());
}

#[tokio::test(start_paused = true)]
async fn abbruch_waehrend_angebot_stoppt_strom() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    a.engine.angebot_haengt.store(true, Ordering::SeqCst);
    let mut ende = a.naechste_verbindung().await;

    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;
    a.handle.uebertragung_starten().await.unwrap();
    assert_eq!(ende.empfangen().await, json!({"type": "join"}));
    ende.senden(json!({"type": "join_ack"}));

    let quelle = Arc::clone(&a.quelle);
    bis(|| quelle.anzahl() == 1).await;
    assert!(!a.quelle.stream(0).ist_gestoppt());

    // Relay faellt weg, die haengende Vorbereitung wird abgebrochen
    drop(ende);
    a.naechste_verbindung().await;
    assert!(a.quelle.stream(0).ist_gestoppt());
}

#[tokio::test(start_paused = true)]
async fn beenden_ohne_reconnect() {
    let mut a = aufbauen(SessionKonfiguration::viewer(), 0);
    let mut ende = a.naechste_verbindung().await;
    ende.hello("v1");
    a.status_abwarten(SessionStatus::Registriert).await;

    a.handle.beenden().await;
    assert_eq!(a.handle.status(), SessionStatus::Getrennt);
    ende.wird_geschlossen().await;
    a.keine_verbindung().await;

    assert!(matches!(
        a.handle.uebertragung_starten().await,
        Err(ClientError::SessionBeendet)
    ));
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn broadcaster_verhandelt_pro_viewer() {
    let mut a = aufbauen(SessionKonfiguration::broadcaster(), 0);
    let mut ende = a.naechste_verbindung().await;
    ende.hello("server");
    a.status_abwarten(SessionStatus::Registriert).await;

    assert!(matches!(
        a.handle.uebertragung_starten().await,
        Err(ClientError::UngueltigerZustand { .. })
    ));

    ende.senden(json!({"type": "client_join", "data": {"peer": "v1"}}));
    let ereignis = a
        .ereignis_abwarten(|e| matches!(e, SessionEreignis::PeerVerbunden(_)))
        .await;
    assert!(matches!(ereignis, SessionEreignis::PeerVerbunden(p) if p == PeerId::from("v1")));
    assert_eq!(a.handle.status(), SessionStatus::Aktiv);

    let peer = a.engine.peer(0);
    assert_eq!(peer.melder.peer(), Some(&PeerId::from("v1")));

    // Angebot des Viewers -> Antwort an genau diesen Viewer
    ende.senden(json!({"type": "client_message", "data": {"peer": "v1", "type": "sdp", "data": {"type": "offer", "sdp": "o"}}}));
    assert_eq!(
        ende.empfangen().await,
        json!({"type": "server_message", "data": {"peer": "v1", "type": "sdp", "data": {"type": "answer", "sdp": "antwort"}}})
    );

    // Lokale Kandidaten tragen die Viewer-ID
    peer.melder.melden(Some(json!({"candidate": "b1"})));
    assert_eq!(
        ende.empfangen().await,
        json!({"type": "server_message", "data": {"peer": "v1", "type": "ice", "data": {"candidate": "b1"}}})
    );

    ende.senden(json!({"type": "client_message", "data": {"peer": "v1", "type": "ice", "data": {"candidate": "v"}}}));
    bis(|| peer.aufrufe().contains(&"kandidat".to_string())).await;

    ende.senden(json!({"type": "client_disconnect", "data": {"peer": "v1"}}));
    let ereignis = a
        .ereignis_abwarten(|e| matches!(e, SessionEreignis::PeerGetrennt(_)))
        .await;
    assert!(matches!(ereignis, SessionEreignis::PeerGetrennt(p) if p == PeerId::from("v1")));
    assert!(peer.ist_geschlossen());
    assert_eq!(a.handle.status(), SessionStatus::Registriert);
}

#[tokio::test(start_paused = true)]
async fn broadcaster_fehler_trifft_nur_einen_viewer() {
    let mut a = aufbauen(SessionKonfiguration::broadcaster(), 0);
    let mut ende = a.naechste_verbindung().await;
    ende.hello("server");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden(json!({"type": "client_join", "data": {"peer": "v1"}}));
    ende.senden(json!({"type": "client_join", "data": {"peer": "v2"}}));
    let engine = Arc::clone(&a.engine);
    bis(|| engine.anzahl() == 2).await;

    ende.senden(json!({"type": "client_message", "data": {"peer": "v1", "type": "sdp", "data": {"type": "offer", "sdp": "kaputt"}}}));
    let ereignis = a
        .ereignis_abwarten(|e| matches!(e, SessionEreignis::PeerGetrennt(_)))
        .await;
    assert!(matches!(ereignis, SessionEreignis::PeerGetrennt(p) if p == PeerId::from("v1")));
    assert!(a.engine.peer(0).ist_geschlossen());
    assert!(!a.engine.peer(1).ist_geschlossen());

    ende.senden(json!({"type": "client_message", "data": {"peer": "v2", "type": "sdp", "data": {"type": "offer", "sdp": "o"}}}));
    assert_eq!(ende.empfangen().await["data"]["peer"], "v2");
    assert_eq!(a.handle.status(), SessionStatus::Aktiv);
    a.keine_verbindung().await;
}

#[tokio::test(start_paused = true)]
async fn broadcaster_unbekannter_signaltyp_trifft_nur_einen_viewer() {
    let mut a = aufbauen(SessionKonfiguration::broadcaster(), 0);
    let mut ende = a.naechste_verbindung().await;
    ende.hello("server");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden(json!({"type": "client_join", "data": {"peer": "v1"}}));
    ende.senden(json!({"type": "client_join", "data": {"peer": "v2"}}));
    let engine = Arc::clone(&a.engine);
    bis(|| engine.anzahl() == 2).await;

    ende.senden(json!({"type": "client_message", "data": {"peer": "v1", "type": "unbekannt", "data": {}}}));
    let ereignis = a
        .ereignis_abwarten(|e| matches!(e, SessionEreignis::PeerGetrennt(_)))
        .await;
    assert!(matches!(ereignis, SessionEreignis::PeerGetrennt(p) if p == PeerId::from("v1")));
    assert!(a.engine.peer(0).ist_geschlossen());
    assert!(!a.engine.peer(1).ist_geschlossen());
    assert_eq!(a.handle.status(), SessionStatus::Aktiv);

    // Die Verbindung zum Relay bleibt bestehen, v2 verhandelt weiter
    ende.senden(json!({"type": "client_message", "data": {"peer": "v2", "type": "sdp", "data": {"type": "offer", "sdp": "o"}}}));
    assert_eq!(ende.empfangen().await["data"]["peer"], "v2");
    a.keine_verbindung().await;
}

#[tokio::test(start_paused = true)]
async fn broadcaster_verbindungsverlust_schliesst_alle_peers() {
    let mut a = aufbauen(SessionKonfiguration::broadcaster(), 0);
    let ende = a.naechste_verbindung().await;
    ende.hello("server");
    a.status_abwarten(SessionStatus::Registriert).await;

    ende.senden(json!({"type": "client_join", "data": {"peer": "v1"}}));
    ende.senden(json!({"type": "client_join", "data": {"peer": "v2"}}));
    let engine = Arc::clone(&a.engine);
    bis(|| engine.anzahl() == 2).await;

    drop(ende);
    a.naechste_verbindung().await;
    assert!(a.engine.peer(0).ist_geschlossen());
    assert!(a.engine.peer(1).ist_geschlossen());
}
