//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Der Task besitzt den Socket exklusiv; die Registry kennt nur
//! die Send-Queue und das Schliess-Token.
//!
//! ## Ablauf
//! ```text
//! TCP -> WebSocket-Handshake (Pfad merken) -> Zulassung
//!     -> Abgelehnt: Close-Frame, Ende
//!     -> Zugelassen: Lese-/Schreibschleife bis Socket-Ende, Token oder Shutdown
//!     -> MessageRouter::getrennt
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird, der Relay sie schliesst
    /// oder ein Shutdown-Signal eingeht.
    pub async fn verarbeiten(self, stream: TcpStream, shutdown_rx: watch::Receiver<bool>) {
        let peer_addr = self.peer_addr;
        if let Err(e) = self.sitzung(stream, shutdown_rx).await {
            tracing::debug!(peer = %peer_addr, fehler = %e, "Verbindung mit Fehler beendet");
        }
        tracing::debug!(peer = %peer_addr, "Verbindungs-Task beendet");
    }

    async fn sitzung(
        self,
        stream: TcpStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> SignalingResult<()> {
        let peer_addr = self.peer_addr;

        // Pfad wird waehrend des Handshakes gemerkt
        let mut pfad = String::new();
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                pfad = req.uri().path().to_string();
                Ok(resp)
            },
        )
        .await?;
        let (mut sink, mut eingehend) = ws.split();

        let (tx, mut sende_rx) = mpsc::channel::<String>(self.state.config.sende_queue_groesse);
        let token = CancellationToken::new();

        let router = &self.state.router;
        let ctx = match router.zulassen(&pfad, peer_addr, tx, token.clone()) {
            Ok(ctx) => ctx,
            Err(grund) => {
                tracing::info!(peer = %peer_addr, pfad = %pfad, grund = %grund, "Verbindung abgelehnt");
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
        };

        tracing::info!(
            peer = %peer_addr,
            id = %ctx.peer_id,
            rolle = %ctx.rolle,
            "Neue Verbindung"
        );

        let ergebnis: SignalingResult<()> = loop {
            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = eingehend.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => router.verarbeiten(&ctx, text.as_str()),
                        Some(Ok(Message::Binary(_))) => {
                            tracing::debug!(peer = %peer_addr, "Binaer-Frame ignoriert");
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!(peer = %peer_addr, id = %ctx.peer_id, "Verbindung vom Client getrennt");
                            break Ok(());
                        }
                        // Ping/Pong beantwortet tungstenite selbst
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                    }
                }

                // Ausgehende Nachricht aus der Send-Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = sink.send(Message::text(ausgehend)).await {
                        break Err(e.into());
                    }
                }

                // Relay schliesst die Verbindung (z.B. Broadcaster weg)
                _ = token.cancelled() => {
                    tracing::info!(peer = %peer_addr, id = %ctx.peer_id, "Verbindung vom Relay geschlossen");
                    break Ok(());
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        break Ok(());
                    }
                }
            }
        };

        router.getrennt(&ctx);

        // Bereits eingereihte Nachrichten noch zustellen, dann sauber schliessen
        if ergebnis.is_ok() {
            sende_rx.close();
            while let Some(rest) = sende_rx.recv().await {
                if sink.send(Message::text(rest)).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        }

        ergebnis
    }
}
