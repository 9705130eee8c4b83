//! Transport zum Relay
//!
//! Die Session spricht nur mit zwei Queues: ausgehende Text-Frames und
//! eingehende Text-Frames. Schliesst sich `eingehend`, gilt die Verbindung
//! als verloren. Wird `ausgehend` fallen gelassen, schliesst der Transport
//! den Socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ClientError, ClientResult};

/// Eine offene Verbindung zum Relay
#[derive(Debug)]
pub struct TransportVerbindung {
    pub ausgehend: mpsc::UnboundedSender<String>,
    pub eingehend: mpsc::UnboundedReceiver<String>,
}

/// Baut Verbindungen zum Relay auf
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn verbinden(&self) -> ClientResult<TransportVerbindung>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// WebSocket-Transport (ein Umschlag pro Text-Frame)
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// `url` z.B. `ws://localhost:8080/` (Viewer) oder `ws://localhost:8080/_server`
    pub fn neu(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn verbinden(&self) -> ClientResult<TransportVerbindung> {
        tracing::info!(url = %self.url, "Verbinde mit Relay");
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (ausgehend_tx, mut ausgehend_rx) = mpsc::unbounded_channel::<String>();
        let (eingehend_tx, eingehend_rx) = mpsc::unbounded_channel::<String>();

        // Schreiber: endet wenn die Session die Verbindung fallen laesst
        tokio::spawn(async move {
            while let Some(text) = ausgehend_rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    tracing::debug!(fehler = %e, "Senden an Relay fehlgeschlagen");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Leser: endet bei Close, Fehler oder wenn niemand mehr zuhoert
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if eingehend_tx.send(text.as_str().to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(fehler = %e, "Lesefehler vom Relay");
                        break;
                    }
                }
            }
            tracing::debug!("Relay-Verbindung geschlossen");
        });

        Ok(TransportVerbindung {
            ausgehend: ausgehend_tx,
            eingehend: eingehend_rx,
        })
    }
}
