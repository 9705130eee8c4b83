//! Wire-Format des Signaling-Protokolls
//!
//! Jede Nachricht ist ein JSON-Objekt in einem eigenen Text-Frame:
//!
//! ```text
//! { "type": <opcode>, "data"?: <opak> }
//! ```
//!
//! `data` wird als `RawValue` gehalten und nie interpretiert. Beim Kodieren
//! wird der Originaltext unveraendert wieder eingesetzt.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::control::OpCode;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Dekodieren eines Umschlags
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Kein wohlgeformtes JSON-Objekt
    #[error("Ungueltiges JSON: {0}")]
    Syntax(String),

    /// Feld `type` fehlt oder ist kein String
    #[error("Feld 'type' fehlt")]
    TypFehlt,

    /// `type` ist kein bekannter OpCode
    #[error("Unbekannter OpCode: {0}")]
    UnbekannterTyp(String),

    /// `data` passt nicht zur erwarteten Struktur
    #[error("Ungueltige Daten: {0}")]
    Daten(String),
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Umschlag einer Signaling-Nachricht
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    typ: OpCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Box<RawValue>>,
}

/// Roh-Darstellung fuer die zweistufige Validierung von `type`
#[derive(Deserialize)]
struct RohEnvelope {
    #[serde(rename = "type", default)]
    typ: Option<serde_json::Value>,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

impl Envelope {
    /// Erstellt einen Umschlag ohne Daten
    pub fn neu(typ: OpCode) -> Self {
        Self { typ, data: None }
    }

    /// Erstellt einen Umschlag mit serialisierten Daten
    pub fn mit_daten<T: Serialize>(typ: OpCode, daten: &T) -> serde_json::Result<Self> {
        let data = serde_json::value::to_raw_value(daten)?;
        Ok(Self {
            typ,
            data: Some(data),
        })
    }

    /// Dekodiert einen Umschlag aus Bytes
    pub fn decode(roh: &[u8]) -> Result<Self, DecodeError> {
        let roh: RohEnvelope =
            serde_json::from_slice(roh).map_err(|e| DecodeError::Syntax(e.to_string()))?;
        Self::aus_roh(roh)
    }

    /// Dekodiert einen Umschlag aus einem Text-Frame
    pub fn decode_str(text: &str) -> Result<Self, DecodeError> {
        let roh: RohEnvelope =
            serde_json::from_str(text).map_err(|e| DecodeError::Syntax(e.to_string()))?;
        Self::aus_roh(roh)
    }

    fn aus_roh(roh: RohEnvelope) -> Result<Self, DecodeError> {
        let name = match roh.typ {
            Some(serde_json::Value::String(name)) => name,
            _ => return Err(DecodeError::TypFehlt),
        };
        let typ = OpCode::aus_str(&name).ok_or(DecodeError::UnbekannterTyp(name))?;
        Ok(Self {
            typ,
            data: roh.data,
        })
    }

    /// Kodiert den Umschlag als JSON-Text
    ///
    /// `data` wird byte-genau uebernommen. OpCode und `RawValue` haben
    /// keinen Fehlerpfad beim Serialisieren.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// OpCode der Nachricht
    pub fn typ(&self) -> OpCode {
        self.typ
    }

    /// Unveraenderte Daten (falls vorhanden)
    pub fn daten_roh(&self) -> Option<&RawValue> {
        self.data.as_deref()
    }

    /// Liest `data` als konkreten Typ
    ///
    /// Fehlendes `data` wird wie `null` behandelt.
    pub fn daten_als<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        let text = self.data.as_deref().map(RawValue::get).unwrap_or("null");
        serde_json::from_str(text).map_err(|e| DecodeError::Daten(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
