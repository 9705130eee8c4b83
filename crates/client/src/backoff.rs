//! Reconnect-Backoff
//!
//! Linear: nach dem n-ten Fehlschlag in Folge wird `n × einheit` gewartet,
//! hoechstens `maximum`. Ein erfolgreiches `hello` setzt den Zaehler zurueck.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    versuche: u32,
    einheit: Duration,
    maximum: Duration,
}

impl Backoff {
    pub fn neu(einheit: Duration, maximum: Duration) -> Self {
        Self {
            versuche: 0,
            einheit,
            maximum,
        }
    }

    /// Zaehlt einen Fehlschlag und gibt die Wartezeit bis zum naechsten Versuch zurueck
    pub fn fehlschlag(&mut self) -> Duration {
        self.versuche = self.versuche.saturating_add(1);
        self.verzoegerung()
    }

    /// Aktuelle Wartezeit (ohne den Zaehler zu veraendern)
    pub fn verzoegerung(&self) -> Duration {
        self.einheit.saturating_mul(self.versuche).min(self.maximum)
    }

    pub fn zuruecksetzen(&mut self) {
        self.versuche = 0;
    }

    /// Anzahl aufeinanderfolgender Fehlschlaege
    pub fn versuche(&self) -> u32 {
        self.versuche
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::neu(Duration::from_secs(1), Duration::from_secs(30))
    }
}
