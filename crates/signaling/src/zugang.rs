//! Zugangsliste fuer den Broadcaster-Pfad
//!
//! Optional darf sich der Broadcaster nur aus bestimmten Netzen anmelden.
//! Eine leere Liste deaktiviert die Pruefung.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::SignalingError;

/// Ein Netz in CIDR-Notation, z.B. `127.0.0.0/8` oder `::1/128`
///
/// Eine Adresse ohne Praefix steht fuer genau diesen Host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Netzbereich(IpNet);

impl Netzbereich {
    /// Prueft ob die Adresse in diesem Netz liegt
    ///
    /// IPv4-gemappte IPv6-Adressen (`::ffff:a.b.c.d`) werden wie IPv4 behandelt.
    pub fn enthaelt(&self, adresse: IpAddr) -> bool {
        self.0.contains(&normalisieren(adresse))
    }
}

impl FromStr for Netzbereich {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let eintrag = s.trim();
        if eintrag.contains('/') {
            eintrag
                .parse::<IpNet>()
                .map(Self)
                .map_err(|_| SignalingError::Konfiguration(format!("Ungueltiges Netz: {s}")))
        } else {
            let adresse: IpAddr = eintrag
                .parse()
                .map_err(|_| SignalingError::Konfiguration(format!("Ungueltige Adresse: {s}")))?;
            let praefix = if adresse.is_ipv4() { 32 } else { 128 };
            IpNet::new(adresse, praefix)
                .map(Self)
                .map_err(|_| SignalingError::Konfiguration(format!("Ungueltiger Praefix: {s}")))
        }
    }
}

impl std::fmt::Display for Netzbereich {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn normalisieren(adresse: IpAddr) -> IpAddr {
    match adresse {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(adresse),
        v4 => v4,
    }
}

// ---------------------------------------------------------------------------
// Zugangsliste
// ---------------------------------------------------------------------------

/// Liste erlaubter Netze (leer = alle erlaubt)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zugangsliste {
    netze: Vec<Netzbereich>,
}

impl Zugangsliste {
    /// Parst eine Liste von CIDR-Strings
    pub fn parsen<S: AsRef<str>>(eintraege: &[S]) -> Result<Self, SignalingError> {
        let netze = eintraege
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { netze })
    }

    /// Ist die Pruefung aktiv?
    pub fn ist_aktiv(&self) -> bool {
        !self.netze.is_empty()
    }

    pub fn erlaubt(&self, adresse: IpAddr) -> bool {
        !self.ist_aktiv() || self.netze.iter().any(|n| n.enthaelt(adresse))
    }
}
