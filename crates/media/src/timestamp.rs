//! Zirkulaere Zeitstempel-Arithmetik fuer 32-Bit-Sample-Zaehler
//!
//! Alle Puffer der Engine adressieren Samples ueber einen `u32`-Zeitstempel,
//! der pro Sample um eins weiterzaehlt und nach 2^32 Samples ueberlaeuft
//! (bei 8 kHz alle ~6 Tage). Vergleiche muessen deshalb zirkulaer erfolgen:
//! `a` liegt vor `b` genau dann, wenn die Wrap-Around-Differenz `a - b`
//! groesser als 2^31 ist. Naives `<` ist hier immer falsch.
//!
//! [`Ringindex`] buendelt die zweite Haelfte der Arithmetik: die Abbildung
//! eines Zeitstempels auf eine Pufferposition (Zweierpotenz-Maske). Jede
//! Ringstruktur der Engine rechnet darueber, nicht selbst.

/// Prueft ob `a` zirkulaer vor `b` liegt (`a < b` mit Wrap-Around)
#[inline]
pub fn ist_frueher(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) > u32::MAX / 2
}

/// Prueft ob `a` zirkulaer vor oder gleich `b` liegt
#[inline]
pub fn ist_frueher_gleich(a: u32, b: u32) -> bool {
    !ist_frueher(b, a)
}

/// Ringindex – bildet Zeitstempel auf Pufferpositionen ab
///
/// Die Kapazitaet muss eine Zweierpotenz sein; die Position ergibt sich aus
/// `ts & (kapazitaet - 1)`. Damit landet jeder Zeitstempel deterministisch
/// auf genau einem Slot, auch ueber den u32-Ueberlauf hinweg.
#[derive(Debug, Clone, Copy)]
pub struct Ringindex {
    maske: u32,
}

impl Ringindex {
    /// Erstellt einen Ringindex fuer die gegebene Kapazitaet (Zweierpotenz)
    pub fn neu(kapazitaet: u32) -> Self {
        assert!(
            kapazitaet.is_power_of_two(),
            "Ringkapazitaet muss Zweierpotenz sein"
        );
        Self {
            maske: kapazitaet - 1,
        }
    }

    /// Pufferposition des Zeitstempels
    #[inline]
    pub fn position(&self, ts: u32) -> usize {
        (ts & self.maske) as usize
    }

    /// Kapazitaet in Samples
    pub fn kapazitaet(&self) -> u32 {
        self.maske + 1
    }
}
