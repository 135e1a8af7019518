//! Playout-Verzoegerungsschaetzer auf Basis von Ordnungsstatistiken
//!
//! Haelt ein gleitendes Fenster der letzten Beobachtungen "wie weit lag ein
//! Paket hinter der Referenzzeit" und waehlt als Ziel-Offset diejenige
//! Ordnungsstatistik, die der gewuenschten Verlusttoleranz entspricht: bei
//! 10% Toleranz das 90. Perzentil, linear interpoliert zwischen den beiden
//! umschliessenden Werten. Faellt die Zielposition auf den Rand des
//! Fensters, wird mit +-2 Standardabweichungen extrapoliert.
//!
//! Der Schaetzer selbst kennt keine Resync-Politik; Jitter Buffer und
//! adaptives Playout entscheiden selbst, wann sie dem Zielwert folgen.

use std::collections::BTreeMap;

use crate::stats::StddevWert;

/// Fenstergroesse der Ordnungsstatistik (Beobachtungen)
pub const ORDNUNGS_FENSTER: usize = 35;

/// Ziel-Verlustrate: dieser Anteil der Pakete darf spaeter eintreffen als
/// der geschaetzte Offset
pub const ZIEL_VERLUSTRATE: f64 = 0.1;

/// Verzoegerungsschaetzer ueber ein gleitendes Ordnungsstatistik-Fenster
pub struct DelaySchaetzer {
    fenster: [i32; ORDNUNGS_FENSTER],
    belegt: usize,
    idx: usize,
    /// Multiset der Fensterwerte: Wert -> Anzahl
    sortiert: BTreeMap<i32, usize>,
    verlustrate: f64,
}

impl DelaySchaetzer {
    pub fn neu() -> Self {
        Self::mit_verlustrate(ZIEL_VERLUSTRATE)
    }

    pub fn mit_verlustrate(verlustrate: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&verlustrate),
            "Verlustrate muss in [0, 1) liegen"
        );
        Self {
            fenster: [0; ORDNUNGS_FENSTER],
            belegt: 0,
            idx: 0,
            sortiert: BTreeMap::new(),
            verlustrate,
        }
    }

    fn entfernen(&mut self, wert: i32) {
        if let Some(anzahl) = self.sortiert.get_mut(&wert) {
            *anzahl -= 1;
            if *anzahl == 0 {
                self.sortiert.remove(&wert);
            }
        }
    }

    /// r-tes und (r+1)-tes Element des Multisets (1-basiert), `r < belegt`
    fn ordnungsstatistik(&self, r: usize) -> (i32, i32) {
        let mut i = 0usize;
        let mut d_r = 0i32;
        for (&wert, &anzahl) in &self.sortiert {
            for _ in 0..anzahl {
                i += 1;
                if i == r {
                    d_r = wert;
                } else if i == r + 1 {
                    return (d_r, wert);
                }
            }
        }
        // r < belegt garantiert, dass die Schleife vorher zurueckkehrt
        unreachable!("Ordnungsstatistik ausserhalb des Fensters");
    }

    /// Nimmt die Beobachtung `ref_ts - ts` auf und gibt den Ziel-Offset
    /// (in Samples, als Wrap-Around-u32) zurueck
    pub fn naechste_verzoegerung(&mut self, ref_ts: u32, ts: u32) -> u32 {
        let n = ref_ts.wrapping_sub(ts) as i32;

        if self.belegt == ORDNUNGS_FENSTER {
            let alt = self.fenster[self.idx];
            self.entfernen(alt);
        } else {
            self.belegt += 1;
        }
        self.fenster[self.idx] = n;
        *self.sortiert.entry(n).or_insert(0) += 1;
        self.idx = (self.idx + 1) % ORDNUNGS_FENSTER;

        let anzahl = self.belegt;
        let r = ((anzahl as f64 + 1.0) * (1.0 - self.verlustrate)) as usize;

        let (d_r, d_r1) = if r == 0 || r >= anzahl {
            // Zielposition liegt auf dem Rand: mit 2 Standardabweichungen
            // ueber das Fenster hinaus extrapolieren
            let mut std = StddevWert::neu();
            for &w in &self.fenster[..self.belegt] {
                std.push(w as f64);
            }
            let streuung = (2.0 * std.stddev()) as i32;

            if r == 0 {
                let min = *self.sortiert.keys().next().expect("Fenster nicht leer");
                (min - streuung, min)
            } else {
                let max = *self.sortiert.keys().next_back().expect("Fenster nicht leer");
                (max, max + streuung)
            }
        } else {
            self.ordnungsstatistik(r)
        };

        let bruchteil = (anzahl as f64 + 1.0) * (1.0 - self.verlustrate) - r as f64;
        let d = d_r as f64 + (d_r1 - d_r) as f64 * bruchteil;
        d as i32 as u32
    }
}
