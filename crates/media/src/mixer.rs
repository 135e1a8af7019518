//! N-Wege-Konferenzmischer
//!
//! Haelt pro Teilnehmer-Kanal einen eigenen Ringpuffer und zusaetzlich eine
//! gemeinsame 32-Bit-Mischsumme im selben Zeitstempelraum. Eingehende
//! Pakete werden in O(Paketlaenge) auf die Summe addiert; beim Abhoeren
//! wird der eigene Beitrag des Kanals wieder abgezogen, so dass sich kein
//! Teilnehmer selbst hoert.
//!
//! ## Verdeckung
//! Kurze Luecken im Paketstrom eines Kanals (bis 4 Frames) werden per
//! Tonhoehen-Synthese gefuellt – sowohl im Kanalpuffer als auch in der
//! Mischsumme, damit Subtraktion und Summe konsistent bleiben.
//!
//! ## Pegel
//! Beim Abhoeren skaliert eine selbstjustierende Festkomma-Verstaerkung
//! (Faktor/64): sie waechst um einen Schritt pro Frame bis 64, und wird bei
//! drohender Uebersteuerung exakt auf den Wert zurueckgerechnet, bei dem
//! das lauteste Sample die Aussteuerungsgrenze gerade beruehrt.
//!
//! ## Nebenlaeufigkeit
//! Ein einziges Lock schuetzt Kanal-Map, Kanalpuffer und Mischsumme; es
//! wird nur fuer die Dauer eines put/get gehalten, nie ueber blockierende
//! Aufrufe hinweg. Kanal-Abbau ist dadurch jederzeit nebenlaeufig zu
//! laufenden put/get-Aufrufen moeglich.

use std::collections::HashMap;

use parking_lot::Mutex;
use sprechsaal_core::{Result, SprechsaalError};

use crate::plc::LossConcealer;
use crate::sample_array::{SampleArray, MAX_PAKET_SAMPLES};
use crate::timestamp::ist_frueher;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Aussteuerungsgrenze fuer gemischte Samples
const MAX_LINEAR_SAMPLE: i32 = 32737;

/// Fester Lese-Rueckstand beim Abhoeren (4 Frames), damit der eigene
/// Beitrag garantiert schon geschrieben ist
const ABHOER_VERZOEGERUNG: u32 = 4 * 160;

/// Maximale Luecke, die pro Kanal verdeckt wird (Samples)
const MAX_KANAL_LUECKE: u32 = 4 * 160;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Mischers (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct MixerStatistik {
    /// Aktive Kanaele
    pub kanaele: usize,
    /// Insgesamt verdeckte Frames ueber alle Kanaele
    pub verdeckte_frames: u64,
    /// Aktueller Verstaerkungsfaktor (n/64)
    pub verstaerkung: i32,
}

// ---------------------------------------------------------------------------
// Kanal
// ---------------------------------------------------------------------------

/// Zustand eines Teilnehmer-Kanals
struct MischKanal {
    puffer: SampleArray<i16>,
    /// Ende des zuletzt eingemischten Pakets
    letzter_ts: Option<u32>,
    fec: LossConcealer,
}

impl MischKanal {
    fn neu(sample_rate: u32) -> Self {
        Self {
            puffer: SampleArray::neu(),
            letzter_ts: None,
            fec: LossConcealer::neu(sample_rate),
        }
    }
}

// ---------------------------------------------------------------------------
// MultiPartyMixer
// ---------------------------------------------------------------------------

struct MixerInner {
    kanaele: HashMap<u32, MischKanal>,
    /// Naechster Kandidat der Id-Vergabe (monoton, lebende Ids werden
    /// uebersprungen)
    naechste_id: u32,
    mischsumme: SampleArray<i32>,
    /// Festkomma-Verstaerkung (n/64), Start 16
    verstaerkung: i32,
    verdeckte_frames: u64,
    // Scratch-Puffer, einmal angelegt
    summen_scratch: Vec<i32>,
    paket_scratch: Vec<i16>,
    plc_frame: Vec<i16>,
}

/// Konferenzmischer – thread-safe, gemeinsam nutzbar per `Arc`
pub struct MultiPartyMixer {
    inner: Mutex<MixerInner>,
    sample_rate: u32,
}

impl MultiPartyMixer {
    /// Erstellt einen leeren Mischer fuer die gegebene Abtastrate
    pub fn neu(sample_rate: u32) -> Self {
        let frame = 10 * sample_rate as usize / 1000;
        Self {
            inner: Mutex::new(MixerInner {
                kanaele: HashMap::new(),
                naechste_id: 0,
                mischsumme: SampleArray::neu(),
                verstaerkung: 16,
                verdeckte_frames: 0,
                summen_scratch: vec![0; MAX_PAKET_SAMPLES],
                paket_scratch: vec![0; MAX_PAKET_SAMPLES],
                plc_frame: vec![0; frame],
            }),
            sample_rate,
        }
    }

    /// Legt einen neuen Kanal an und gibt seine Id zurueck
    pub fn kanal_hinzufuegen(&self) -> u32 {
        let mut inner = self.inner.lock();
        while inner.kanaele.contains_key(&inner.naechste_id) {
            inner.naechste_id = inner.naechste_id.wrapping_add(1);
        }
        let id = inner.naechste_id;
        inner.naechste_id = inner.naechste_id.wrapping_add(1);
        let kanal = MischKanal::neu(self.sample_rate);
        inner.kanaele.insert(id, kanal);
        tracing::debug!(kanal = id, "Mixer-Kanal angelegt");
        id
    }

    /// Entfernt einen Kanal
    pub fn kanal_entfernen(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .kanaele
            .remove(&id)
            .ok_or(SprechsaalError::KanalNichtGefunden(id))?;
        tracing::debug!(kanal = id, "Mixer-Kanal entfernt");
        Ok(())
    }

    /// Mischt ein Paket des Kanals in Kanalpuffer und Mischsumme ein
    ///
    /// Eine kurze Luecke seit dem letzten Paket wird zuvor per Synthese
    /// gefuellt, ausser `talk_start` markiert sie als gewollte Sprechpause.
    pub fn paket_einmischen(
        &self,
        id: u32,
        ts: u32,
        pcm: &[i16],
        talk_start: bool,
    ) -> Result<()> {
        if pcm.is_empty() {
            return Ok(());
        }
        assert!(
            pcm.len() <= MAX_PAKET_SAMPLES,
            "Paketlaenge ueberschreitet den statischen Puffer"
        );

        let mut guard = self.inner.lock();
        let MixerInner {
            kanaele,
            mischsumme,
            verdeckte_frames,
            summen_scratch,
            paket_scratch,
            plc_frame,
            ..
        } = &mut *guard;
        let kanal = kanaele
            .get_mut(&id)
            .ok_or(SprechsaalError::KanalNichtGefunden(id))?;
        let frame = kanal.fec.frame_len();

        // Luecke seit dem letzten Paket verdecken
        if let Some(mut letzter) = kanal.letzter_ts {
            if ist_frueher(letzter, ts)
                && !talk_start
                && ts.wrapping_sub(letzter) <= MAX_KANAL_LUECKE
            {
                while ist_frueher(letzter, ts) {
                    kanal.fec.verdecken(&mut plc_frame[..]);
                    kanal.puffer.put(letzter, &plc_frame[..]);

                    mischsumme.get(letzter, &mut summen_scratch[..frame]);
                    misch_addieren(&mut summen_scratch[..frame], &plc_frame[..]);
                    mischsumme.put(letzter, &summen_scratch[..frame]);

                    *verdeckte_frames += 1;
                    letzter = letzter.wrapping_add(frame as u32);
                }
                tracing::debug!(kanal = id, ts, "Kanal-Luecke verdeckt");
            }
        }

        // Echtes Paket durch die Verdeckungs-Historie fuehren (verzoegert
        // das Signal um eine Viertelwelle, haelt die Synthese konsistent)
        let daten = &mut paket_scratch[..pcm.len()];
        daten.copy_from_slice(pcm);
        for chunk in daten.chunks_exact_mut(frame) {
            kanal.fec.gutes_frame(chunk);
        }

        kanal.puffer.put(ts, daten);

        mischsumme.get(ts, &mut summen_scratch[..daten.len()]);
        misch_addieren(&mut summen_scratch[..daten.len()], daten);
        mischsumme.put(ts, &summen_scratch[..daten.len()]);

        kanal.letzter_ts = Some(ts.wrapping_add(pcm.len() as u32));
        Ok(())
    }

    /// Liest das Konferenzsignal fuer einen Kanal: Mischsumme minus eigener
    /// Beitrag, mit Verstaerkungsregelung gegen Uebersteuerung
    pub fn paket_abhoeren(&self, id: u32, ts: u32, out: &mut [i16]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        assert!(
            out.len() <= MAX_PAKET_SAMPLES,
            "Leselaenge ueberschreitet den statischen Puffer"
        );

        let mut guard = self.inner.lock();
        let MixerInner {
            kanaele,
            mischsumme,
            verstaerkung,
            summen_scratch,
            ..
        } = &mut *guard;
        let kanal = kanaele
            .get(&id)
            .ok_or(SprechsaalError::KanalNichtGefunden(id))?;

        // Fester Rueckstand: dort ist der eigene Beitrag sicher geschrieben
        let ts = ts.wrapping_sub(ABHOER_VERZOEGERUNG);

        mischsumme.get(ts, &mut summen_scratch[..out.len()]);
        kanal.puffer.get(ts, out);
        misch_subtrahieren(&mut summen_scratch[..out.len()], out);
        skalieren(verstaerkung, out, &summen_scratch[..out.len()]);
        Ok(())
    }

    /// Anzahl aktiver Kanaele
    pub fn anzahl_kanaele(&self) -> usize {
        self.inner.lock().kanaele.len()
    }

    /// Gibt die aktuellen Statistiken zurueck
    pub fn statistik(&self) -> MixerStatistik {
        let inner = self.inner.lock();
        MixerStatistik {
            kanaele: inner.kanaele.len(),
            verdeckte_frames: inner.verdeckte_frames,
            verstaerkung: inner.verstaerkung,
        }
    }
}

// ---------------------------------------------------------------------------
// Misch-Arithmetik
// ---------------------------------------------------------------------------

/// Addiert ein 16-Bit-Signal auf die 32-Bit-Summe
fn misch_addieren(summe: &mut [i32], quelle: &[i16]) {
    for (s, &q) in summe.iter_mut().zip(quelle.iter()) {
        *s += i32::from(q);
    }
}

/// Zieht ein 16-Bit-Signal von der 32-Bit-Summe ab
fn misch_subtrahieren(summe: &mut [i32], quelle: &[i16]) {
    for (s, &q) in summe.iter_mut().zip(quelle.iter()) {
        *s -= i32::from(q);
    }
}

/// Festkomma-Verstaerkung (Faktor/64) mit Uebersteuerungsschutz
///
/// Der Faktor waechst um 1 pro Frame bis 64. Wuerde ein Sample die Grenze
/// reissen, wird der Faktor exakt so zurueckgerechnet, dass das Sample die
/// Grenze gerade beruehrt, und vorzeichenerhaltend geklemmt.
fn skalieren(verstaerkung: &mut i32, out: &mut [i16], summe: &[i32]) {
    if *verstaerkung < 64 {
        *verstaerkung += 1;
    }

    for (o, &s32) in out.iter_mut().zip(summe.iter()) {
        let mut s = (s32 * *verstaerkung) >> 6;
        if s.abs() > MAX_LINEAR_SAMPLE {
            *verstaerkung = ((MAX_LINEAR_SAMPLE << 6) / s32).abs();
            s = if s < 0 {
                -MAX_LINEAR_SAMPLE
            } else {
                MAX_LINEAR_SAMPLE
            };
        }
        *o = s as i16;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SR: u32 = 8000;

    fn ton_paket(start_sample: u32, amplitude: f32) -> Vec<i16> {
        (0..160)
            .map(|i| {
                let t = (start_sample as usize + i) as f32;
                (amplitude * (2.0 * std::f32::consts::PI * 1000.0 * t / SR as f32).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn kanal_ids_monoton_und_lebende_uebersprungen() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();
        let b = mixer.kanal_hinzufuegen();
        let c = mixer.kanal_hinzufuegen();
        assert_eq!((a, b, c), (0, 1, 2));

        mixer.kanal_entfernen(b).unwrap();
        // Vergabe laeuft monoton weiter, statt Id 1 sofort zu recyceln
        let d = mixer.kanal_hinzufuegen();
        assert_eq!(d, 3);
        assert_eq!(mixer.anzahl_kanaele(), 3);
    }

    #[test]
    fn unbekannter_kanal_ist_fehler() {
        let mixer = MultiPartyMixer::neu(SR);
        let mut out = vec![0i16; 160];

        assert!(matches!(
            mixer.paket_abhoeren(99, 0, &mut out),
            Err(SprechsaalError::KanalNichtGefunden(99))
        ));
        assert!(mixer.paket_einmischen(99, 0, &[0i16; 160], false).is_err());
        assert!(mixer.kanal_entfernen(99).is_err());
    }

    #[test]
    fn kanal_hoert_sich_nicht_selbst() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();

        for i in 0..10u32 {
            let ts = i * 160;
            mixer
                .paket_einmischen(a, ts, &ton_paket(ts, 20000.0), false)
                .unwrap();
        }

        // Ueberall im beschriebenen Bereich: Summe minus eigener Beitrag = 0
        let mut out = vec![0i16; 160];
        for i in 4..10u32 {
            mixer.paket_abhoeren(a, i * 160, &mut out).unwrap();
            assert!(
                out.iter().all(|&s| s == 0),
                "eigener Beitrag muss sich exakt herauskuerzen"
            );
        }
    }

    #[test]
    fn teilnehmer_hoert_den_anderen_mit_anlaufender_verstaerkung() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();
        let b = mixer.kanal_hinzufuegen();

        for i in 0..60u32 {
            let ts = i * 160;
            mixer
                .paket_einmischen(a, ts, &vec![10000i16; 160], false)
                .unwrap();
            mixer.paket_einmischen(b, ts, &vec![0i16; 160], false).unwrap();
        }

        let mut out = vec![0i16; 160];

        // Erste Abfrage: Verstaerkung ist von 16 auf 17 angelaufen
        mixer.paket_abhoeren(b, 4 * 160, &mut out).unwrap();
        let erwartet = (10000 * 17) >> 6;
        // Durch die Historien-Verzoegerung beginnt der Beitrag von A mit
        // einer kurzen Stille-Flanke; hinten im Frame steht der volle Pegel
        assert_eq!(out[159] as i32, erwartet, "Anfangsverstaerkung 17/64");

        // Verstaerkung laeuft pro Frame um einen Schritt auf 64/64
        let mut letzte = 0i32;
        for i in 5..56u32 {
            mixer.paket_abhoeren(b, i * 160, &mut out).unwrap();
            letzte = out[159] as i32;
        }
        assert_eq!(letzte, 10000, "nach dem Hochlaufen muss der volle Pegel anliegen");

        // Und A hoert das stumme B: nichts
        mixer.paket_abhoeren(a, 30 * 160, &mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn agc_verhindert_uebersteuerung_bei_vollpegel() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();
        let b = mixer.kanal_hinzufuegen();
        let c = mixer.kanal_hinzufuegen();

        for i in 0..60u32 {
            let ts = i * 160;
            mixer
                .paket_einmischen(a, ts, &vec![32000i16; 160], false)
                .unwrap();
            mixer
                .paket_einmischen(b, ts, &vec![32000i16; 160], false)
                .unwrap();
        }

        // C hoert die Summe beider Vollpegel-Kanaele: nie ueber der Grenze
        let mut out = vec![0i16; 160];
        for i in 4..56u32 {
            mixer.paket_abhoeren(c, i * 160, &mut out).unwrap();
            for &s in &out {
                assert!(
                    (s as i32).abs() <= MAX_LINEAR_SAMPLE,
                    "Sample {} reisst die Aussteuerungsgrenze",
                    s
                );
            }
        }

        // Die Verstaerkung wurde tatsaechlich zurueckgeregelt
        assert!(mixer.statistik().verstaerkung < 64);
    }

    #[test]
    fn kurze_luecke_wird_verdeckt() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();

        mixer
            .paket_einmischen(a, 0, &ton_paket(0, 12000.0), false)
            .unwrap();
        // Paket [160, 320) geht verloren; naechstes Paket traegt die Luecke
        mixer
            .paket_einmischen(a, 320, &ton_paket(320, 12000.0), false)
            .unwrap();

        assert_eq!(
            mixer.statistik().verdeckte_frames,
            2,
            "160 Samples Luecke sind zwei 10-ms-Frames"
        );

        // Ein Mithoerer bekommt in der Luecke Synthese statt Stille
        let b = mixer.kanal_hinzufuegen();
        let mut out = vec![0i16; 160];
        mixer
            .paket_abhoeren(b, 160 + ABHOER_VERZOEGERUNG, &mut out)
            .unwrap();
        assert!(
            out.iter().any(|&s| s != 0),
            "verdeckter Bereich darf nicht stumm sein"
        );
    }

    #[test]
    fn talk_start_unterdrueckt_lueckenverdeckung() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();

        mixer
            .paket_einmischen(a, 0, &ton_paket(0, 12000.0), false)
            .unwrap();
        // Sprechpause, dann gewollter Neubeginn
        mixer
            .paket_einmischen(a, 480, &ton_paket(480, 12000.0), true)
            .unwrap();

        assert_eq!(mixer.statistik().verdeckte_frames, 0);
    }

    #[test]
    fn zu_lange_luecke_wird_nicht_verdeckt() {
        let mixer = MultiPartyMixer::neu(SR);
        let a = mixer.kanal_hinzufuegen();

        mixer
            .paket_einmischen(a, 0, &ton_paket(0, 12000.0), false)
            .unwrap();
        // Luecke jenseits der Toleranz von 4 Frames
        mixer
            .paket_einmischen(a, 2000, &ton_paket(2000, 12000.0), false)
            .unwrap();

        assert_eq!(mixer.statistik().verdeckte_frames, 0);
    }

    #[test]
    fn abbau_nebenlaeufig_zu_putget() {
        let mixer = Arc::new(MultiPartyMixer::neu(SR));
        let a = mixer.kanal_hinzufuegen();
        let b = mixer.kanal_hinzufuegen();

        let schreiber = {
            let mixer = Arc::clone(&mixer);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    // Kanal kann waehrenddessen verschwinden: Fehler ist ok,
                    // Absturz nicht
                    let _ = mixer.paket_einmischen(a, i * 160, &[1000i16; 160], false);
                }
            })
        };
        let hoerer = {
            let mixer = Arc::clone(&mixer);
            std::thread::spawn(move || {
                let mut out = vec![0i16; 160];
                for i in 0..500u32 {
                    let _ = mixer.paket_abhoeren(b, i * 160, &mut out);
                }
            })
        };

        mixer.kanal_entfernen(a).unwrap();
        schreiber.join().unwrap();
        hoerer.join().unwrap();
        assert_eq!(mixer.anzahl_kanaele(), 1);
    }
}
