//! Schmale Strom-Schnittstelle fuer die Session-Schicht
//!
//! Die umgebende Call-/Session-Schicht konsumiert die Engine ausschliesslich
//! ueber zwei Adapter:
//! - [`AudioStrom`]: eine RTP-Richtung – Pakete hinein (`put`), Samples zum
//!   Abspielzeitpunkt heraus (`get`). Die Playout-Strategie wird einmal beim
//!   Aufbau gewaehlt (z.B. aus einer SIP-/Steuerungsentscheidung).
//! - [`KonferenzKanal`]: bindet eine Session an einen Mixer-Kanal; der
//!   Kanal wird beim Drop automatisch zurueckgegeben.
//!
//! `get` gibt eine negative Zahl zurueck, wenn der Strom beendet wurde;
//! es liest nie ausserhalb der Puffer und panict auch auf einem nie
//! initialisierten Strom nicht (dann kommt Stille).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sprechsaal_core::{Result, StreamId};

use crate::mixer::MultiPartyMixer;
use crate::playout::{Playout, PlayoutModus, PlayoutStrategie};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration eines Audio-Stroms
#[derive(Debug, Clone)]
pub struct AudioStromConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Playout-Strategie des Stroms
    pub modus: PlayoutModus,
}

impl Default for AudioStromConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            modus: PlayoutModus::Adaptiv,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioStrom
// ---------------------------------------------------------------------------

/// Eine RTP-Audio-Richtung: Paket-Eingang und getakteter Sample-Ausgang
///
/// Produzent (Paketankunft) und Konsument (Abspieltakt) laufen auf
/// verschiedenen Threads; ein Lock um die Strategie synchronisiert beide.
pub struct AudioStrom {
    id: StreamId,
    playout: Mutex<PlayoutStrategie>,
    beendet: AtomicBool,
}

impl AudioStrom {
    /// Baut einen Strom mit der gewaehlten Strategie
    pub fn neu(config: AudioStromConfig) -> Self {
        Self {
            id: StreamId::new(),
            playout: Mutex::new(PlayoutStrategie::neu(config.modus, config.sample_rate)),
            beendet: AtomicBool::new(false),
        }
    }

    /// Eindeutige Strom-ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Nimmt ein dekodiertes Paket auf
    ///
    /// `ref_ts` ist die lokale Referenzzeit des Empfaengers in Samples,
    /// `ts` der RTP-Zeitstempel, `talk_start` markiert Sprechbeginn nach
    /// einer gewollten Pause.
    pub fn put(&self, ref_ts: u32, ts: u32, pcm: &[i16], talk_start: bool) {
        if self.beendet.load(Ordering::Acquire) {
            return;
        }
        self.playout.lock().write(ref_ts, ts, pcm, talk_start);
    }

    /// Schreibt eine lokale Quelle (Ansage, Datei) zeitstempel-treu
    pub fn direct_put(&self, ts: u32, pcm: &[i16]) {
        if self.beendet.load(Ordering::Acquire) {
            return;
        }
        self.playout.lock().direct_write(ts, pcm);
    }

    /// Liest Samples zur Abspielzeit `ts`
    ///
    /// Rueckgabe: Anzahl gelieferter Samples, oder negativ wenn der Strom
    /// beendet ist.
    pub fn get(&self, ts: u32, out: &mut [i16]) -> isize {
        if self.beendet.load(Ordering::Acquire) {
            return -1;
        }
        self.playout.lock().read(ts, out) as isize
    }

    /// Beendet den Strom; weitere `get`-Aufrufe liefern negativ
    pub fn beenden(&self) {
        self.beendet.store(true, Ordering::Release);
        tracing::debug!(strom = %self.id, "Audio-Strom beendet");
    }
}

// ---------------------------------------------------------------------------
// KonferenzKanal
// ---------------------------------------------------------------------------

/// Bindung einer Session an einen Mixer-Kanal
///
/// Haelt den Mixer per `Arc`; beim Drop wird der Kanal zurueckgegeben.
pub struct KonferenzKanal {
    mixer: Arc<MultiPartyMixer>,
    kanal_id: u32,
}

impl KonferenzKanal {
    /// Tritt der Konferenz bei (legt einen Mixer-Kanal an)
    pub fn neu(mixer: Arc<MultiPartyMixer>) -> Self {
        let kanal_id = mixer.kanal_hinzufuegen();
        Self { mixer, kanal_id }
    }

    /// Id des zugewiesenen Mixer-Kanals
    pub fn kanal_id(&self) -> u32 {
        self.kanal_id
    }

    /// Mischt ein Paket dieser Session in die Konferenz ein
    pub fn senden(&self, ts: u32, pcm: &[i16], talk_start: bool) -> Result<()> {
        self.mixer.paket_einmischen(self.kanal_id, ts, pcm, talk_start)
    }

    /// Liest das Konferenzsignal ohne den eigenen Beitrag
    pub fn hoeren(&self, ts: u32, out: &mut [i16]) -> Result<()> {
        self.mixer.paket_abhoeren(self.kanal_id, ts, out)
    }
}

impl Drop for KonferenzKanal {
    fn drop(&mut self) {
        // Kanal kann bereits weg sein (Konferenz-Abbau): kein Fehler
        let _ = self.mixer.kanal_entfernen(self.kanal_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strom_liefert_pakete_zum_abspielzeitpunkt() {
        let strom = AudioStrom::neu(AudioStromConfig {
            sample_rate: 8000,
            modus: PlayoutModus::JitterPuffer,
        });
        let mut out = vec![0i16; 160];
        let mut nonzero = false;

        for i in 0..40u32 {
            strom.put(i * 160, 9000 + i * 160, &vec![777i16; 160], false);
            let n = strom.get(i * 160, &mut out);
            assert_eq!(n, 160);
            if out.iter().any(|&s| s == 777) {
                nonzero = true;
            }
        }
        assert!(nonzero, "Paketinhalt muss den Leser erreichen");
    }

    #[test]
    fn get_auf_frischem_strom_ist_stille_statt_absturz() {
        let strom = AudioStrom::neu(AudioStromConfig::default());
        let mut out = vec![55i16; 160];
        let n = strom.get(123_456, &mut out);
        assert!(n >= 0);
        assert!(out.iter().all(|&s| s == 0), "nie initialisiert heisst Stille");
    }

    #[test]
    fn beendeter_strom_liefert_negativ() {
        let strom = AudioStrom::neu(AudioStromConfig::default());
        strom.beenden();

        let mut out = vec![0i16; 160];
        assert_eq!(strom.get(0, &mut out), -1);
        // put nach dem Ende ist ein No-Op, kein Fehler
        strom.put(0, 0, &vec![1i16; 160], false);
    }

    #[test]
    fn konferenz_kanal_gibt_sich_beim_drop_zurueck() {
        let mixer = Arc::new(MultiPartyMixer::neu(8000));
        let a = KonferenzKanal::neu(Arc::clone(&mixer));
        let b = KonferenzKanal::neu(Arc::clone(&mixer));
        assert_eq!(mixer.anzahl_kanaele(), 2);
        assert_ne!(a.kanal_id(), b.kanal_id());

        drop(a);
        assert_eq!(mixer.anzahl_kanaele(), 1);
        drop(b);
        assert_eq!(mixer.anzahl_kanaele(), 0);
    }

    #[test]
    fn konferenz_sende_hoer_pfad() {
        let mixer = Arc::new(MultiPartyMixer::neu(8000));
        let a = KonferenzKanal::neu(Arc::clone(&mixer));
        let b = KonferenzKanal::neu(Arc::clone(&mixer));

        for i in 0..10u32 {
            a.senden(i * 160, &vec![4000i16; 160], false).unwrap();
            b.senden(i * 160, &vec![0i16; 160], false).unwrap();
        }

        let mut out = vec![0i16; 160];
        b.hoeren(5 * 160, &mut out).unwrap();
        assert!(out.iter().any(|&s| s != 0), "B muss A hoeren");

        a.hoeren(5 * 160, &mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0), "A hoert das stumme B nicht");
    }
}
