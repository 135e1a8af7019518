//! Periodischer Takttreiber fuer Medienstroeme
//!
//! Treibt alle angemeldeten Stroeme mit einem gemeinsamen 10-ms-Takt und
//! einer fortlaufenden 32-Bit-Sample-Uhr. Die Session-Schicht haengt hier
//! ihre Lese-/Schreib-Zyklen ein (Playout lesen, Mixer abhoeren, an den
//! RTP-Sender uebergeben).
//!
//! ## Betrieb
//! Ein dedizierter Worker-Thread; Anmeldung und Abmeldung laufen lock-frei
//! ueber eine DashMap, das Herunterfahren ueber einen Steuerkanal. Der
//! Takt-Callback darf nicht blockieren – er muss innerhalb des Taktbudgets
//! zurueckkehren.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use dashmap::DashMap;
use sprechsaal_core::StreamId;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Medien-Prozessors
#[derive(Debug, Clone)]
pub struct MedienProzessorConfig {
    /// Abtastrate der Sample-Uhr in Hz
    pub sample_rate: u32,
    /// Taktintervall
    pub takt: Duration,
}

impl Default for MedienProzessorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            takt: Duration::from_millis(10),
        }
    }
}

// ---------------------------------------------------------------------------
// MedienGlied
// ---------------------------------------------------------------------------

/// Vom Prozessor getaktetes Glied der Medienkette
pub trait MedienGlied: Send + Sync + 'static {
    /// Wird einmal pro Takt mit der aktuellen Sample-Uhr aufgerufen
    fn takt(&self, ts: u32);
}

// ---------------------------------------------------------------------------
// MedienProzessor
// ---------------------------------------------------------------------------

enum Steuerbefehl {
    Stopp,
}

/// Takttreiber mit eigenem Worker-Thread
pub struct MedienProzessor {
    glieder: Arc<DashMap<StreamId, Arc<dyn MedienGlied>>>,
    steuerung: Sender<Steuerbefehl>,
    worker: Option<JoinHandle<()>>,
}

impl MedienProzessor {
    /// Startet den Prozessor mit eigenem Worker-Thread
    pub fn neu(config: MedienProzessorConfig) -> Self {
        let glieder: Arc<DashMap<StreamId, Arc<dyn MedienGlied>>> = Arc::new(DashMap::new());
        let (steuerung, befehle) = bounded(4);

        let schritt =
            (config.sample_rate as u64 * config.takt.as_millis() as u64 / 1000).max(1) as u32;
        let takt = config.takt;
        let worker_glieder = Arc::clone(&glieder);

        let worker = std::thread::Builder::new()
            .name("medien-prozessor".into())
            .spawn(move || {
                let mut ts: u32 = 0;
                let mut naechster = Instant::now() + takt;
                loop {
                    match befehle.recv_deadline(naechster) {
                        Ok(Steuerbefehl::Stopp) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    naechster += takt;

                    for eintrag in worker_glieder.iter() {
                        eintrag.value().takt(ts);
                    }
                    ts = ts.wrapping_add(schritt);
                }
                tracing::debug!("Medien-Prozessor beendet");
            })
            .expect("Medien-Prozessor-Thread muss starten");

        Self {
            glieder,
            steuerung,
            worker: Some(worker),
        }
    }

    /// Meldet ein Glied zum Takten an
    pub fn anmelden(&self, id: StreamId, glied: Arc<dyn MedienGlied>) {
        self.glieder.insert(id, glied);
        tracing::debug!(strom = %id, "Medienglied angemeldet");
    }

    /// Meldet ein Glied ab; `true` wenn es angemeldet war
    pub fn abmelden(&self, id: &StreamId) -> bool {
        let entfernt = self.glieder.remove(id).is_some();
        if entfernt {
            tracing::debug!(strom = %id, "Medienglied abgemeldet");
        }
        entfernt
    }

    /// Anzahl angemeldeter Glieder
    pub fn anzahl(&self) -> usize {
        self.glieder.len()
    }
}

impl Drop for MedienProzessor {
    fn drop(&mut self) {
        let _ = self.steuerung.send(Steuerbefehl::Stopp);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Zaehler {
        takte: AtomicU32,
        uhrwerte: Mutex<Vec<u32>>,
    }

    impl MedienGlied for Zaehler {
        fn takt(&self, ts: u32) {
            self.takte.fetch_add(1, Ordering::Relaxed);
            self.uhrwerte.lock().push(ts);
        }
    }

    #[test]
    fn prozessor_taktet_angemeldete_glieder() {
        let prozessor = MedienProzessor::neu(MedienProzessorConfig {
            sample_rate: 8000,
            takt: Duration::from_millis(5),
        });
        let zaehler = Arc::new(Zaehler {
            takte: AtomicU32::new(0),
            uhrwerte: Mutex::new(Vec::new()),
        });
        prozessor.anmelden(StreamId::new(), Arc::clone(&zaehler) as Arc<dyn MedienGlied>);

        std::thread::sleep(Duration::from_millis(100));
        drop(prozessor);

        let takte = zaehler.takte.load(Ordering::Relaxed);
        assert!(takte >= 5, "in 100 ms muessen mehrere Takte laufen: {}", takte);

        // Sample-Uhr laeuft in gleichmaessigen Schritten (5 ms bei 8 kHz = 40)
        let uhrwerte = zaehler.uhrwerte.lock();
        for paar in uhrwerte.windows(2) {
            assert_eq!(paar[1].wrapping_sub(paar[0]), 40);
        }
    }

    #[test]
    fn abmelden_stoppt_takte() {
        let prozessor = MedienProzessor::neu(MedienProzessorConfig {
            sample_rate: 8000,
            takt: Duration::from_millis(5),
        });
        let id = StreamId::new();
        let zaehler = Arc::new(Zaehler {
            takte: AtomicU32::new(0),
            uhrwerte: Mutex::new(Vec::new()),
        });
        prozessor.anmelden(id, Arc::clone(&zaehler) as Arc<dyn MedienGlied>);
        assert_eq!(prozessor.anzahl(), 1);

        std::thread::sleep(Duration::from_millis(30));
        assert!(prozessor.abmelden(&id));
        assert_eq!(prozessor.anzahl(), 0);

        // Einen evtl. noch laufenden Takt ausklingen lassen
        std::thread::sleep(Duration::from_millis(20));
        let stand = zaehler.takte.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(
            zaehler.takte.load(Ordering::Relaxed),
            stand,
            "nach dem Abmelden keine weiteren Takte"
        );
    }

    #[test]
    fn drop_beendet_worker_sauber() {
        let prozessor = MedienProzessor::neu(MedienProzessorConfig::default());
        prozessor.anmelden(
            StreamId::new(),
            Arc::new(Zaehler {
                takte: AtomicU32::new(0),
                uhrwerte: Mutex::new(Vec::new()),
            }) as Arc<dyn MedienGlied>,
        );
        drop(prozessor);
    }
}
