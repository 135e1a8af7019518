//! Umsortierender Jitter Buffer fuer PCM-Pakete
//!
//! Reiner Umsortier- und Taktpuffer ohne Zeitdehnung: eingehende Pakete
//! werden nach Zeitstempel geordnet gehalten und erst dann herausgegeben,
//! wenn die Abspielzeit sie erreicht. Die noetige Vorhaltezeit wird aus dem
//! beobachteten Jitter geschaetzt und waechst bei Verspaetungen jeweils um
//! die Haelfte des beobachteten Ueberschusses (gedeckelt auf 2 s). Die
//! Schaetzung schrumpft bewusst nie zurueck: lieber etwas mehr Latenz als
//! hoerbare Resync-Spruenge.
//!
//! ## Speicher
//! Pakete leben in einem festen Pool und bilden eine nach Zeitstempel
//! geordnete, doppelt verkettete Liste (Index-Links statt Zeigern). Ist der
//! Pool erschoepft, wird das aelteste Paket verdraengt und wiederverwendet;
//! im eingeschwungenen Zustand wird nie allokiert.
//!
//! ## Abspiel-Offset
//! `get` bildet Abspielzeit auf RTP-Zeit ab. Das Delta kommt aus dem
//! Ordnungsstatistik-Schaetzer ([`crate::delay`]): Resync nach vorn erfolgt
//! sofort, zurueck erst nach mehreren aufeinanderfolgenden zu fruehen
//! Paketen und dann nur sample-weise, um Oszillation zu vermeiden.

use crate::delay::DelaySchaetzer;
use crate::sample_array::MAX_PAKET_SAMPLES;
use crate::timestamp::{ist_frueher, ist_frueher_gleich};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Framelaenge in Samples (10 ms)
    pub frame_samples: u32,
    /// Initiale Jitter-Schaetzung in Frames
    pub initiale_jitter_frames: u32,
    /// Obergrenze der Jitter-Schaetzung in Frames (200 = 2 s bei 10 ms)
    pub max_jitter_frames: u32,
    /// Maximale Paketlaenge in Samples
    pub max_paket_samples: usize,
    /// Poolgroesse in Paketen (maximal tolerierter Jitter / Paketdauer)
    pub pool_pakete: usize,
    /// Aufeinanderfolgende zu fruehe Pakete, bevor das Delta zurueckwandert
    pub resync_schwelle: u32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            frame_samples: 80,
            initiale_jitter_frames: 2,
            max_jitter_frames: 200,
            max_paket_samples: MAX_PAKET_SAMPLES,
            pool_pakete: 100,
            resync_schwelle: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStatistik {
    /// Anzahl empfangener Pakete gesamt
    pub empfangen: u64,
    /// Anzahl an den Abspielpfad uebergebener Pakete
    pub abgespielt: u64,
    /// Verworfene Duplikate
    pub duplikate: u64,
    /// Beim Einfuegen verworfene, hoffnungslos verspaetete Pakete
    pub verworfen_spaet: u64,
    /// Durch Pool-Erschoepfung verdraengte Pakete
    pub verdraengt: u64,
    /// Beim Lesen verfallene Pakete (aelter als das Abspielfenster)
    pub verfallen: u64,
    /// Sofortige Vorwaerts-Resyncs
    pub resyncs_vorwaerts: u64,
    /// Rueckwaerts-Schritte des Deltas (sample-weise)
    pub resyncs_rueckwaerts: u64,
    /// Aktuelle Jitter-Schaetzung in Frames
    pub jitter_frames: u32,
    /// Aktueller Fuellstand in Paketen
    pub fuellstand: usize,
}

// ---------------------------------------------------------------------------
// Paketpool
// ---------------------------------------------------------------------------

/// Ein Paket-Slot im festen Pool
struct Paket {
    ts: u32,
    len: usize,
    pcm: Box<[i16]>,
    next: Option<usize>,
    prev: Option<usize>,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Jitter Buffer – ordnet und taktet PCM-Pakete
///
/// Nicht thread-safe; der besitzende Strom synchronisiert Produzent und
/// Konsument ueber ein gemeinsames Lock.
pub struct JitterBuffer {
    config: JitterBufferConfig,
    pool: Vec<Paket>,
    frei: Vec<usize>,
    kopf: Option<usize>,
    schwanz: Option<usize>,
    anzahl: usize,
    /// Zeitstempel des juengsten Pakets
    last_ts: Option<u32>,
    /// Aktuelle Jitter-Schaetzung in Frames (waechst nur)
    jitter_frames: u32,
    /// Abbildung Abspielzeit -> RTP-Zeit
    delta: Option<u32>,
    /// Zaehler aufeinanderfolgender zu frueher Pakete
    verzoegerungs_zaehler: u32,
    schaetzer: DelaySchaetzer,
    statistik: JitterBufferStatistik,
}

impl JitterBuffer {
    /// Erstellt einen Jitter Buffer; der Pool wird vollstaendig vorbelegt
    pub fn neu(config: JitterBufferConfig) -> Self {
        assert!(config.pool_pakete > 0, "Pool darf nicht leer sein");
        assert!(config.frame_samples > 0, "Framelaenge muss positiv sein");

        let pool: Vec<Paket> = (0..config.pool_pakete)
            .map(|_| Paket {
                ts: 0,
                len: 0,
                pcm: vec![0i16; config.max_paket_samples].into_boxed_slice(),
                next: None,
                prev: None,
            })
            .collect();
        let frei: Vec<usize> = (0..config.pool_pakete).rev().collect();

        let statistik = JitterBufferStatistik {
            jitter_frames: config.initiale_jitter_frames,
            ..Default::default()
        };

        Self {
            jitter_frames: config.initiale_jitter_frames,
            config,
            pool,
            frei,
            kopf: None,
            schwanz: None,
            anzahl: 0,
            last_ts: None,
            delta: None,
            verzoegerungs_zaehler: 0,
            schaetzer: DelaySchaetzer::neu(),
            statistik,
        }
    }

    /// Erstellt einen Jitter Buffer mit Standardkonfiguration
    pub fn standard() -> Self {
        Self::neu(JitterBufferConfig::default())
    }

    /// Fuegt ein Paket ein
    ///
    /// Verspaetete Pakete lassen die Jitter-Schaetzung wachsen; was auch
    /// nach dem Wachsen noch hinter dem tolerierten Fenster liegt, wird
    /// verworfen. `resync` (Sprechbeginn nach Pause) setzt die
    /// Delta-Abbildung zurueck, statt die Pause als Verspaetung zu deuten.
    pub fn put(&mut self, ts: u32, pcm: &[i16], resync: bool) {
        assert!(
            !pcm.is_empty() && pcm.len() <= self.config.max_paket_samples,
            "Paketlaenge ausserhalb des statischen Puffers"
        );
        self.statistik.empfangen += 1;

        if resync {
            self.delta = None;
            self.verzoegerungs_zaehler = 0;
        }

        if let Some(last) = self.last_ts {
            let jitter_samples = self.jitter_frames * self.config.frame_samples;
            if !resync && ist_frueher(ts.wrapping_add(jitter_samples), last) {
                // Paket liegt hinter dem tolerierten Fenster: Schaetzung
                // um die Haelfte des Ueberschusses anheben
                let verspaetung_frames = last.wrapping_sub(ts) / self.config.frame_samples;
                if verspaetung_frames > self.jitter_frames
                    && self.jitter_frames < self.config.max_jitter_frames
                {
                    self.jitter_frames += (verspaetung_frames - self.jitter_frames) / 2 + 1;
                    self.jitter_frames = self.jitter_frames.min(self.config.max_jitter_frames);
                    self.statistik.jitter_frames = self.jitter_frames;
                    tracing::debug!(
                        jitter_frames = self.jitter_frames,
                        "Jitter-Schaetzung angehoben"
                    );
                }

                let jitter_samples = self.jitter_frames * self.config.frame_samples;
                if ist_frueher(ts.wrapping_add(jitter_samples), last) {
                    self.statistik.verworfen_spaet += 1;
                    tracing::trace!(ts, last, "Hoffnungslos verspaetetes Paket verworfen");
                    return;
                }
            }
        }

        // Slot besorgen; bei erschoepftem Pool das aelteste Paket verdraengen
        let slot = match self.frei.pop() {
            Some(s) => s,
            None => {
                let aeltester = self.kopf.expect("voller Pool hat einen Kopf");
                self.aushaengen(aeltester);
                self.statistik.verdraengt += 1;
                tracing::warn!(
                    ts = self.pool[aeltester].ts,
                    "Paketpool erschoepft: aeltestes Paket verdraengt"
                );
                aeltester
            }
        };

        // Einfuegeposition vom Schwanz aus suchen (Pakete kommen meist in
        // Reihenfolge an)
        let mut nach = self.schwanz;
        while let Some(idx) = nach {
            if self.pool[idx].ts == ts {
                // Duplikat
                self.frei.push(slot);
                self.statistik.duplikate += 1;
                tracing::trace!(ts, "Duplikat-Paket verworfen");
                return;
            }
            if ist_frueher(self.pool[idx].ts, ts) {
                break;
            }
            nach = self.pool[idx].prev;
        }

        let paket = &mut self.pool[slot];
        paket.ts = ts;
        paket.len = pcm.len();
        paket.pcm[..pcm.len()].copy_from_slice(pcm);
        self.einhaengen_nach(slot, nach);

        match self.last_ts {
            Some(last) if !ist_frueher(last, ts) => {}
            _ => self.last_ts = Some(ts),
        }
        self.statistik.fuellstand = self.anzahl;
    }

    /// Liefert das naechste faellige Paket fuer die Abspielzeit `ts`
    ///
    /// `fenster` ist die Laenge des Abspielfensters in Samples. Pakete, die
    /// vollstaendig vor dem Fenster liegen, verfallen dabei. Das
    /// zurueckgegebene Tupel ist `(abspiel_ts, laenge)`; die Samples stehen
    /// in `out`, das mindestens Paketgroesse haben muss.
    pub fn get(&mut self, ts: u32, fenster: u32, out: &mut [i16]) -> Option<(u32, usize)> {
        assert!(out.len() >= self.config.max_paket_samples);
        let last = self.last_ts?;
        let jitter_samples = self.jitter_frames * self.config.frame_samples;

        let ziel = self.schaetzer.naechste_verzoegerung(last, ts);
        let delta = match self.delta {
            None => {
                self.delta = Some(ziel);
                ziel
            }
            Some(d) => {
                let aktuell = last.wrapping_sub(ts);
                if ist_frueher(d, aktuell) {
                    // Pakete treffen frueher ein als vorhergesagt:
                    // sofort nach vorn synchronisieren
                    self.delta = Some(ziel);
                    self.verzoegerungs_zaehler = 0;
                    self.statistik.resyncs_vorwaerts += 1;
                    tracing::debug!(alt = d, neu = ziel, "Jitter Buffer vorwaerts resynct");
                    ziel
                } else if ist_frueher(aktuell, d) {
                    if self.verzoegerungs_zaehler > self.config.resync_schwelle {
                        // Nur sample-weise zurueck, gegen Oszillation
                        let neu = d.wrapping_sub(1);
                        self.delta = Some(neu);
                        self.statistik.resyncs_rueckwaerts += 1;
                        neu
                    } else {
                        self.verzoegerungs_zaehler += 1;
                        d
                    }
                } else {
                    self.verzoegerungs_zaehler = 0;
                    d
                }
            }
        };

        let rtp_ziel = ts.wrapping_add(delta).wrapping_sub(jitter_samples);

        // Kopf-Pakete verfallen lassen, die komplett vor dem Fenster liegen
        while let Some(k) = self.kopf {
            let ende = self.pool[k].ts.wrapping_add(self.pool[k].len as u32);
            if ist_frueher_gleich(ende, rtp_ziel) {
                self.aushaengen(k);
                self.frei.push(k);
                self.statistik.verfallen += 1;
                tracing::trace!(ts = self.pool[k].ts, "Paket verfallen");
            } else {
                break;
            }
        }
        self.statistik.fuellstand = self.anzahl;

        let k = self.kopf?;
        if !ist_frueher(self.pool[k].ts, rtp_ziel.wrapping_add(fenster)) {
            // Noch nicht faellig
            return None;
        }

        let len = self.pool[k].len;
        let p_ts = self.pool[k].ts;
        out[..len].copy_from_slice(&self.pool[k].pcm[..len]);
        self.aushaengen(k);
        self.frei.push(k);
        self.statistik.abgespielt += 1;
        self.statistik.fuellstand = self.anzahl;

        let abspiel_ts = p_ts.wrapping_sub(delta).wrapping_add(jitter_samples);
        Some((abspiel_ts, len))
    }

    /// Gibt die aktuellen Statistiken zurueck
    pub fn statistik(&self) -> &JitterBufferStatistik {
        &self.statistik
    }

    /// Aktueller Fuellstand in Paketen
    pub fn fuellstand(&self) -> usize {
        self.anzahl
    }

    /// Aktuelle Jitter-Schaetzung in Frames
    pub fn jitter_frames(&self) -> u32 {
        self.jitter_frames
    }

    // -----------------------------------------------------------------------
    // Interne Listen-Operationen
    // -----------------------------------------------------------------------

    /// Loest einen Slot aus der Liste
    fn aushaengen(&mut self, idx: usize) {
        let prev = self.pool[idx].prev;
        let next = self.pool[idx].next;
        match prev {
            Some(p) => self.pool[p].next = next,
            None => self.kopf = next,
        }
        match next {
            Some(n) => self.pool[n].prev = prev,
            None => self.schwanz = prev,
        }
        self.pool[idx].prev = None;
        self.pool[idx].next = None;
        self.anzahl -= 1;
    }

    /// Haengt `idx` hinter `nach` ein (`None` = an den Kopf)
    fn einhaengen_nach(&mut self, idx: usize, nach: Option<usize>) {
        match nach {
            Some(n) => {
                let next = self.pool[n].next;
                self.pool[idx].prev = Some(n);
                self.pool[idx].next = next;
                self.pool[n].next = Some(idx);
                match next {
                    Some(x) => self.pool[x].prev = Some(idx),
                    None => self.schwanz = Some(idx),
                }
            }
            None => {
                let alter_kopf = self.kopf;
                self.pool[idx].prev = None;
                self.pool[idx].next = alter_kopf;
                match alter_kopf {
                    Some(x) => self.pool[x].prev = Some(idx),
                    None => self.schwanz = Some(idx),
                }
                self.kopf = Some(idx);
            }
        }
        self.anzahl += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
