//! Playout-Strategien – vom Paketstrom zum kontinuierlichen Sample-Strom
//!
//! Drei austauschbare Strategien hinter demselben `write`/`read`-Vertrag,
//! als geschlossenes Enum zur Konstruktionszeit gewaehlt:
//! - **Einfach**: reiht Pakete in Ankunftsreihenfolge aneinander; keine
//!   Umsortierung, keine Verdeckung (lokale Quellen, Tests)
//! - **JitterPuffer**: Umsortierung und Taktung komplett im
//!   [`crate::jitter_buffer`]; fehlende Abschnitte fuellt die
//!   Verlustverdeckung, bevor aus dem Ringpuffer gelesen wird
//! - **Adaptiv**: eigener Ordnungsstatistik-Schaetzer fuer die
//!   Zielverzoegerung; statt diskreter Resync-Spruenge wird das Signal per
//!   WSOLA gedehnt oder gestaucht (Zeitskalierung ohne Tonhoehenaenderung),
//!   bis der Offset das Ziel erreicht. Laeuft der Puffer trotzdem leer,
//!   wird einmal das letzte Paket auf 2x gedehnt, danach einige Frames
//!   verdeckt, danach Stille.
//!
//! Ein `talk_start`-Flag unterdrueckt die Verdeckungslogik fuer das erste
//! Paket nach einer gewollten Sprechpause: eine Pause ist kein Verlust.

use crate::delay::DelaySchaetzer;
use crate::jitter_buffer::{JitterBuffer, JitterBufferConfig, JitterBufferStatistik};
use crate::plc::LossConcealer;
use crate::sample_array::{SampleArray, MAX_PAKET_SAMPLES};
use crate::stats::MittelFenster;
use crate::timestamp::ist_frueher;

// ---------------------------------------------------------------------------
// WSOLA-Parameter
// ---------------------------------------------------------------------------

/// Suchbereich um das ideal ausgerichtete Segment (Samples)
const SUCH_REGION: usize = 110;
/// Laenge des Template-Segments (Samples, halbes 20-ms-Paket)
const TEMPLATE_SEG: usize = 80;
/// Sicherheitsabstand zwischen Template und Suchbereich (Samples)
const TEMPLATE_DELTA: usize = 5;
/// Offset-Rueckstand, ab dem gedehnt wird (Samples)
const EXP_SCHWELLE: u32 = 20;
/// Startwert der selbstjustierenden Schrumpf-Schwelle (Samples)
const SHR_SCHWELLE_START: i32 = 180;
/// Startwert des WSOLA-Offsets (Samples)
const WSOLA_START_OFF: u32 = 80;
/// Fenster der Skalierungs-Historie fuer die Schwellen-Justierung
const WSOLA_SKALIERT_FENSTER: usize = 50;
/// Begrenzung des Zeitskalierungsfaktors
const TSM_MAX_FAKTOR: f32 = 2.0;
const TSM_MIN_FAKTOR: f32 = 0.5;
/// Verdeckte Lesezyklen, bevor der adaptive Pfad zu Stille degradiert
const MAX_PLC_ZYKLEN: u32 = 6;
/// Laengste Luecke, die per Synthese ueberbrueckt wird (80 ms bei 8 kHz)
const MAX_VERDECKUNG_SAMPLES: u32 = 640;

// ---------------------------------------------------------------------------
// Gemeinsamer Vertrag
// ---------------------------------------------------------------------------

/// Gemeinsamer Vertrag aller Playout-Strategien
pub trait Playout {
    /// Nimmt ein dekodiertes Paket auf
    ///
    /// `ref_ts` ist die Referenzzeit des Empfaengers (Wanduhr in Samples),
    /// `ts` der RTP-Zeitstempel des Pakets. `talk_start` markiert das erste
    /// Paket nach einer gewollten Sprechpause.
    fn write(&mut self, ref_ts: u32, ts: u32, pcm: &[i16], talk_start: bool);

    /// Liest Samples zur Abspielzeit `ts`; Rueckgabe ist die Anzahl
    /// gelieferter Samples (hoechstens `out.len()`)
    fn read(&mut self, ts: u32, out: &mut [i16]) -> u32;

    /// Schreibt eine lokale (Nicht-Netzwerk-)Quelle zeitstempel-treu am
    /// Schaetzer vorbei
    fn direct_write(&mut self, ts: u32, pcm: &[i16]);
}

// ---------------------------------------------------------------------------
// PlayoutPuffer (einfache Strategie und gemeinsame Basis)
// ---------------------------------------------------------------------------

/// Ringpuffer mit Lese- und Schreib-Cursor; zugleich die einfache Strategie
pub struct PlayoutPuffer {
    puffer: SampleArray<i16>,
    r_ts: u32,
    w_ts: u32,
}

impl PlayoutPuffer {
    pub fn neu() -> Self {
        Self {
            puffer: SampleArray::neu(),
            r_ts: 0,
            w_ts: 0,
        }
    }

    fn puffer_put(&mut self, ts: u32, pcm: &[i16]) {
        self.puffer.put(ts, pcm);
        let ende = ts.wrapping_add(pcm.len() as u32);
        if ist_frueher(self.w_ts, ende) {
            self.w_ts = ende;
        }
    }

    fn puffer_get(&mut self, ts: u32, out: &mut [i16]) {
        self.puffer.get(ts, out);
        let ende = ts.wrapping_add(out.len() as u32);
        if ist_frueher(self.r_ts, ende) {
            self.r_ts = ende;
        }
    }
}

impl Playout for PlayoutPuffer {
    fn write(&mut self, _ref_ts: u32, _ts: u32, pcm: &[i16], _talk_start: bool) {
        let w = self.w_ts;
        self.puffer_put(w, pcm);
    }

    fn read(&mut self, _ts: u32, out: &mut [i16]) -> u32 {
        if !ist_frueher(self.r_ts, self.w_ts) {
            return 0;
        }
        let verfuegbar = self.w_ts.wrapping_sub(self.r_ts);
        let rlen = verfuegbar.min(out.len() as u32) as usize;
        let r = self.r_ts;
        self.puffer_get(r, &mut out[..rlen]);
        rlen as u32
    }

    fn direct_write(&mut self, ts: u32, pcm: &[i16]) {
        self.puffer_put(ts, pcm);
    }
}

impl Default for PlayoutPuffer {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// AdaptivesPlayout (WSOLA-Zeitskalierung)
// ---------------------------------------------------------------------------

/// Adaptive Strategie: Zielverzoegerung per Ordnungsstatistik, sanftes
/// Erreichen des Ziels durch WSOLA-Dehnung/-Stauchung
pub struct AdaptivesPlayout {
    basis: PlayoutPuffer,
    schaetzer: DelaySchaetzer,
    /// Aktueller Abstand RTP-Zeit -> Pufferzeit (Samples)
    wsola_off: u32,
    /// Selbstjustierende Schwelle, ab der gestaucht statt gewartet wird
    shr_schwelle: i32,
    /// Juengste Skalierungs-Historie (0 = durchgereicht, 100 = skaliert)
    kurz_skaliert: MittelFenster,
    plc_zaehler: u32,
    fec: LossConcealer,
    // Scratch-Puffer (einmal angelegt, im Betrieb allokationsfrei)
    p_buf: Vec<i16>,
    merge_buf: [i16; TEMPLATE_SEG],
    plc_frame: Vec<i16>,
}

impl AdaptivesPlayout {
    pub fn neu(sample_rate: u32) -> Self {
        let fec = LossConcealer::neu(sample_rate);
        let frame = fec.frame_len();
        Self {
            basis: PlayoutPuffer::neu(),
            schaetzer: DelaySchaetzer::neu(),
            wsola_off: WSOLA_START_OFF,
            shr_schwelle: SHR_SCHWELLE_START,
            kurz_skaliert: MittelFenster::neu(WSOLA_SKALIERT_FENSTER),
            plc_zaehler: 0,
            fec,
            p_buf: vec![0; 4 * MAX_PAKET_SAMPLES],
            merge_buf: [0; TEMPLATE_SEG],
            plc_frame: vec![0; frame],
        }
    }

    /// Aktueller WSOLA-Offset in Samples
    pub fn offset(&self) -> u32 {
        self.wsola_off
    }

    /// Dehnt oder staucht das bei `ts` beginnende Paket um `faktor`
    ///
    /// Arbeitet iterativ: pro Durchlauf wird um das Template herum die beste
    /// Kreuzkorrelations-Fundstelle gesucht, per Raised-Cosine uebergeblendet
    /// und das Signal um eine halbe Template-Laenge verschoben, bis die
    /// Ziellaenge erreicht oder das Frame ausgeschoepft ist. Rueckgabe ist
    /// die neue Laenge in Samples.
    fn time_scale(&mut self, ts: u32, faktor: f32, paket_len: u32) -> u32 {
        let mut s = paket_len;
        let mut s_all = s + paket_len;
        let mut cur_ts = ts;
        let begin_ts = ts.wrapping_sub(paket_len);

        if faktor == 1.0 {
            return s;
        }
        let faktor = faktor.clamp(TSM_MIN_FAKTOR, TSM_MAX_FAKTOR);

        let mut tmpl = paket_len as usize;

        loop {
            let p_ende = s_all as usize;
            if p_ende > self.p_buf.len() {
                break;
            }
            self.basis.puffer_get(begin_ts, &mut self.p_buf[..p_ende]);

            let (srch_beg, srch_end) = if faktor > 1.0 {
                // Expansion: Suchbereich vor dem Template
                let mut beg = tmpl as isize
                    - (TEMPLATE_SEG as f32 * (faktor - 1.0)) as isize
                    - (SUCH_REGION / 2) as isize;
                let mut end = beg + SUCH_REGION as isize;
                if beg < 0 {
                    beg = 0;
                }
                if end + TEMPLATE_DELTA as isize >= tmpl as isize {
                    end = tmpl as isize - TEMPLATE_DELTA as isize;
                }
                (beg, end)
            } else {
                // Kompression: Suchbereich hinter dem Template
                let mut end = tmpl as isize
                    + (TEMPLATE_SEG as f32 * (1.0 - faktor)) as isize
                    + (SUCH_REGION / 2) as isize;
                let mut beg = end - SUCH_REGION as isize;
                if end + TEMPLATE_SEG as isize > p_ende as isize {
                    end = p_ende as isize - TEMPLATE_SEG as isize;
                }
                if beg - (TEMPLATE_DELTA as isize) < tmpl as isize {
                    beg = tmpl as isize + TEMPLATE_DELTA as isize;
                }
                (beg, end)
            };

            if srch_beg >= srch_end {
                break;
            }
            let srch = beste_korrelation(
                &self.p_buf[..p_ende],
                tmpl,
                srch_beg as usize,
                srch_end as usize,
            );

            // Fundstelle per Raised-Cosine in das Template ueberblenden
            self.merge_buf
                .copy_from_slice(&self.p_buf[tmpl..tmpl + TEMPLATE_SEG]);
            for k in 0..TEMPLATE_SEG {
                let fk = 0.5
                    - 0.5 * (std::f32::consts::PI * k as f32 / TEMPLATE_SEG as f32).cos();
                let v = self.p_buf[srch + k] as f32 * fk
                    + self.merge_buf[k] as f32 * (1.0 - fk);
                self.merge_buf[k] = v.clamp(-32768.0, 32767.0) as i16;
            }

            self.basis.puffer_put(cur_ts, &self.merge_buf);
            self.basis.puffer_put(
                cur_ts.wrapping_add(TEMPLATE_SEG as u32),
                &self.p_buf[srch + TEMPLATE_SEG..p_ende],
            );

            let versatz = tmpl as i32 - srch as i32;
            s = (s as i32 + versatz) as u32;
            s_all = (s_all as i32 + versatz) as u32;

            cur_ts = cur_ts.wrapping_add((TEMPLATE_SEG / 2) as u32);
            tmpl += TEMPLATE_SEG / 2;

            if (p_ende as isize - tmpl as isize) < (TEMPLATE_SEG + TEMPLATE_DELTA) as isize {
                break;
            }

            let ist_faktor = s as f32 / paket_len as f32;
            if (faktor > 1.0 && ist_faktor >= faktor)
                || (faktor < 1.0 && ist_faktor <= faktor)
                || ist_faktor >= TSM_MAX_FAKTOR
                || ist_faktor <= TSM_MIN_FAKTOR
            {
                break;
            }
        }

        s
    }
}

impl Playout for AdaptivesPlayout {
    fn write(&mut self, ref_ts: u32, ts: u32, pcm: &[i16], talk_start: bool) {
        let len = pcm.len() as u32;
        debug_assert!(pcm.len() <= MAX_PAKET_SAMPLES);
        if pcm.is_empty() {
            return;
        }
        if talk_start {
            // Gewollte Pause: nicht als Verlust verdecken
            self.fec.zuruecksetzen();
            self.plc_zaehler = 0;
        }

        let p_delay = self.schaetzer.naechste_verzoegerung(ref_ts, ts);
        let old_off = self.wsola_off;
        let ts = ts.wrapping_add(old_off);

        // Schrumpf-Schwelle anhand der juengsten Skalierungs-Historie
        // nachfuehren: wer staendig skaliert, soll traeger werden
        if self.kurz_skaliert.mittel() > 2.0 {
            if self.shr_schwelle < 3000 {
                self.shr_schwelle += 10;
            }
        } else if self.kurz_skaliert.mittel() < 1.0 && self.shr_schwelle > 100 {
            self.shr_schwelle -= 2;
        }

        if ist_frueher(self.wsola_off.wrapping_add(EXP_SCHWELLE), p_delay)
            || ist_frueher(p_delay.wrapping_add(self.shr_schwelle as u32), self.wsola_off)
        {
            // Ziel zu weit entfernt: Offset umsetzen und Paket skalieren
            self.wsola_off = p_delay;
        } else {
            // Offset passt: Paket unveraendert uebernehmen
            if ist_frueher(self.basis.r_ts, ts.wrapping_add(len)) {
                self.plc_zaehler = 0;
                self.basis.puffer_put(ts, pcm);
            }
            self.kurz_skaliert.push(0.0);
            return;
        }

        let diff = self.wsola_off.wrapping_sub(old_off) as i32;
        let mut n_len = len as i32 + diff;
        if n_len < 0 {
            n_len = 1;
        }
        let mut f = n_len as f32 / len as f32;
        if f > TSM_MAX_FAKTOR {
            f = TSM_MAX_FAKTOR;
        }

        let n_len = (len as f32 * f) as u32;
        if ist_frueher(ts.wrapping_add(n_len), self.basis.r_ts) {
            // Auch skaliert laege das Paket komplett in der Vergangenheit
            self.kurz_skaliert.push(0.0);
            return;
        }

        let old_wts = self.basis.w_ts;
        self.basis.puffer_put(ts, pcm);

        let n_len = self.time_scale(ts, f, len);
        self.wsola_off = old_off.wrapping_add(n_len).wrapping_sub(len);

        if self.basis.w_ts != old_wts {
            self.plc_zaehler = 0;
        }
        self.kurz_skaliert.push(100.0);
    }

    fn read(&mut self, ts: u32, out: &mut [i16]) -> u32 {
        let len = out.len() as u32;
        let mut do_plc = false;

        if ist_frueher(self.basis.w_ts, ts.wrapping_add(len)) && self.plc_zaehler < MAX_PLC_ZYKLEN
        {
            if self.plc_zaehler == 0 {
                // Puffer laeuft leer: letztes Paket einmalig auf 2x dehnen
                let w = self.basis.w_ts;
                self.time_scale(w.wrapping_sub(len), 2.0, len);
            } else {
                do_plc = true;
            }
            self.plc_zaehler += 1;
        }

        let frame = self.fec.frame_len();
        if do_plc {
            // Fehlende Frames synthetisieren und wie empfangen ablegen
            let mut plc_frame = std::mem::take(&mut self.plc_frame);
            for _ in 0..out.len() / frame {
                self.fec.verdecken(&mut plc_frame);
                let w = self.basis.w_ts;
                self.basis.puffer_put(w, &plc_frame);
            }
            self.plc_frame = plc_frame;
            self.basis.puffer_get(ts, out);
        } else {
            self.basis.puffer_get(ts, out);
            // Gute Frames pflegen die Verdeckungs-Historie
            for chunk in out.chunks_exact_mut(frame) {
                self.fec.gutes_frame(chunk);
            }
        }

        len
    }

    fn direct_write(&mut self, ts: u32, pcm: &[i16]) {
        let ts = ts.wrapping_add(self.wsola_off);
        self.basis.puffer_put(ts, pcm);
    }
}

/// Index der besten Kreuzkorrelation zwischen Template und Suchbereich
fn beste_korrelation(p_buf: &[i16], tmpl: usize, srch_beg: usize, srch_end: usize) -> usize {
    let mut beste_korr = 0.0f32;
    let mut bester = srch_beg;
    let mut erster = true;

    for sr in srch_beg..srch_end {
        let mut korr = 0.0f32;
        for i in 0..TEMPLATE_SEG {
            korr += p_buf[sr + i] as f32 * p_buf[tmpl + i] as f32;
        }
        if erster || korr > beste_korr {
            beste_korr = korr;
            bester = sr;
            erster = false;
        }
    }

    bester
}

// ---------------------------------------------------------------------------
// JbPlayout (Jitter-Buffer-gestuetzt)
// ---------------------------------------------------------------------------

/// Jitter-Buffer-gestuetzte Strategie: Taktung im Jitter Buffer, Luecken
/// fuellt die Verlustverdeckung
pub struct JbPlayout {
    basis: PlayoutPuffer,
    jb: JitterBuffer,
    fec: LossConcealer,
    paket_scratch: Vec<i16>,
    plc_frame: Vec<i16>,
}

impl JbPlayout {
    pub fn neu(sample_rate: u32) -> Self {
        let fec = LossConcealer::neu(sample_rate);
        let frame = fec.frame_len();
        let config = JitterBufferConfig {
            frame_samples: frame as u32,
            ..Default::default()
        };
        Self {
            basis: PlayoutPuffer::neu(),
            jb: JitterBuffer::neu(config),
            paket_scratch: vec![0; MAX_PAKET_SAMPLES],
            plc_frame: vec![0; frame],
            fec,
        }
    }

    /// Statistiken des eingebetteten Jitter Buffers
    pub fn jitter_statistik(&self) -> &JitterBufferStatistik {
        self.jb.statistik()
    }

    /// Statistiken der eingebetteten Verlustverdeckung
    pub fn plc_statistik(&self) -> &crate::plc::PlcStatistik {
        self.fec.statistik()
    }

    /// Uebernimmt faellige Pakete in den Ringpuffer und fuellt den Rest des
    /// Abspielfensters per Verdeckung (bzw. Stille bei zu langen Luecken)
    fn puffer_vorbereiten(&mut self, ts: u32, len: u32) {
        let frame = self.fec.frame_len();

        let mut scratch = std::mem::take(&mut self.paket_scratch);
        while let Some((p_ts, n)) = self.jb.get(ts, len, &mut scratch) {
            for chunk in scratch[..n].chunks_exact_mut(frame) {
                self.fec.gutes_frame(chunk);
            }
            self.basis.puffer_put(p_ts, &scratch[..n]);
        }
        self.paket_scratch = scratch;

        if self.basis.puffer.letzter_ts().is_none() {
            // Noch nie etwas empfangen: nichts zu verdecken
            return;
        }

        let ziel = ts.wrapping_add(len);
        if !ist_frueher(self.basis.w_ts, ziel) {
            return;
        }

        let luecke = ziel.wrapping_sub(self.basis.w_ts);
        if luecke > MAX_VERDECKUNG_SAMPLES {
            // Verlust jenseits der Verdeckungsgrenze: Stille statt Synthese
            tracing::debug!(luecke, "Luecke zu gross fuer Verdeckung, degradiere zu Stille");
            self.fec.zuruecksetzen();
            self.basis.w_ts = ziel;
            return;
        }

        let mut plc_frame = std::mem::take(&mut self.plc_frame);
        while ist_frueher(self.basis.w_ts, ziel) {
            self.fec.verdecken(&mut plc_frame);
            let w = self.basis.w_ts;
            self.basis.puffer_put(w, &plc_frame);
        }
        self.plc_frame = plc_frame;
    }
}

impl Playout for JbPlayout {
    fn write(&mut self, _ref_ts: u32, ts: u32, pcm: &[i16], talk_start: bool) {
        if talk_start {
            self.fec.zuruecksetzen();
        }
        self.jb.put(ts, pcm, talk_start);
    }

    fn read(&mut self, ts: u32, out: &mut [i16]) -> u32 {
        self.puffer_vorbereiten(ts, out.len() as u32);
        self.basis.puffer_get(ts, out);
        out.len() as u32
    }

    fn direct_write(&mut self, ts: u32, pcm: &[i16]) {
        self.basis.puffer_put(ts, pcm);
    }
}

// ---------------------------------------------------------------------------
// Strategie-Auswahl
// ---------------------------------------------------------------------------

/// Auswahl der Playout-Strategie beim Strom-Aufbau
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutModus {
    /// Reines Aneinanderreihen (lokale Quellen)
    Einfach,
    /// Jitter-Buffer-gestuetzt mit Verdeckung
    JitterPuffer,
    /// Adaptive WSOLA-Zeitskalierung
    Adaptiv,
}

/// Geschlossene Strategie-Auswahl; macht die Behandlung aller Varianten
/// zur Compilezeit pruefbar
pub enum PlayoutStrategie {
    Einfach(PlayoutPuffer),
    JitterPuffer(Box<JbPlayout>),
    Adaptiv(Box<AdaptivesPlayout>),
}

impl PlayoutStrategie {
    /// Baut die gewaehlte Strategie fuer die gegebene Abtastrate
    pub fn neu(modus: PlayoutModus, sample_rate: u32) -> Self {
        match modus {
            PlayoutModus::Einfach => Self::Einfach(PlayoutPuffer::neu()),
            PlayoutModus::JitterPuffer => Self::JitterPuffer(Box::new(JbPlayout::neu(sample_rate))),
            PlayoutModus::Adaptiv => Self::Adaptiv(Box::new(AdaptivesPlayout::neu(sample_rate))),
        }
    }
}

impl Playout for PlayoutStrategie {
    fn write(&mut self, ref_ts: u32, ts: u32, pcm: &[i16], talk_start: bool) {
        match self {
            Self::Einfach(p) => p.write(ref_ts, ts, pcm, talk_start),
            Self::JitterPuffer(p) => p.write(ref_ts, ts, pcm, talk_start),
            Self::Adaptiv(p) => p.write(ref_ts, ts, pcm, talk_start),
        }
    }

    fn read(&mut self, ts: u32, out: &mut [i16]) -> u32 {
        match self {
            Self::Einfach(p) => p.read(ts, out),
            Self::JitterPuffer(p) => p.read(ts, out),
            Self::Adaptiv(p) => p.read(ts, out),
        }
    }

    fn direct_write(&mut self, ts: u32, pcm: &[i16]) {
        match self {
            Self::Einfach(p) => p.direct_write(ts, pcm),
            Self::JitterPuffer(p) => p.direct_write(ts, pcm),
            Self::Adaptiv(p) => p.direct_write(ts, pcm),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn sinus_paket(start_sample: u32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = (start_sample as usize + i) as f32;
                (8000.0 * (2.0 * std::f32::consts::PI * 100.0 * t / SR as f32).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn einfaches_playout_reiht_pakete_aneinander() {
        let mut p = PlayoutPuffer::neu();
        p.write(0, 0, &vec![11i16; 160], false);
        p.write(0, 160, &vec![22i16; 160], false);

        let mut out = vec![0i16; 320];
        let n = p.read(0, &mut out);
        assert_eq!(n, 320);
        assert!(out[..160].iter().all(|&s| s == 11));
        assert!(out[160..].iter().all(|&s| s == 22));

        // Nichts mehr da
        let n = p.read(0, &mut out);
        assert_eq!(n, 0);
    }

    #[test]
    fn einfaches_playout_liefert_teilmengen() {
        let mut p = PlayoutPuffer::neu();
        p.write(0, 0, &vec![5i16; 100], false);

        let mut out = vec![0i16; 160];
        let n = p.read(0, &mut out);
        assert_eq!(n, 100, "nur verfuegbare Samples liefern");
    }

    #[test]
    fn adaptiv_stabiler_strom_behaelt_offset() {
        let mut p = AdaptivesPlayout::neu(SR);
        let mut out = vec![0i16; 160];

        for i in 0..50u32 {
            let ts = i * 160;
            p.write(ts, ts, &sinus_paket(ts, 160), false);
            p.read(ts, &mut out);
        }

        assert_eq!(
            p.offset(),
            WSOLA_START_OFF,
            "ohne Jitter darf der Offset nicht wandern"
        );
        // Signal fliesst durch
        assert!(out.iter().any(|&s| s != 0), "Ausgabe darf nicht stumm sein");
    }

    #[test]
    fn adaptiv_folgt_wachsender_verzoegerung() {
        let mut p = AdaptivesPlayout::neu(SR);
        let mut out = vec![0i16; 160];

        // Referenzzeit laeuft dem RTP-Zeitstempel zunehmend voraus
        for i in 0..80u32 {
            let ts = i * 160;
            let verzug = (i * 8).min(400);
            p.write(ts.wrapping_add(verzug), ts, &sinus_paket(ts, 160), false);
            p.read(ts, &mut out);
        }

        assert!(
            p.offset() > WSOLA_START_OFF,
            "Offset {} muss der gestiegenen Verzoegerung folgen",
            p.offset()
        );
    }

    #[test]
    fn adaptiv_leerer_puffer_degradiert_zu_stille() {
        let mut p = AdaptivesPlayout::neu(SR);
        let mut out = vec![0i16; 160];

        for i in 0..20u32 {
            let ts = i * 160;
            p.write(ts, ts, &sinus_paket(ts, 160), false);
            p.read(ts, &mut out);
        }

        // Zustrom endet; erst Dehnung/Verdeckung, spaeter Stille
        let mut letzte = vec![0i16; 160];
        for i in 20..40u32 {
            let n = p.read(i * 160, &mut letzte);
            assert_eq!(n, 160, "read muss immer volle Frames liefern");
        }
        assert!(
            letzte.iter().all(|&s| s == 0),
            "lange nach dem letzten Paket muss Stille kommen"
        );
    }

    #[test]
    fn jb_playout_ende_zu_ende() {
        let mut p = JbPlayout::neu(SR);
        let mut out = vec![0i16; 160];
        let mut nonzero_gesehen = false;

        for i in 0..60u32 {
            p.write(i * 160, 5000 + i * 160, &vec![1000i16; 160], false);
            p.read(i * 160, &mut out);
            if out.iter().any(|&s| s != 0) {
                nonzero_gesehen = true;
            }
        }

        assert!(nonzero_gesehen, "Paketinhalt muss den Leser erreichen");
        assert_eq!(
            out.iter().filter(|&&s| s == 1000).count(),
            160,
            "eingeschwungen muss das Signal unveraendert ankommen"
        );
    }

    #[test]
    fn jb_playout_verdeckt_einzelverlust() {
        let mut p = JbPlayout::neu(SR);
        let mut out = vec![0i16; 160];

        for i in 0..40u32 {
            if i != 25 {
                // Paket 25 geht verloren
                let ts = 5000 + i * 160;
                p.write(i * 160, ts, &sinus_paket(ts, 160), false);
            }
            p.read(i * 160, &mut out);
        }

        assert!(
            p.plc_statistik().verdeckte_frames > 0,
            "der fehlende Abschnitt muss verdeckt worden sein"
        );
        // Strom laeuft nach dem Verlust normal weiter
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test]
    fn jb_playout_lange_pause_wird_stille() {
        let mut p = JbPlayout::neu(SR);
        let mut out = vec![0i16; 160];

        for i in 0..10u32 {
            p.write(i * 160, 5000 + i * 160, &vec![900i16; 160], false);
            p.read(i * 160, &mut out);
        }

        // Lange Funkstille ohne Pakete: weit jenseits der Verdeckungsgrenze
        for i in 10..30u32 {
            p.read(i * 160, &mut out);
        }
        assert!(
            out.iter().all(|&s| s == 0),
            "jenseits der Verdeckungsgrenze liefert der Strom Stille"
        );
    }

    #[test]
    fn strategie_enum_delegiert() {
        let mut s = PlayoutStrategie::neu(PlayoutModus::Einfach, SR);
        s.write(0, 0, &vec![3i16; 80], false);

        let mut out = vec![0i16; 80];
        assert_eq!(s.read(0, &mut out), 80);
        assert!(out.iter().all(|&v| v == 3));
    }

    #[test]
    fn direct_write_umgeht_schaetzer() {
        let mut s = PlayoutStrategie::neu(PlayoutModus::JitterPuffer, SR);
        s.direct_write(1000, &vec![7i16; 160]);

        let mut out = vec![0i16; 160];
        s.read(1000, &mut out);
        assert!(out.iter().all(|&v| v == 7));
    }
}
