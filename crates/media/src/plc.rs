//! Verlustverdeckung (PLC) durch Tonhoehen-Synthese
//!
//! Synthetisiert fuer verlorene Frames plausibles Ersatz-Audio aus der
//! juengsten Historie echter Samples:
//! 1. Beim ersten verlorenen Frame wird per normierter Autokorrelation die
//!    Tonhoehe bestimmt (Grobsuche 2:1 dezimiert, dann Feinsuche um das
//!    grobe Optimum; Energie-Untergrenze gegen Division bei Stille).
//! 2. Eine Tonhoehenperiode wird aus der Historie entnommen und mit einer
//!    Viertelwellen-Ueberblendung angesetzt, damit kein Knacken entsteht.
//! 3. Haelt der Verlust an, waechst der Periodenpuffer alle 10 ms um eine
//!    weitere Periode; die Verstaerkung faellt pro Frame um einen festen
//!    Faktor, bis nach dem fuenften Frame nur noch Stille kommt.
//! 4. Kehrt echtes Audio zurueck, wird der Syntheseschwanz in den Anfang
//!    des ersten guten Frames uebergeblendet.
//!
//! Die Synthese wird in die Historie zurueckgespeist, als waere sie echtes
//! Audio; dadurch bleibt der Tonhoehen-Zustand ueber Verlustserien
//! konsistent. Durch die Historienpflege verlaesst jedes Frame den
//! Verdecker um eine maximale Viertelwelle verzoegert.

/// 2:1-Dezimierung der Grobsuche
const NDEC: usize = 2;

/// Zuwachs der End-Ueberblendung pro verdecktem Frame (Samples, 4 ms)
const EOVERLAP_INCR: usize = 32;

/// Daempfungsfaktor pro 10-ms-Frame
const ATTEN_FAKTOR: f32 = 0.2;

/// Ab diesem Zaehlerstand wird nur noch Stille ausgegeben
const MAX_VERDECKTE_FRAMES: usize = 5;

/// Statistiken der Verlustverdeckung (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct PlcStatistik {
    /// Verdeckte Frames gesamt
    pub verdeckte_frames: u64,
    /// Frames, die nur noch als Stille ausgegeben wurden
    pub stille_frames: u64,
    /// Anzahl abgeschlossener Verlust-Episoden
    pub episoden: u64,
}

/// Verlustverdecker fuer einen einzelnen PCM-Strom
///
/// Nicht thread-safe; wird pro Strom bzw. pro Mixer-Kanal gehalten und
/// von dessen Besitzer synchronisiert.
pub struct LossConcealer {
    // Abgeleitete Konstanten (einmal aus der Abtastrate berechnet)
    pitch_max: usize,
    pitch_min: usize,
    poverlap_max: usize,
    history_len: usize,
    corr_len: usize,
    corr_min_power: f32,
    frame_len: usize,

    // Zustand der laufenden Verlust-Episode
    erase_cnt: usize,
    poverlap: usize,
    poffset: usize,
    pitch: usize,
    pitchblen: usize,

    // Puffer
    pitchbuf: Vec<f32>,
    lastq: Vec<f32>,
    history: Vec<i16>,
    scratch_frame: Vec<i16>,
    scratch_q: Vec<i16>,

    statistik: PlcStatistik,
}

impl LossConcealer {
    /// Erstellt einen Verdecker fuer die gegebene Abtastrate (8000 oder 16000)
    pub fn neu(sample_rate: u32) -> Self {
        let sr = sample_rate as usize;
        assert!(sr >= 8000, "Abtastrate zu niedrig fuer Tonhoehensuche");

        let pitch_min = sr / 200; // 200 Hz
        let pitch_max = (sr as f32 / 66.6) as usize; // 66 Hz
        let poverlap_max = pitch_max >> 2;
        let history_len = pitch_max * 3 + poverlap_max;
        let corr_len = 20 * sr / 1000; // 20 ms Korrelationsfenster
        let frame_len = 10 * sr / 1000; // 10 ms Frames

        Self {
            pitch_max,
            pitch_min,
            poverlap_max,
            history_len,
            corr_len,
            corr_min_power: 250.0 * (sr / 8000) as f32,
            frame_len,
            erase_cnt: 0,
            poverlap: 0,
            poffset: 0,
            pitch: 0,
            pitchblen: 0,
            pitchbuf: vec![0.0; history_len],
            lastq: vec![0.0; poverlap_max],
            history: vec![0; history_len],
            scratch_frame: vec![0; frame_len],
            scratch_q: vec![0; poverlap_max],
            statistik: PlcStatistik::default(),
        }
    }

    /// Framelaenge (10 ms) in Samples
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Zuletzt geschaetzte Tonhoehenperiode in Samples (0 vor dem ersten Verlust)
    pub fn tonhoehe(&self) -> usize {
        self.pitch
    }

    /// Gibt die aktuellen Statistiken zurueck
    pub fn statistik(&self) -> &PlcStatistik {
        &self.statistik
    }

    /// Verwirft den Episoden-Zustand (z.B. bei gewolltem Sprechbeginn nach
    /// Stille, der nicht als Verlust behandelt werden soll)
    pub fn zuruecksetzen(&mut self) {
        self.erase_cnt = 0;
    }

    /// Verarbeitet ein gutes (echtes) Frame
    ///
    /// Direkt nach einer Verlust-Episode wird der Syntheseschwanz in den
    /// Frame-Anfang uebergeblendet; laengere Episoden bekommen laengere
    /// Ueberblendungen. Das Frame wird in die Historie uebernommen und
    /// verzoegert wieder herausgegeben.
    pub fn gutes_frame(&mut self, s: &mut [i16]) {
        debug_assert_eq!(s.len(), self.frame_len);

        if self.erase_cnt > 0 {
            let olen = (self.poverlap + (self.erase_cnt - 1) * EOVERLAP_INCR).min(self.frame_len);

            let mut overlap = std::mem::take(&mut self.scratch_frame);
            self.synthese_lesen(&mut overlap[..olen]);
            self.ende_overlap_add(s, &overlap[..olen]);
            self.scratch_frame = overlap;

            self.erase_cnt = 0;
            self.statistik.episoden += 1;
        }
        self.sprache_sichern(s);
    }

    /// Synthetisiert ein Frame fuer einen Verlust
    pub fn verdecken(&mut self, out: &mut [i16]) {
        debug_assert_eq!(out.len(), self.frame_len);
        let ende = self.history_len;

        if self.erase_cnt == 0 {
            // Episodenstart: Historie uebernehmen, Tonhoehe bestimmen
            for (p, &h) in self.pitchbuf.iter_mut().zip(self.history.iter()) {
                *p = h as f32;
            }
            self.pitch = self.tonhoehe_suchen();
            self.poverlap = self.pitch >> 2;

            // Originale letzte Viertelwelle sichern
            self.lastq[..self.poverlap]
                .copy_from_slice(&self.pitchbuf[ende - self.poverlap..]);

            self.poffset = 0;
            self.pitchblen = self.pitch;
            self.perioden_ansatz_glaetten();

            // Historien-Ende mit der geglaetteten Viertelwelle angleichen
            for i in 0..self.poverlap {
                self.history[ende - self.poverlap + i] =
                    self.pitchbuf[ende - self.poverlap + i] as i16;
            }
            self.synthese_lesen_voll(out);
            tracing::debug!(tonhoehe = self.pitch, "Verlustverdeckung gestartet");
        } else if self.erase_cnt == 1 || self.erase_cnt == 2 {
            // Periodenpuffer um eine weitere Periode verlaengern; den alten
            // Syntheseverlauf per Ueberblendung an den neuen anschliessen
            let mut alt = std::mem::take(&mut self.scratch_q);
            let save_offset = self.poffset;
            let n = self.poverlap;
            self.synthese_lesen(&mut alt[..n]);

            self.poffset = save_offset;
            while self.poffset > self.pitch {
                self.poffset -= self.pitch;
            }
            self.pitchblen += self.pitch;
            self.perioden_ansatz_glaetten();

            self.synthese_lesen_voll(out);
            overlap_add_i16(&alt[..n], &mut out[..n]);
            self.scratch_q = alt;

            self.abschwaechen(out);
        } else if self.erase_cnt > MAX_VERDECKTE_FRAMES {
            // Verlust zu lang: keine Synthese mehr, nur Stille
            out.fill(0);
            self.statistik.stille_frames += 1;
        } else {
            self.synthese_lesen_voll(out);
            self.abschwaechen(out);
        }

        self.erase_cnt += 1;
        self.statistik.verdeckte_frames += 1;
        // Synthese zaehlt fuer die Historie wie echtes Audio
        self.sprache_sichern(out);
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Schiebt ein Frame in die Historie und gibt das um `poverlap_max`
    /// verzoegerte Frame zurueck
    fn sprache_sichern(&mut self, s: &mut [i16]) {
        let h = self.history_len;
        let f = self.frame_len;

        self.history.copy_within(f.., 0);
        self.history[h - f..].copy_from_slice(s);

        let start = h - f - self.poverlap_max;
        s.copy_from_slice(&self.history[start..start + f]);
    }

    /// Blendet die gesicherte Viertelwelle mit der Viertelwelle vor dem
    /// Periodenstart und schreibt das Ergebnis an das Ende des
    /// Tonhoehenpuffers (glatter Einstieg in die Wiederholung)
    fn perioden_ansatz_glaetten(&mut self) {
        let ende = self.history_len;
        let start = ende - self.pitchblen;
        let n = self.poverlap;
        if n == 0 {
            return;
        }

        let incr = 1.0 / n as f32;
        let mut lw = 1.0 - incr;
        let mut rw = incr;
        for i in 0..n {
            let t = lw * self.lastq[i] + rw * self.pitchbuf[start - n + i];
            self.pitchbuf[ende - n + i] = t.clamp(-32768.0, 32767.0);
            lw -= incr;
            rw += incr;
        }
    }

    /// Liest Samples aus dem zyklischen Periodenpuffer; `poffset` laeuft
    /// weiter, damit Folgeframes nahtlos anschliessen
    fn synthese_lesen(&mut self, out: &mut [i16]) {
        let start = self.history_len - self.pitchblen;
        let mut pos = 0;
        while pos < out.len() {
            let cnt = (self.pitchblen - self.poffset).min(out.len() - pos);
            for i in 0..cnt {
                out[pos + i] = self.pitchbuf[start + self.poffset + i] as i16;
            }
            self.poffset += cnt;
            if self.poffset == self.pitchblen {
                self.poffset = 0;
            }
            pos += cnt;
        }
    }

    /// Wie [`synthese_lesen`], nur ueber die volle Framelaenge
    fn synthese_lesen_voll(&mut self, out: &mut [i16]) {
        debug_assert_eq!(out.len(), self.frame_len);
        self.synthese_lesen(out);
    }

    /// Daempft das Frame linear; pro bereits verdecktem Frame faellt die
    /// Start-Verstaerkung um [`ATTEN_FAKTOR`]
    fn abschwaechen(&mut self, out: &mut [i16]) {
        let mut g = 1.0 - (self.erase_cnt as f32 - 1.0) * ATTEN_FAKTOR;
        let incr = ATTEN_FAKTOR / self.frame_len as f32;
        for s in out.iter_mut() {
            *s = (*s as f32 * g) as i16;
            g -= incr;
        }
    }

    /// Blendet den gedaempften Syntheseschwanz `f` in den Anfang des ersten
    /// guten Frames `s`
    fn ende_overlap_add(&self, s: &mut [i16], f: &[i16]) {
        let n = f.len();
        if n == 0 {
            return;
        }

        let incr = 1.0 / n as f32;
        let gain = (1.0 - (self.erase_cnt as f32 - 1.0) * ATTEN_FAKTOR).max(0.0);
        let incrg = incr * gain;
        let mut lw = (1.0 - incr) * gain;
        let mut rw = incr;
        for i in 0..n {
            let t = lw * f[i] as f32 + rw * s[i] as f32;
            s[i] = t.clamp(-32768.0, 32767.0) as i16;
            lw -= incrg;
            rw += incr;
        }
    }

    /// Tonhoehenschaetzung ueber normierte Autokorrelation der letzten 20 ms
    ///
    /// Grobsuche 2:1 dezimiert ueber den plausiblen Lag-Bereich, danach
    /// Feinsuche um das grobe Optimum. Die Korrelation wird durch die lokale
    /// Energie normiert; `corr_min_power` verhindert die Division durch
    /// (nahezu) Null bei Stille.
    fn tonhoehe_suchen(&self) -> usize {
        let ende = self.history_len;
        let corr_len = self.corr_len;
        let pitchdiff = self.pitch_max - self.pitch_min;
        let l = ende - corr_len;
        let r = ende - (corr_len + self.pitch_max);

        // Grobsuche
        let mut energie = 0.0f32;
        let mut korr = 0.0f32;
        let mut i = 0;
        while i < corr_len {
            let v = self.pitchbuf[r + i];
            energie += v * v;
            korr += v * self.pitchbuf[l + i];
            i += NDEC;
        }
        let mut beste_korr = korr / energie.max(self.corr_min_power).sqrt();
        let mut bester_lag = 0usize;

        let mut rp = r;
        let mut j = NDEC;
        while j <= pitchdiff {
            energie -= self.pitchbuf[rp] * self.pitchbuf[rp];
            energie += self.pitchbuf[rp + corr_len] * self.pitchbuf[rp + corr_len];
            rp += NDEC;

            korr = 0.0;
            let mut i = 0;
            while i < corr_len {
                korr += self.pitchbuf[rp + i] * self.pitchbuf[l + i];
                i += NDEC;
            }
            let c = korr / energie.max(self.corr_min_power).sqrt();
            if c >= beste_korr {
                beste_korr = c;
                bester_lag = j;
            }
            j += NDEC;
        }

        // Feinsuche um das grobe Optimum
        let j0 = bester_lag.saturating_sub(NDEC - 1);
        let k = (bester_lag + (NDEC - 1)).min(pitchdiff);

        let mut rp = r + j0;
        energie = 0.0;
        korr = 0.0;
        for i in 0..corr_len {
            let v = self.pitchbuf[rp + i];
            energie += v * v;
            korr += v * self.pitchbuf[l + i];
        }
        beste_korr = korr / energie.max(self.corr_min_power).sqrt();
        bester_lag = j0;

        for j in (j0 + 1)..=k {
            energie -= self.pitchbuf[rp] * self.pitchbuf[rp];
            energie += self.pitchbuf[rp + corr_len] * self.pitchbuf[rp + corr_len];
            rp += 1;

            korr = 0.0;
            for i in 0..corr_len {
                korr += self.pitchbuf[rp + i] * self.pitchbuf[l + i];
            }
            let c = korr / energie.max(self.corr_min_power).sqrt();
            if c > beste_korr {
                beste_korr = c;
                bester_lag = j;
            }
        }

        self.pitch_max - bester_lag
    }
}

/// Blendet `links` (ausklingend) in den Anfang von `ziel` (anschwellend)
fn overlap_add_i16(links: &[i16], ziel: &mut [i16]) {
    let n = links.len();
    if n == 0 {
        return;
    }

    let incr = 1.0 / n as f32;
    let mut lw = 1.0 - incr;
    let mut rw = incr;
    for i in 0..n {
        let t = lw * links[i] as f32 + rw * ziel[i] as f32;
        ziel[i] = t.clamp(-32768.0, 32767.0) as i16;
        lw -= incr;
        rw += incr;
    }
}
