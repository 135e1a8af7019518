//! Zeitstempel-adressierter Ringpuffer fuer Audio-Samples
//!
//! Fundament aller anderen Engine-Komponenten. Der Puffer haelt immer nur
//! ein gueltiges Fenster von hoechstens [`SAMPLE_ARRAY_GROESSE`] Samples,
//! das bei `last_ts` endet:
//! - `put` aelter als `last_ts - Kapazitaet` wird still verworfen
//!   (veraltetes/umsortiertes Paket)
//! - `get` ausserhalb des Fensters liefert Stille (Nullen), nie
//!   undefinierte Daten
//! - Springt das Fenster vorwaerts, wird der uebersprungene Bereich genullt
//!
//! Lese- und Schreiboperationen ueber den Umbruchpunkt zerfallen in zwei
//! zusammenhaengende Kopien. Der Sample-Typ ist `i16` fuer Audio und `i32`
//! fuer die Mischsumme des Konferenzmischers.

use crate::timestamp::{ist_frueher, Ringindex};

/// Kapazitaet des Ringpuffers in Samples (Zweierpotenz, ~2 s bei 8 kHz)
pub const SAMPLE_ARRAY_GROESSE: u32 = 16384;

/// Maximale Paketgroesse, die die Engine verarbeitet (80 ms bei 8 kHz)
pub const MAX_PAKET_SAMPLES: usize = 640;

/// Sample-Typ des Ringpuffers
pub trait Probe: Copy + Default + 'static {}
impl Probe for i16 {}
impl Probe for i32 {}

/// Ringpuffer mit Zeitstempel-Adressierung und gueltigem Fenster
pub struct SampleArray<T> {
    samples: Box<[T]>,
    index: Ringindex,
    last_ts: u32,
    init: bool,
}

impl<T: Probe> SampleArray<T> {
    /// Erstellt einen leeren Puffer; das Fenster beginnt mit dem ersten `put`
    pub fn neu() -> Self {
        Self {
            samples: vec![T::default(); SAMPLE_ARRAY_GROESSE as usize].into_boxed_slice(),
            index: Ringindex::neu(SAMPLE_ARRAY_GROESSE),
            last_ts: 0,
            init: false,
        }
    }

    fn groesse(&self) -> u32 {
        self.index.kapazitaet()
    }

    /// Nullt den Bereich `[start_ts, end_ts)`
    fn loeschen(&mut self, start_ts: u32, end_ts: u32) {
        if end_ts.wrapping_sub(start_ts) >= self.groesse() {
            self.samples.fill(T::default());
            return;
        }

        let start = self.index.position(start_ts);
        let ende = self.index.position(end_ts);
        if start < ende {
            self.samples[start..ende].fill(T::default());
        } else {
            self.samples[start..].fill(T::default());
            self.samples[..ende].fill(T::default());
        }
    }

    /// Kopiert `daten` ab `ts` in den Puffer, ggf. in zwei Teilen
    fn schreiben(&mut self, ts: u32, daten: &[T]) {
        let off = self.index.position(ts);
        let kap = self.samples.len();

        if off + daten.len() <= kap {
            self.samples[off..off + daten.len()].copy_from_slice(daten);
        } else {
            let erster_teil = kap - off;
            self.samples[off..].copy_from_slice(&daten[..erster_teil]);
            self.samples[..daten.len() - erster_teil].copy_from_slice(&daten[erster_teil..]);
        }
    }

    /// Liest `ziel.len()` Samples ab `ts` aus dem Puffer, ggf. in zwei Teilen
    fn lesen(&self, ts: u32, ziel: &mut [T]) {
        let off = self.index.position(ts);
        let kap = self.samples.len();

        if off + ziel.len() <= kap {
            ziel.copy_from_slice(&self.samples[off..off + ziel.len()]);
        } else {
            let erster_teil = kap - off;
            let ziel_len = ziel.len();
            ziel[..erster_teil].copy_from_slice(&self.samples[off..]);
            ziel[erster_teil..].copy_from_slice(&self.samples[..ziel_len - erster_teil]);
        }
    }

    /// Speichert `daten` ab `ts`; ueberschreibt vorhandene Samples.
    ///
    /// Der erste `put` initialisiert das Fenster bei `ts`. Pakete, die mehr
    /// als eine Pufferlaenge hinter `last_ts` liegen, werden verworfen.
    pub fn put(&mut self, ts: u32, daten: &[T]) {
        debug_assert!(daten.len() as u32 <= self.groesse());
        if daten.is_empty() {
            return;
        }

        if !self.init {
            self.samples.fill(T::default());
            self.last_ts = ts;
            self.init = true;
        }

        if ist_frueher(ts, self.last_ts.wrapping_sub(self.groesse())) {
            tracing::debug!(ts, last_ts = self.last_ts, "Veraltetes Paket verworfen");
            return;
        }

        // Fenster springt vorwaerts: uebersprungenen Bereich nullen
        if ist_frueher(self.last_ts, ts) {
            self.loeschen(self.last_ts, ts);
        }

        self.schreiben(ts, daten);

        let ende = ts.wrapping_add(daten.len() as u32);
        if ist_frueher(self.last_ts, ende) {
            self.last_ts = ende;
        }
    }

    /// Liest `ziel.len()` Samples ab `ts`; ausserhalb des gueltigen Fensters
    /// (oder vor der Initialisierung) wird mit Stille aufgefuellt.
    pub fn get(&self, ts: u32, ziel: &mut [T]) {
        debug_assert!(ziel.len() as u32 <= self.groesse());
        if ziel.is_empty() {
            return;
        }

        let len = ziel.len() as u32;
        let fenster_start = self.last_ts.wrapping_sub(self.groesse());

        // Komplett ausserhalb: ts >= last_ts oder ts+len <= Fensteranfang
        if !self.init
            || !ist_frueher(ts, self.last_ts)
            || !ist_frueher(fenster_start, ts.wrapping_add(len))
        {
            ziel.fill(T::default());
            return;
        }

        if ist_frueher(ts, fenster_start) {
            // Anfang liegt vor dem Fenster: vorn Stille, Rest lesen
            let s = fenster_start.wrapping_sub(ts) as usize;
            ziel[..s].fill(T::default());
            self.lesen(fenster_start, &mut ziel[s..]);
        } else if ist_frueher(self.last_ts, ts.wrapping_add(len)) {
            // Ende ragt ueber das Fenster hinaus: hinten Stille
            let s = self.last_ts.wrapping_sub(ts) as usize;
            self.lesen(ts, &mut ziel[..s]);
            ziel[s..].fill(T::default());
        } else {
            self.lesen(ts, ziel);
        }
    }

    /// Ende des gueltigen Fensters, `None` vor dem ersten `put`
    pub fn letzter_ts(&self) -> Option<u32> {
        self.init.then_some(self.last_ts)
    }
}

impl<T: Probe> Default for SampleArray<T> {
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rampe(start: i16, len: usize) -> Vec<i16> {
        (0..len).map(|i| start.wrapping_add(i as i16)).collect()
    }

    #[test]
    fn put_get_roundtrip() {
        let mut arr = SampleArray::<i16>::neu();
        let daten = rampe(100, 160);

        arr.put(1000, &daten);

        let mut gelesen = vec![0i16; 160];
        arr.get(1000, &mut gelesen);
        assert_eq!(gelesen, daten, "put/get muss Daten unveraendert liefern");
    }

    #[test]
    fn get_vor_initialisierung_liefert_stille() {
        let arr = SampleArray::<i16>::neu();
        let mut gelesen = vec![123i16; 80];
        arr.get(42, &mut gelesen);
        assert!(gelesen.iter().all(|&s| s == 0));
    }

    #[test]
    fn get_nie_geschriebener_bereich_liefert_stille() {
        let mut arr = SampleArray::<i16>::neu();
        arr.put(0, &rampe(1, 160));

        // Hinter dem Fensterende
        let mut gelesen = vec![55i16; 80];
        arr.get(160, &mut gelesen);
        assert!(gelesen.iter().all(|&s| s == 0), "hinter dem Fenster");
    }

    #[test]
    fn roundtrip_ueber_umbruchpunkt() {
        let mut arr = SampleArray::<i16>::neu();
        // Schreibt 160 Samples, die ueber die 16384er-Grenze laufen
        let ts = SAMPLE_ARRAY_GROESSE - 80;
        let daten = rampe(7, 160);
        arr.put(ts, &daten);

        let mut gelesen = vec![0i16; 160];
        arr.get(ts, &mut gelesen);
        assert_eq!(gelesen, daten, "Umbruch muss in zwei Kopien zerfallen");
    }

    #[test]
    fn roundtrip_ueber_u32_ueberlauf() {
        let mut arr = SampleArray::<i16>::neu();
        let ts = u32::MAX - 79;
        let daten = rampe(-3, 160);
        arr.put(ts, &daten);

        let mut gelesen = vec![0i16; 160];
        arr.get(ts, &mut gelesen);
        assert_eq!(gelesen, daten, "u32-Ueberlauf darf die Adressierung nicht stoeren");
    }

    #[test]
    fn veraltetes_paket_wird_verworfen() {
        let mut arr = SampleArray::<i16>::neu();
        arr.put(100_000, &rampe(1, 160));

        // Mehr als eine Pufferlaenge in der Vergangenheit
        let alt_ts = 100_000u32.wrapping_sub(SAMPLE_ARRAY_GROESSE + 500);
        arr.put(alt_ts, &rampe(99, 160));

        let mut gelesen = vec![0i16; 160];
        arr.get(alt_ts, &mut gelesen);
        assert!(gelesen.iter().all(|&s| s == 0), "veraltetes put darf nichts schreiben");
    }

    #[test]
    fn fenstersprung_nullt_uebersprungenes() {
        let mut arr = SampleArray::<i16>::neu();
        arr.put(0, &vec![111i16; 160]);
        // Sprung nach vorn laesst eine Luecke [160, 480)
        arr.put(480, &vec![222i16; 160]);

        let mut gelesen = vec![9i16; 160];
        arr.get(160, &mut gelesen);
        assert!(gelesen.iter().all(|&s| s == 0), "Luecke muss genullt sein");

        arr.get(480, &mut gelesen);
        assert!(gelesen.iter().all(|&s| s == 222));
    }

    #[test]
    fn get_teilweise_vor_dem_fenster() {
        let mut arr = SampleArray::<i16>::neu();
        // Fenster weit nach vorn schieben, so dass der Anfang herausfaellt
        arr.put(0, &vec![5i16; 160]);
        arr.put(SAMPLE_ARRAY_GROESSE, &vec![6i16; 160]);

        // [0, 160) liegt jetzt genau eine Pufferlaenge zurueck
        let mut gelesen = vec![1i16; 160];
        arr.get(0, &mut gelesen);
        assert!(
            gelesen.iter().all(|&s| s == 0),
            "alter Bereich ist aus dem Fenster gefallen"
        );
    }

    #[test]
    fn mischsummen_variante_i32() {
        let mut arr = SampleArray::<i32>::neu();
        let daten: Vec<i32> = (0..160).map(|i| i * 1000).collect();
        arr.put(64, &daten);

        let mut gelesen = vec![0i32; 160];
        arr.get(64, &mut gelesen);
        assert_eq!(gelesen, daten);
    }

    #[test]
    fn get_ende_ragt_ueber_fenster_hinaus() {
        let mut arr = SampleArray::<i16>::neu();
        arr.put(0, &vec![44i16; 100]);

        let mut gelesen = vec![1i16; 160];
        arr.get(0, &mut gelesen);
        assert!(gelesen[..100].iter().all(|&s| s == 44));
        assert!(gelesen[100..].iter().all(|&s| s == 0), "Rest hinter last_ts ist Stille");
    }
}
