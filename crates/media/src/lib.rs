//! sprechsaal-media – Echtzeit-Audio-Engine
//!
//! Nimmt verzitterte, umsortierte und teilweise verlorene PCM-Pakete vom
//! Netzwerk-Layer entgegen und liefert einen kontinuierlichen Sample-Strom
//! zum Wiedergabezeitpunkt – inklusive N-Wege-Mischung fuer Konferenzen.
//!
//! ## Module
//! - [`timestamp`] – Zirkulaere 32-Bit-Zeitstempel-Arithmetik
//! - [`sample_array`] – Zeitstempel-adressierter Ringpuffer
//! - [`stats`] – Statistik-Helfer (Welford, gleitendes Mittel)
//! - [`delay`] – Playout-Verzoegerungsschaetzer (Ordnungsstatistik)
//! - [`plc`] – Verlustverdeckung durch Tonhoehen-Synthese
//! - [`jitter_buffer`] – Umsortierender Paketpuffer mit festem Pool
//! - [`playout`] – Playout-Strategien (einfach, Jitter-Buffer, adaptiv/WSOLA)
//! - [`mixer`] – N-Wege-Konferenzmischer mit Selbstabzug und AGC
//! - [`stream`] – Schmale put/get-Schnittstelle fuer die Session-Schicht
//! - [`processor`] – Periodischer 10-ms-Takttreiber

pub mod delay;
pub mod jitter_buffer;
pub mod mixer;
pub mod playout;
pub mod plc;
pub mod processor;
pub mod sample_array;
pub mod stats;
pub mod stream;
pub mod timestamp;

pub use jitter_buffer::JitterBuffer;
pub use mixer::MultiPartyMixer;
pub use playout::{Playout, PlayoutModus, PlayoutStrategie};
pub use stream::{AudioStrom, KonferenzKanal};
