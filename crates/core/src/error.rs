//! Fehlertypen fuer Sprechsaal
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Erwartetes Netzwerk-Rauschen (veraltete oder duplizierte Pakete) ist
//! bewusst KEIN Fehler: es wird still verworfen und hoechstens geloggt,
//! damit der Medienpfad in Echtzeit weiterlaufen kann.

use crate::types::StreamId;
use thiserror::Error;

/// Globaler Result-Alias fuer Sprechsaal
pub type Result<T> = std::result::Result<T, SprechsaalError>;

/// Alle moeglichen Fehler im Sprechsaal-System
#[derive(Debug, Error)]
pub enum SprechsaalError {
    // --- Ressourcen ---
    #[error("Mixer-Kanal nicht gefunden: #{0}")]
    KanalNichtGefunden(u32),

    #[error("Strom nicht gefunden: {0}")]
    StromNichtGefunden(StreamId),

    #[error("Strom bereits beendet")]
    StromBeendet,

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SprechsaalError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_meldung_kanal() {
        let e = SprechsaalError::KanalNichtGefunden(7);
        assert_eq!(e.to_string(), "Mixer-Kanal nicht gefunden: #7");
    }

    #[test]
    fn intern_helfer() {
        let e = SprechsaalError::intern("kaputt");
        assert!(matches!(e, SprechsaalError::Intern(_)));
    }
}
