//! Gemeinsame Identifikationstypen fuer Sprechsaal
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Mixer-interne
//! Kanal-IDs sind bewusst keine UUIDs, sondern kleine Ganzzahlen, die der
//! Mixer selbst vergibt – sie leben nur innerhalb einer Konferenz.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige ID eines Audio-Stroms (eine RTP-Richtung einer Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    /// Erstellt eine neue zufaellige StreamId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "strom:{}", self.0)
    }
}

/// Eindeutige ID einer Konferenz (ein Mixer samt Teilnehmern)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KonferenzId(pub Uuid);

impl KonferenzId {
    /// Erstellt eine neue zufaellige KonferenzId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for KonferenzId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KonferenzId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "konferenz:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_eindeutig() {
        let a = StreamId::new();
        let b = StreamId::new();
        assert_ne!(a, b, "StreamIds muessen eindeutig sein");
    }

    #[test]
    fn konferenz_id_display() {
        let id = KonferenzId::new();
        let text = id.to_string();
        assert!(text.starts_with("konferenz:"));
    }
}
