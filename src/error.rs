// Fehlertypen fuer einen Encode-Lauf.

use std::path::PathBuf;

use thiserror::Error;

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Fehler, die einen Lauf beenden. Parse- und Probe-Fehler gehoeren nicht
/// hierher, die werden lokal abgefangen.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("FFmpeg konnte nicht gestartet werden: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Konnte {0} von FFmpeg nicht lesen")]
    MissingPipe(&'static str),

    #[error("FFmpeg beendet mit Exit-Code: {code}")]
    ExitStatus { code: i32 },

    #[error("Ungueltiger Input-Pfad {path:?}: {source}")]
    InvalidInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}
