// Ausgabedatei: Pfad ableiten, Groesse nach dem Lauf, Groessenlimit.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Gleiches Verzeichnis, Endung durch `.av1.mkv` ersetzt.
pub fn output_path_for(input: &Path) -> PathBuf {
    input.with_extension("av1.mkv")
}

/// Tatsaechliche Groesse auf der Platte; bei Dateisystemfehler die zuletzt
/// gemeldete Telemetrie-Groesse.
pub async fn actual_output_size(path: &Path, telemetry_bytes: u64) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            debug!(?path, error = %e, "Ausgabegroesse nicht lesbar, nehme Telemetrie-Wert");
            telemetry_bytes
        }
    }
}

/// Ergebnis der Groessenpruefung.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeCheck {
    pub within_limit: bool,
    /// Ausgabe in Prozent der Eingabe; None wenn die Pruefung deaktiviert ist.
    pub ratio_percent: Option<f64>,
}

/// Vergleicht Ausgabe- mit Eingabegroesse. `max_percent == 0` deaktiviert
/// die Pruefung.
pub async fn check_output_size(input: &Path, output: &Path, max_percent: u32) -> io::Result<SizeCheck> {
    if max_percent == 0 {
        return Ok(SizeCheck {
            within_limit: true,
            ratio_percent: None,
        });
    }

    let input_len = tokio::fs::metadata(input).await?.len();
    let output_len = tokio::fs::metadata(output).await?.len();
    if input_len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Eingabedatei ist leer"));
    }

    let ratio = output_len as f64 / input_len as f64 * 100.0;
    Ok(SizeCheck {
        within_limit: ratio <= f64::from(max_percent),
        ratio_percent: Some(ratio),
    })
}
