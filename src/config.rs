// Konfiguration: Encoder-Optionen (kommen mit dem start_encode-Request)
// und die Heuristik-Konstanten der Fortschrittsberechnung.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Encoder-Einstellungen fuer einen Lauf. Defaults entsprechen den
/// SVT-AV1-HDR Empfehlungen.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    /// Constant Rate Factor (0-63, niedriger = bessere Qualitaet)
    pub crf: u32,
    /// Geschwindigkeit vs. Kompression (0-13)
    pub preset: u32,
    /// 0=VQ, 1=PSNR, 2=SSIM, 3=IQ, 4=Film Grain
    pub tune: u32,
    pub variance_boost: bool,
    pub variance_boost_strength: u32,
    pub sharpness: u32,
    pub tf_strength: u32,
    pub film_grain: u32,
    /// Maximale Ausgabegroesse in Prozent der Eingabe (0 = deaktiviert)
    pub max_size_percent: u32,
    /// Sprachcodes, deren Audio- und Untertitelspuren entfernt werden
    pub remove_languages: Vec<String>,
    /// Bild-Codecs (Cover-Art etc.), die entfernt werden
    pub remove_image_codecs: Vec<String>,
    /// Minimale Quell-Bitrate in kbps, darunter wird uebersprungen (0 = deaktiviert)
    pub min_bitrate_kbps: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            crf: 35,
            preset: 4,
            tune: 1,
            variance_boost: true,
            variance_boost_strength: 2,
            sharpness: 1,
            tf_strength: 1,
            film_grain: 0,
            max_size_percent: 0,
            remove_languages: Vec::new(),
            remove_image_codecs: vec!["mjpeg".to_string(), "png".to_string()],
            min_bitrate_kbps: 0,
        }
    }
}

/// Heuristik-Konstanten fuer Prozent-Abgleich und ETA.
/// Empirisch eingestellt, nicht hergeleitet.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProgressTuning {
    /// Ab dieser Abweichung (Prozentpunkte) gewinnt der zeitbasierte Wert.
    pub disagreement_threshold: f64,
    /// Gewicht des neuen ETA-Werts im Normalfall.
    pub eta_weight: f64,
    /// Gewicht des neuen ETA-Werts bei grossen Spruengen.
    pub eta_jump_weight: f64,
    /// Relativer Sprung (bezogen auf den alten Wert), ab dem gedaempft wird.
    pub eta_jump_ratio: f64,
    /// Keine ETA in den ersten Sekunden nach Start.
    pub warmup_secs: u64,
    /// Hochrechnung aus der Laufzeit erst ab diesem Prozentwert ...
    pub extrapolation_min_percent: f64,
    /// ... und erst nach so vielen Sekunden.
    pub extrapolation_min_elapsed_secs: u64,
}

impl Default for ProgressTuning {
    fn default() -> Self {
        Self {
            disagreement_threshold: 10.0,
            eta_weight: 0.3,
            eta_jump_weight: 0.2,
            eta_jump_ratio: 0.5,
            warmup_secs: 5,
            extrapolation_min_percent: 2.0,
            extrapolation_min_elapsed_secs: 10,
        }
    }
}

impl ProgressTuning {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn extrapolation_min_elapsed(&self) -> Duration {
        Duration::from_secs(self.extrapolation_min_elapsed_secs)
    }
}

/// Prozessweite Einstellungen aus der Kommandozeile.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub probe_timeout: Duration,
    pub log_capacity: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// So viele beendete Jobs bleiben abfragbar, aeltere fallen raus.
    pub keep_finished: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            log_capacity: 100,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            keep_finished: 32,
        }
    }
}

impl BackendSettings {
    /// Liest `--probe-timeout SECS`, `--log-capacity N`, `--keep-finished N`,
    /// `--ffmpeg PFAD` und `--ffprobe PFAD`. Ungueltige Werte fallen auf die
    /// Defaults zurueck.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let defaults = Self::default();

        let flag_value = |name: &str| {
            args.iter()
                .skip_while(|a| a.as_str() != name)
                .nth(1)
                .cloned()
        };

        let probe_timeout = flag_value("--probe-timeout")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n >= 1)
            .map(Duration::from_secs)
            .unwrap_or(defaults.probe_timeout);

        let log_capacity = flag_value("--log-capacity")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(defaults.log_capacity);

        let ffmpeg_path = flag_value("--ffmpeg")
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.ffmpeg_path);

        let ffprobe_path = flag_value("--ffprobe")
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.ffprobe_path);

        let keep_finished = flag_value("--keep-finished")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(defaults.keep_finished);

        Self {
            probe_timeout,
            log_capacity,
            ffmpeg_path,
            ffprobe_path,
            keep_finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_options_keep_defaults() {
        let cfg: EncoderConfig = serde_json::from_str(r#"{"crf": 28}"#).unwrap();
        assert_eq!(cfg.crf, 28);
        assert_eq!(cfg.preset, 4);
        assert_eq!(cfg.remove_image_codecs, vec!["mjpeg", "png"]);
    }

    #[test]
    fn tuning_defaults() {
        let t = ProgressTuning::default();
        assert_eq!(t.disagreement_threshold, 10.0);
        assert_eq!(t.warmup(), Duration::from_secs(5));
    }

    #[test]
    fn settings_from_args() {
        let args = ["backend", "--probe-timeout", "3", "--log-capacity", "oops"]
            .iter()
            .map(|s| s.to_string());
        let s = BackendSettings::from_args(args);
        assert_eq!(s.probe_timeout, Duration::from_secs(3));
        assert_eq!(s.log_capacity, 100);
        assert_eq!(s.ffmpeg_path, "ffmpeg");
        assert_eq!(s.ffprobe_path, "ffprobe");
        assert_eq!(s.keep_finished, 32);

        let s = BackendSettings::from_args(
            [
                "backend",
                "--ffmpeg",
                "/opt/ffmpeg/bin/ffmpeg",
                "--ffprobe",
                "/opt/ffmpeg/bin/ffprobe",
                "--keep-finished",
                "0",
            ]
            .map(String::from),
        );
        assert_eq!(s.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(s.ffprobe_path, "/opt/ffmpeg/bin/ffprobe");
        assert_eq!(s.keep_finished, 32);
        assert_eq!(s.probe_timeout, Duration::from_secs(10));

        let s = BackendSettings::from_args(["backend", "--keep-finished", "4"].map(String::from));
        assert_eq!(s.keep_finished, 4);
    }
}
