// Auswertung der FFmpeg stderr-Ausgabe: Dauer- und Bildraten-Hinweise,
// alles andere landet im Log.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("invalid duration regex")
});
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*fps").expect("invalid fps regex"));
static TBR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*tbr").expect("invalid tbr regex"));

/// Statuszeilen, die FFmpeg neben -progress auf stderr schreibt.
const STATS_PREFIXES: [&str; 3] = ["frame=", "size=", "fps="];

/// `Duration: HH:MM:SS.CC` aus dem Input-Header (Hundertstel).
pub fn parse_duration_announcement(line: &str) -> Option<Duration> {
    let caps = DURATION_RE.captures(line)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());

    let hours = field(1)?;
    let mins = field(2)?;
    let secs = field(3)?;
    let centis = field(4)?;

    Some(
        Duration::from_secs(hours * 3600 + mins * 60 + secs)
            + Duration::from_millis(centis * 10),
    )
}

/// Bildrate aus einer Stream-Zeile, zuerst `<n> fps`, dann `<n> tbr`.
pub fn parse_frame_rate_hint(line: &str) -> Option<f64> {
    if is_stats_line(line) {
        return None;
    }

    let plausible = |re: &Regex| {
        re.captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|&fps| fps > 0.0 && fps < 1000.0)
    };

    plausible(&FPS_RE).or_else(|| plausible(&TBR_RE))
}

/// Gehoert die Zeile ins Diagnose-Log?
pub fn is_log_worthy(line: &str) -> bool {
    !line.is_empty() && !is_stats_line(line)
}

fn is_stats_line(line: &str) -> bool {
    STATS_PREFIXES.iter().any(|p| line.starts_with(p))
}
