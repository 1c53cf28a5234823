// Zustandslose Parser fuer einzelne Telemetrie- und ffprobe-Werte.
// Kein Parser panikt; ein fehlender Treffer ist None und der Aufrufer
// behaelt den letzten gueltigen Wert.

use std::sync::LazyLock;

use regex::Regex;

static SPEED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"speed=\s*([\d.]+x|N/A)\s*$").expect("invalid speed regex")
});
static BITRATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bitrate=\s*([\d.]+\s*[kKmMgG]?bits?/s|N/A)\s*$").expect("invalid bitrate regex")
});
static BITRATE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\d.]+\s*[kKmMgG]?bits?/s$").expect("invalid bitrate token regex")
});

const NOT_AVAILABLE: &str = "N/A";

/// Ein Telemetrie-Wert, der auch explizit "N/A" sein kann.
/// Der Rohtext bleibt fuer die Anzeige erhalten.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading<T> {
    NotAvailable,
    Value { value: T, raw: String },
}

impl<T> Reading<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value { .. })
    }

    /// Rohtext wie von FFmpeg geliefert ("N/A" fuer NotAvailable).
    pub fn raw(&self) -> &str {
        match self {
            Reading::NotAvailable => NOT_AVAILABLE,
            Reading::Value { raw, .. } => raw,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Reading::NotAvailable => None,
            Reading::Value { value, .. } => Some(value),
        }
    }
}

/// Parst eine Bildrate als Dezimalzahl ("23.976") oder Bruch ("24000/1001").
/// Liefert 0 fuer leere, ungueltige oder Brueche mit Nenner <= 0.
pub fn parse_frame_rate(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }

    if let Some((num, den)) = s.split_once('/') {
        let num = num.trim().parse::<f64>();
        let den = den.trim().parse::<f64>();
        return match (num, den) {
            (Ok(num), Ok(den)) if den > 0.0 && num.is_finite() && den.is_finite() => num / den,
            _ => 0.0,
        };
    }

    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parst `HH:MM:SS[.fraction]` in Mikrosekunden. Der Bruchteil wird auf
/// genau 6 Stellen aufgefuellt bzw. abgeschnitten.
pub fn parse_out_time(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s == NOT_AVAILABLE {
        return None;
    }

    let mut parts = s.split(':');
    let (hours, mins, secs) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s), None) => (h, m, s),
        _ => return None,
    };

    let hours: u64 = hours.parse().ok()?;
    let mins: u64 = mins.parse().ok()?;

    let (whole, fraction) = match secs.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (secs, None),
    };
    let secs: u64 = whole.parse().ok()?;

    let micros = match fraction {
        Some(f) if !f.is_empty() => {
            if !f.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let mut digits: String = f.chars().take(6).collect();
            while digits.len() < 6 {
                digits.push('0');
            }
            digits.parse::<u64>().ok()?
        }
        _ => 0,
    };

    hours
        .checked_mul(3_600_000_000)?
        .checked_add(mins.checked_mul(60_000_000)?)?
        .checked_add(secs.checked_mul(1_000_000)?)?
        .checked_add(micros)
}

/// Nicht-negative Ganzzahl (frame, total_size, out_time_us).
pub fn parse_count(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok()
}

/// Nicht-negative, endliche Rate (fps).
pub fn parse_rate(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parst den Wert eines `speed=`-Schluessels: "N/A" oder `<zahl>x`.
pub fn speed_token(token: &str) -> Option<Reading<f64>> {
    let token = token.trim();
    if token == NOT_AVAILABLE {
        return Some(Reading::NotAvailable);
    }

    let number = token.strip_suffix('x')?.trim_end();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    let value = number.parse::<f64>().ok().filter(|v| v.is_finite())?;

    Some(Reading::Value {
        value,
        raw: token.to_string(),
    })
}

/// Sucht `speed=...` am Zeilenende, auch in FFmpeg-Statuszeilen.
pub fn parse_speed(line: &str) -> Option<Reading<f64>> {
    let caps = SPEED_RE.captures(line)?;
    speed_token(caps.get(1)?.as_str())
}

/// Parst den Wert eines `bitrate=`-Schluessels. Der Token wird unveraendert
/// uebernommen, Einheiten werden nicht umgerechnet.
pub fn bitrate_token(token: &str) -> Option<Reading<String>> {
    let token = token.trim();
    if token == NOT_AVAILABLE {
        return Some(Reading::NotAvailable);
    }
    if !BITRATE_TOKEN_RE.is_match(token) {
        return None;
    }
    Some(Reading::Value {
        value: token.to_string(),
        raw: token.to_string(),
    })
}

/// Sucht `bitrate=...` am Zeilenende.
pub fn parse_bitrate(line: &str) -> Option<Reading<String>> {
    let caps = BITRATE_RE.captures(line)?;
    bitrate_token(caps.get(1)?.as_str())
}
