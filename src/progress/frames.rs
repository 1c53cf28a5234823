// Gesamtframes und Quell-Bildrate: einmal vor dem Start per Probe,
// waehrend des Laufs nur noch Korrekturen.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ffmpeg::probe::MediaProbe;
use crate::progress::snapshot::ProgressSnapshot;

/// Annahme, wenn keine Bildrate ermittelt werden kann.
pub const FALLBACK_FRAME_RATE: f64 = 24.0;

/// Laengere Dauern gelten als kaputte Metadaten, daraus wird nicht hochgerechnet.
const MAX_ESTIMATE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_FRAME_ESTIMATE: u64 = 100_000_000;
const MAX_PLAUSIBLE_RATE: f64 = 1000.0;

/// Ergebnis der Probe-Kette vor dem Start.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameEstimate {
    pub source_frame_rate: f64,
    pub rate_is_fallback: bool,
    /// 0 = unbekannt.
    pub total_frames: u64,
    pub estimated: bool,
    /// ZERO = unbekannt.
    pub total_duration: Duration,
}

/// round(dauer * rate), sofern Dauer, Rate und Ergebnis plausibel sind.
pub fn frames_from_duration(duration: Duration, rate: f64) -> Option<u64> {
    if duration.is_zero() || duration > MAX_ESTIMATE_DURATION {
        return None;
    }
    if !(rate > 0.0 && rate < MAX_PLAUSIBLE_RATE) {
        return None;
    }

    let frames = (duration.as_secs_f64() * rate).round();
    if frames > 0.0 && frames < MAX_FRAME_ESTIMATE as f64 {
        Some(frames as u64)
    } else {
        None
    }
}

/// r_frame_rate bevorzugt, dann avg_frame_rate, sonst 24 fps.
/// Das bool sagt, ob der Fallback greift.
pub fn choose_frame_rate(real: f64, average: f64) -> (f64, bool) {
    if real > 0.0 {
        (real, false)
    } else if average > 0.0 {
        (average, false)
    } else {
        (FALLBACK_FRAME_RATE, true)
    }
}

/// Fuehrt die Fallback-Kette aus: Bildrate, Container-Framezahl, Dauer.
/// Kein Schritt ist fatal; im schlimmsten Fall bleibt alles unbekannt.
pub async fn probe_estimate<P>(probe: &P, input: &Path) -> FrameEstimate
where
    P: MediaProbe + ?Sized,
{
    let rates = probe.frame_rates(input).await.unwrap_or_default();
    let (source_frame_rate, rate_is_fallback) = choose_frame_rate(rates.real, rates.average);
    if rate_is_fallback {
        debug!(?input, "Keine Bildrate ermittelbar, nehme {FALLBACK_FRAME_RATE} fps an");
    }

    let mut estimate = FrameEstimate {
        source_frame_rate,
        rate_is_fallback,
        ..FrameEstimate::default()
    };

    // Framezahl aus dem Container ist am genauesten
    if let Some(frames) = probe.frame_count(input).await.filter(|&n| n > 0) {
        estimate.total_frames = frames;
        estimate.estimated = false;
        return estimate;
    }

    let Some(duration) = probe.duration(input).await else {
        warn!(?input, "Weder Framezahl noch Dauer ermittelbar, Fortschritt zunaechst unbekannt");
        return estimate;
    };
    estimate.total_duration = duration;

    if duration > MAX_ESTIMATE_DURATION {
        info!(?input, secs = duration.as_secs(), "Sehr lange Dauer, keine Frame-Schaetzung");
        return estimate;
    }

    if let Some(frames) = frames_from_duration(duration, source_frame_rate) {
        estimate.total_frames = frames;
        estimate.estimated = true;
    }
    estimate
}

/// Uebernimmt das Probe-Ergebnis in einen frischen Snapshot.
pub fn seed(snapshot: &mut ProgressSnapshot, estimate: &FrameEstimate) {
    snapshot.source_frame_rate = estimate.source_frame_rate;
    snapshot.source_rate_is_fallback = estimate.rate_is_fallback;
    snapshot.total_frames = estimate.total_frames;
    snapshot.frame_count_estimated = estimate.estimated;
    snapshot.total_duration = estimate.total_duration;
}

/// Ein Frame jenseits der bekannten Gesamtzahl hebt diese an. Auch eine
/// exakte Container-Angabe kann falsch sein, daher wieder "geschaetzt".
pub fn revise_for_frame(snapshot: &mut ProgressSnapshot, frame: u64) {
    if snapshot.total_frames > 0 && frame > snapshot.total_frames {
        snapshot.total_frames = frame;
        snapshot.frame_count_estimated = true;
    }
}

/// Dauer aus stderr, erst nach dem Start bekannt. Nur der erste Wert zaehlt.
/// Gibt true zurueck, wenn die Dauer uebernommen wurde.
pub fn apply_late_duration(snapshot: &mut ProgressSnapshot, duration: Duration) -> bool {
    if !snapshot.total_duration.is_zero() || duration.is_zero() {
        return false;
    }
    snapshot.total_duration = duration;
    reestimate(snapshot);
    true
}

/// Bildrate aus stderr, nur wenn bisher keine echte Rate bekannt ist.
pub fn apply_rate_hint(snapshot: &mut ProgressSnapshot, rate: f64) -> bool {
    let has_real_rate = snapshot.source_frame_rate > 0.0 && !snapshot.source_rate_is_fallback;
    if has_real_rate || !(rate > 0.0 && rate < MAX_PLAUSIBLE_RATE) {
        return false;
    }
    snapshot.source_frame_rate = rate;
    snapshot.source_rate_is_fallback = false;
    reestimate(snapshot);
    true
}

/// Schaetzung aus Dauer x Rate, solange keine exakte Framezahl vorliegt.
fn reestimate(snapshot: &mut ProgressSnapshot) {
    let exact = snapshot.total_frames > 0 && !snapshot.frame_count_estimated;
    if exact {
        return;
    }
    if let Some(frames) = frames_from_duration(snapshot.total_duration, snapshot.source_frame_rate) {
        snapshot.total_frames = frames;
        snapshot.frame_count_estimated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::probe::FrameRates;
    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeProbe {
        rates: Option<FrameRates>,
        frames: Option<u64>,
        duration: Option<Duration>,
    }

    #[async_trait]
    impl MediaProbe for FakeProbe {
        async fn frame_rates(&self, _input: &Path) -> Option<FrameRates> {
            self.rates
        }
        async fn frame_count(&self, _input: &Path) -> Option<u64> {
            self.frames
        }
        async fn duration(&self, _input: &Path) -> Option<Duration> {
            self.duration
        }
        async fn bitrate_kbps(&self, _input: &Path) -> Option<u64> {
            None
        }
    }

    fn rates(real: f64, average: f64) -> Option<FrameRates> {
        Some(FrameRates { real, average })
    }

    #[test]
    fn estimate_is_rounded_product() {
        let cases = [(10.0, 24.0, 240), (1.0, 23.976, 24), (60.5, 29.97, 1813), (0.02, 24.0, 0)];
        for (secs, rate, expected) in cases {
            let got = frames_from_duration(Duration::from_secs_f64(secs), rate).unwrap_or(0);
            assert_eq!(got, expected, "{secs}s @ {rate}");
        }
    }

    #[test]
    fn estimate_rejects_implausible_input() {
        assert_eq!(frames_from_duration(Duration::ZERO, 24.0), None);
        assert_eq!(frames_from_duration(Duration::from_secs(10), 0.0), None);
        assert_eq!(frames_from_duration(Duration::from_secs(10), 5000.0), None);
        assert_eq!(frames_from_duration(Duration::from_secs(25 * 3600), 24.0), None);
        // 23h59m bei 999 fps liegt unter 100M Frames
        assert!(frames_from_duration(Duration::from_secs(86_000), 999.0).is_some());
    }

    #[test]
    fn frame_rate_preference() {
        assert_eq!(choose_frame_rate(25.0, 24.0), (25.0, false));
        assert_eq!(choose_frame_rate(0.0, 23.976), (23.976, false));
        assert_eq!(choose_frame_rate(0.0, 0.0), (24.0, true));
    }

    #[tokio::test]
    async fn container_frame_count_wins() {
        let probe = FakeProbe {
            rates: rates(30.0, 30.0),
            frames: Some(1234),
            duration: Some(Duration::from_secs(100)),
        };
        let est = probe_estimate(&probe, Path::new("in.mkv")).await;
        assert_eq!(est.total_frames, 1234);
        assert!(!est.estimated);
        assert_eq!(est.source_frame_rate, 30.0);
    }

    #[tokio::test]
    async fn duration_fallback_marks_estimate() {
        let probe = FakeProbe {
            rates: rates(0.0, 25.0),
            frames: Some(0),
            duration: Some(Duration::from_secs(40)),
        };
        let est = probe_estimate(&probe, Path::new("in.mkv")).await;
        assert_eq!(est.total_frames, 1000);
        assert!(est.estimated);
        assert_eq!(est.total_duration, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn everything_unknown_is_not_fatal() {
        let est = probe_estimate(&FakeProbe::default(), Path::new("in.mkv")).await;
        assert_eq!(est.total_frames, 0);
        assert_eq!(est.total_duration, Duration::ZERO);
        assert_eq!(est.source_frame_rate, FALLBACK_FRAME_RATE);
        assert!(est.rate_is_fallback);
    }

    #[tokio::test]
    async fn very_long_duration_keeps_duration_only() {
        let probe = FakeProbe {
            rates: rates(24.0, 24.0),
            duration: Some(Duration::from_secs(30 * 3600)),
            ..FakeProbe::default()
        };
        let est = probe_estimate(&probe, Path::new("in.mkv")).await;
        assert_eq!(est.total_frames, 0);
        assert_eq!(est.total_duration, Duration::from_secs(30 * 3600));
    }

    #[test]
    fn frame_beyond_total_revises_upward() {
        let mut snap = ProgressSnapshot {
            total_frames: 950,
            frame_count_estimated: false,
            ..ProgressSnapshot::default()
        };
        revise_for_frame(&mut snap, 900);
        assert_eq!(snap.total_frames, 950);
        assert!(!snap.frame_count_estimated);

        revise_for_frame(&mut snap, 1000);
        assert_eq!(snap.total_frames, 1000);
        assert!(snap.frame_count_estimated);

        let mut unknown = ProgressSnapshot::default();
        revise_for_frame(&mut unknown, 10);
        assert_eq!(unknown.total_frames, 0);
    }

    #[test]
    fn late_duration_estimates_once() {
        let mut snap = ProgressSnapshot {
            source_frame_rate: 25.0,
            ..ProgressSnapshot::default()
        };
        assert!(apply_late_duration(&mut snap, Duration::from_secs(8)));
        assert_eq!(snap.total_frames, 200);
        assert!(snap.frame_count_estimated);

        assert!(!apply_late_duration(&mut snap, Duration::from_secs(99)));
        assert_eq!(snap.total_duration, Duration::from_secs(8));
    }

    #[test]
    fn late_duration_keeps_exact_count() {
        let mut snap = ProgressSnapshot {
            source_frame_rate: 25.0,
            total_frames: 321,
            frame_count_estimated: false,
            ..ProgressSnapshot::default()
        };
        apply_late_duration(&mut snap, Duration::from_secs(8));
        assert_eq!(snap.total_frames, 321);
        assert!(!snap.frame_count_estimated);
    }

    #[test]
    fn rate_hint_only_replaces_fallback() {
        let mut snap = ProgressSnapshot {
            source_frame_rate: FALLBACK_FRAME_RATE,
            source_rate_is_fallback: true,
            total_duration: Duration::from_secs(10),
            total_frames: 240,
            frame_count_estimated: true,
            ..ProgressSnapshot::default()
        };
        assert!(apply_rate_hint(&mut snap, 30.0));
        assert_eq!(snap.total_frames, 300);
        assert!(!apply_rate_hint(&mut snap, 60.0));
        assert_eq!(snap.source_frame_rate, 30.0);
    }
}
