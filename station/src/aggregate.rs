use crate::model::{Measurement, SensorKind, WindDirection};
use chrono::NaiveDateTime;

/// Rain collected by one bucket tip, in millimetres.
pub const BUCKET_SIZE_MM: f64 = 0.2794;

/// Collapses one window of raw readings into the measurement that gets sent.
/// An empty window yields zeroes (and an unknown wind direction).
pub fn aggregate(kind: SensorKind, readings: &[Measurement], at: NaiveDateTime) -> Measurement {
    let measurement = match kind {
        SensorKind::Air => Measurement::air(
            mean(readings.iter().filter_map(|r| r.temperature)),
            mean(readings.iter().filter_map(|r| r.pressure)),
            mean(readings.iter().filter_map(|r| r.humidity)),
        ),
        SensorKind::GroundTemperature => {
            Measurement::ground(mean(readings.iter().filter_map(|r| r.temperature)))
        }
        SensorKind::Rainfall => Measurement {
            amount: Some(rainfall(readings.len())),
            ..Default::default()
        },
        SensorKind::Wind => Measurement::wind(
            mean(readings.iter().filter_map(|r| r.speed)),
            mode(readings.iter().filter_map(|r| r.direction.as_deref()))
                .unwrap_or(WindDirection::Unknown.as_str()),
        ),
    };

    measurement.stamped(at)
}

/// Arithmetic mean truncated toward zero; 0 for no values.
pub fn mean(values: impl Iterator<Item = i32>) -> i32 {
    let (sum, count) = values.fold((0i64, 0i64), |(sum, count), v| (sum + v as i64, count + 1));
    if count == 0 {
        return 0;
    }
    (sum / count) as i32
}

/// Most frequent value. Ties go to the value seen first.
pub fn mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&'a str, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

/// Rainfall in whole millimetres for a number of bucket tips.
pub fn rainfall(ticks: usize) -> i32 {
    (ticks as f64 * BUCKET_SIZE_MM).round_ties_even() as i32
}
