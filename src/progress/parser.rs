//! Parsing of the `key=value` progress protocol emitted on the progress channel.

/// Prefix of the elapsed-time field. The payload is in microseconds despite the name.
pub const ELAPSED_PREFIX: &str = "out_time_ms=";

/// Payload the child emits when a field has no value yet.
pub const NOT_AVAILABLE: &str = "N/A";

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// A recognized progress field, already converted to its numeric form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricUpdate {
    /// Seconds of input processed so far.
    Elapsed(f64),
    /// Speed multiplier relative to realtime.
    Speed(f64),
    /// Bytes written to the output so far.
    TotalSize(u64),
    /// `progress=end`
    End,
}

/// Parse an elapsed-time line into seconds.
///
/// Returns `None` for anything that is not an `out_time_ms=` line with an
/// integer payload. With a known `total`, the result never exceeds it.
pub fn parse_elapsed(line: &str, total: Option<f64>) -> Option<f64> {
    let payload = line.trim().strip_prefix(ELAPSED_PREFIX)?.trim();
    if payload == NOT_AVAILABLE {
        return None;
    }

    let micros: i64 = payload.parse().ok()?;
    // Negative values show up while the muxer is still starting.
    let secs = micros.max(0) as f64 / MICROS_PER_SECOND;

    Some(match total {
        Some(total) => secs.min(total),
        None => secs,
    })
}

/// Parse a speed payload such as `22.3x` or `N/A`.
pub fn parse_speed(value: &str) -> Option<f64> {
    let value = value.trim();
    if value == NOT_AVAILABLE {
        return None;
    }
    let number = value.strip_suffix('x').unwrap_or(value).trim();
    let speed: f64 = number.parse().ok()?;
    (speed.is_finite() && speed >= 0.0).then_some(speed)
}

/// Classify one progress-channel line.
///
/// Only `out_time_ms`, `speed`, `total_size` and `progress=end` produce an
/// update; every other key, and every `N/A` payload, is dropped.
pub fn parse_progress_line(line: &str, total: Option<f64>) -> Option<MetricUpdate> {
    let line = line.trim();
    let (key, value) = line.split_once('=')?;

    match key.trim() {
        "out_time_ms" => parse_elapsed(line, total).map(MetricUpdate::Elapsed),
        "speed" => parse_speed(value).map(MetricUpdate::Speed),
        "total_size" => value.trim().parse().ok().map(MetricUpdate::TotalSize),
        "progress" if value.trim() == "end" => Some(MetricUpdate::End),
        _ => None,
    }
}
