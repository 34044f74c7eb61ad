//! Pure conversions from timer values to display values.

use std::f64::consts::PI;

const SECONDS_PER_HOUR: u64 = 3600;

/// Formats elapsed seconds as zero-padded `HH:MM:SS`; hours are not capped.
pub fn format_clock(elapsed_seconds: u64) -> String {
    let hours = elapsed_seconds / SECONDS_PER_HOUR;
    let minutes = (elapsed_seconds % SECONDS_PER_HOUR) / 60;
    let seconds = elapsed_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// One full ring revolution per hour of focus.
pub fn progress_fraction(elapsed_seconds: u64) -> f64 {
    (elapsed_seconds % SECONDS_PER_HOUR) as f64 / SECONDS_PER_HOUR as f64
}

/// Stroke dash offset for a progress ring of `radius`.
pub fn ring_offset(fraction: f64, radius: f64) -> f64 {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    2.0 * PI * radius * (1.0 - fraction)
}

pub fn completion_message(duration_minutes: i64) -> String {
    let duration_minutes = duration_minutes.max(0);
    format!(
        "Great job! You studied for {}h {}m",
        duration_minutes / 60,
        duration_minutes % 60
    )
}

pub fn end_failure_message() -> &'static str {
    "Error saving session. Please try again."
}
